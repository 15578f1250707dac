// Enrichment boundary: fresh demographic and political data per state

mod client;

pub use client::{EnrichmentConfig, LlmEnricher};

use crate::state::Demographics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fresh dynamic fields for one state
#[derive(Clone, Debug, PartialEq)]
pub struct EnrichedFields {
    pub demographics: Demographics,
    pub political_climate: String,
}

/// Per-state enrichment failure. Never aborts a refresh batch.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment request for {state} failed: {message}")]
    Request { state: String, message: String },

    #[error("enrichment for {state} timed out after {timeout_secs}s")]
    Timeout { state: String, timeout_secs: u64 },

    #[error("enrichment response for {state} failed validation: {reason}")]
    InvalidResponse { state: String, reason: String },
}

/// Source of fresh data for a single state.
///
/// Every call is independently fallible; implementations must not assume
/// any ordering between concurrent calls.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, state_name: &str) -> Result<EnrichedFields, EnrichmentError>;
}

/// Request payload sent to the generative service
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentRequest<'a> {
    pub state_name: &'a str,
}

/// Raw response shape expected back from the generative service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResponse {
    pub population: f64,
    pub gdp: f64,
    pub literacy_rate: f64,
    pub crime_rate: f64,
    pub political_climate: String,
}

impl EnrichmentResponse {
    /// Check the response against the schema and convert to record fields.
    ///
    /// Rules:
    /// - all numbers finite
    /// - population > 0 (zero is the "never enriched" sentinel)
    /// - gdp >= 0, crime rate >= 0
    /// - literacy rate within 0-100
    /// - political climate non-empty
    pub fn validate(self, state_name: &str) -> Result<EnrichedFields, EnrichmentError> {
        let invalid = |reason: String| EnrichmentError::InvalidResponse {
            state: state_name.to_string(),
            reason,
        };

        let numbers = [
            ("population", self.population),
            ("gdp", self.gdp),
            ("literacyRate", self.literacy_rate),
            ("crimeRate", self.crime_rate),
        ];
        for (field, value) in numbers {
            if !value.is_finite() {
                return Err(invalid(format!("{} is not a finite number", field)));
            }
        }

        if self.population < 1.0 {
            return Err(invalid(format!(
                "population must be positive, got {}",
                self.population
            )));
        }
        if self.gdp < 0.0 {
            return Err(invalid(format!("gdp must not be negative, got {}", self.gdp)));
        }
        if !(0.0..=100.0).contains(&self.literacy_rate) {
            return Err(invalid(format!(
                "literacyRate must be within 0-100, got {}",
                self.literacy_rate
            )));
        }
        if self.crime_rate < 0.0 {
            return Err(invalid(format!(
                "crimeRate must not be negative, got {}",
                self.crime_rate
            )));
        }

        let political_climate = self.political_climate.trim().to_string();
        if political_climate.is_empty() {
            return Err(invalid("politicalClimate is empty".to_string()));
        }

        Ok(EnrichedFields {
            demographics: Demographics {
                population: self.population.round() as u64,
                gdp: self.gdp,
                literacy_rate: self.literacy_rate,
                crime_rate: self.crime_rate,
            },
            political_climate,
        })
    }
}

/// Parse the text content returned by the model into validated fields.
///
/// Models sometimes wrap JSON in markdown fences; those are stripped first.
pub fn parse_enrichment(state_name: &str, content: &str) -> Result<EnrichedFields, EnrichmentError> {
    let response: EnrichmentResponse =
        serde_json::from_str(strip_code_blocks(content)).map_err(|e| {
            EnrichmentError::InvalidResponse {
                state: state_name.to_string(),
                reason: format!("malformed JSON: {}", e),
            }
        })?;

    response.validate(state_name)
}

fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
