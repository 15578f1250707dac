use crate::enrichment::EnrichedFields;
use serde::{Deserialize, Serialize};

/// Political climate shown for a state whose enrichment has never succeeded
pub const PLACEHOLDER_POLITICAL_CLIMATE: &str = "Could not fetch latest data.";

/// Demographic fields, replaced wholesale on every successful refresh.
///
/// `population == 0` is the sentinel for "enrichment never succeeded".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    pub population: u64,
    /// Gross state domestic product in INR
    pub gdp: f64,
    /// Percentage, 0-100
    pub literacy_rate: f64,
    /// Incidents per 100,000 population
    pub crime_rate: f64,
}

/// Baseline gameplay stats. Authored in the seed data and never touched by refresh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub budget: f64,
    pub public_opinion: f64,
    pub police_strength: f64,
    pub opposition_strength: f64,
    pub unemployment_rate: f64,
}

/// One governable Indian state: the authored shell plus its refreshed data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    /// Stable URL-safe identifier (e.g., "andhra-pradesh"), join key across tiers
    pub id: String,

    /// Display name, used for ordering
    pub name: String,

    pub description: String,

    #[serde(default)]
    pub demographics: Demographics,

    pub initial_stats: Stats,

    #[serde(default)]
    pub political_climate: String,

    /// Epoch millis of the last successful enrichment (0 = never)
    #[serde(default)]
    pub last_refreshed_at: i64,
}

impl StateRecord {
    /// A record is complete once enrichment has produced a population.
    pub fn is_complete(&self) -> bool {
        self.demographics.population > 0
    }

    /// Whether this state must be re-enriched at `now`.
    ///
    /// Incomplete and never-refreshed records always qualify, otherwise the
    /// record qualifies once it is strictly older than `interval_ms`.
    pub fn needs_refresh(&self, now: i64, interval_ms: i64) -> bool {
        if !self.is_complete() || self.last_refreshed_at <= 0 {
            return true;
        }
        now.saturating_sub(self.last_refreshed_at) > interval_ms
    }

    /// Replace the dynamic fields with a fresh enrichment result.
    ///
    /// `last_refreshed_at` never moves backwards, even if the clock does.
    pub fn apply_enrichment(&mut self, fields: EnrichedFields, refreshed_at: i64) {
        self.demographics = fields.demographics;
        self.political_climate = fields.political_climate;
        self.last_refreshed_at = self.last_refreshed_at.max(refreshed_at);
    }

    /// Reset a shell to the "enrichment failed" sentinel used by bootstrap.
    pub fn mark_unenriched(&mut self) {
        self.demographics = Demographics::default();
        self.political_climate = PLACEHOLDER_POLITICAL_CLIMATE.to_string();
        self.last_refreshed_at = 0;
    }
}
