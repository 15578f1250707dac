use super::{parse_enrichment, EnrichedFields, Enricher, EnrichmentError, EnrichmentRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a data provider API for Indian states. \
Given a JSON request with a stateName, reply with a single JSON object with the keys \
population (total residents), gdp (gross state domestic product in INR), \
literacyRate (percentage), crimeRate (cognizable crimes per 100,000 people) and \
politicalClimate (two or three sentences on the current political mood, key issues \
and voter concerns). Use the most recent realistic figures. Reply with JSON only.";

/// Enrichment configuration
#[derive(Clone, Debug, Deserialize)]
pub struct EnrichmentConfig {
    /// Master switch; when off, no enrichment calls are made at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// OpenAI-compatible API root (".../v1")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer token; falls back to STATECRAFT_LLM_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,
    /// Upper bound for a single state's enrichment call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum enrichment calls in flight per refresh batch
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key() -> Option<String> {
    std::env::var("STATECRAFT_LLM_API_KEY").ok()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    32
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Enricher backed by an OpenAI-compatible chat-completions endpoint.
///
/// Requests JSON-object output and validates it against the enrichment
/// schema; anything else is an `InvalidResponse`.
pub struct LlmEnricher {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl LlmEnricher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        Self::with_base_url(config, config.base_url.clone())
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(config: &EnrichmentConfig, base_url: String) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("statecraft-sync/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build enrichment HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_error(&self, state_name: &str, err: reqwest::Error) -> EnrichmentError {
        if err.is_timeout() {
            EnrichmentError::Timeout {
                state: state_name.to_string(),
                timeout_secs: self.timeout_secs,
            }
        } else {
            EnrichmentError::Request {
                state: state_name.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Enricher for LlmEnricher {
    async fn enrich(&self, state_name: &str) -> Result<EnrichedFields, EnrichmentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let user_content = serde_json::to_string(&EnrichmentRequest { state_name })
            .map_err(|e| EnrichmentError::Request {
                state: state_name.to_string(),
                message: e.to_string(),
            })?;

        let body = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
        };

        debug!(state = %state_name, model = %self.model, "Requesting state enrichment");

        let mut request = self.http_client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.request_error(state_name, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::Request {
                state: state_name.to_string(),
                message: describe_status(status, &detail),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| EnrichmentError::InvalidResponse {
                state: state_name.to_string(),
                reason: format!("unreadable completion body: {}", e),
            })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EnrichmentError::InvalidResponse {
                state: state_name.to_string(),
                reason: "completion contained no content".to_string(),
            })?;

        parse_enrichment(state_name, &content)
    }
}

fn describe_status(status: StatusCode, detail: &str) -> String {
    match status {
        StatusCode::UNAUTHORIZED => "auth error: API key missing or invalid".to_string(),
        StatusCode::TOO_MANY_REQUESTS => "rate limited by enrichment service".to_string(),
        s => format!("enrichment service error ({}): {}", s, detail),
    }
}
