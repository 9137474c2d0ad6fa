//! Client for the remote interpretation service.
//!
//! Sends a question together with an AU payload (see [`crate::payload`]) to a
//! Gemini `generateContent` endpoint and returns the reply text. The HTTP
//! clients are only built with the `coach` feature; prompt construction and
//! response parsing are always available.

#[cfg(feature = "coach")]
use crate::config::CoachConfig;
use serde::{Deserialize, Serialize};

/// Base URL of the generative language API.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Interpretation client errors.
#[derive(Debug)]
pub enum CoachError {
    /// No API key was configured
    MissingApiKey,
    Network(String),
    /// The service returned an error response
    Server { status: u16, message: String },
    Serialization(String),
    /// The response held no text
    EmptyReply,
}

impl std::fmt::Display for CoachError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoachError::MissingApiKey => write!(f, "GEMINI_API_KEY not set."),
            CoachError::Network(msg) => write!(f, "Coach network error: {msg}"),
            CoachError::Server { status, message } => {
                write!(f, "Coach server error ({status}): {message}")
            }
            CoachError::Serialization(msg) => write!(f, "Coach serialization error: {msg}"),
            CoachError::EmptyReply => write!(f, "Coach returned no text"),
        }
    }
}

impl std::error::Error for CoachError {}

/// Prompt sent for a question about `data`.
pub fn build_prompt(question: &str, data: &serde_json::Value) -> String {
    format!(
        "You are a concise coach reading facial Action Units (AUs) computed by OpenFace.\n\
         Use ONLY the provided numbers; do not invent facts; do not give medical/clinical advice.\n\
         Give 2-4 sentences. If trends look negative or arousal is low, add 1 practical tip.\n\n\
         User question: {question}\n\n\
         Structured AU data (JSON):\n\
         {data}\n\n\
         Answer:"
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

impl GenerateRequest {
    pub fn new(prompt: String, temperature: f64) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
            generation_config: GenerationConfig { temperature },
        }
    }
}

impl GenerateResponse {
    /// Text of the first candidate, trimmed.
    pub fn text(&self) -> Result<String, CoachError> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(CoachError::EmptyReply);
        }
        Ok(text.to_string())
    }
}

/// URL of the `generateContent` method for `model`.
pub fn generate_url(endpoint: &str, model: &str) -> String {
    format!("{}/models/{}:generateContent", endpoint.trim_end_matches('/'), model)
}

/// Async interpretation client.
#[cfg(feature = "coach")]
pub struct CoachClient {
    config: CoachConfig,
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

#[cfg(feature = "coach")]
impl CoachClient {
    pub fn new(config: CoachConfig) -> Result<Self, CoachError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(CoachError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| CoachError::Network(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Ask `question` about `data`, returning the reply text.
    pub async fn ask(&self, question: &str, data: &serde_json::Value) -> Result<String, CoachError> {
        let request = GenerateRequest::new(build_prompt(question, data), self.config.temperature);

        let response = self
            .client
            .post(generate_url(&self.endpoint, &self.config.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoachError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CoachError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CoachError::Serialization(e.to_string()))?;
        reply.text()
    }
}

/// Blocking interpretation client for the CLI.
#[cfg(feature = "coach")]
pub struct BlockingCoachClient {
    inner: CoachClient,
    runtime: tokio::runtime::Runtime,
}

#[cfg(feature = "coach")]
impl BlockingCoachClient {
    pub fn new(config: CoachConfig) -> Result<Self, CoachError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CoachError::Network(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: CoachClient::new(config)?,
            runtime,
        })
    }

    pub fn ask(&self, question: &str, data: &serde_json::Value) -> Result<String, CoachError> {
        self.runtime.block_on(self.inner.ask(question, data))
    }
}
