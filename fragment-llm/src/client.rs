//! Generation client: Gemini `generateContent` or no backend at all.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::types::{GenerationRequest, GenerationResponse, Role, Sampling};

/// Default Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Provider backend for generation.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Google Gemini `generateContent` API.
    Gemini {
        /// API root, without a trailing slash.
        base_url: String,
        /// Sent as `x-goog-api-key`.
        api_key: String,
    },
    /// Gemini was selected but its key variable is unset or blank. Every
    /// call fails with [`GenerationError::MissingCredentials`].
    MissingKey {
        /// Environment variable that should hold the key.
        env: String,
    },
    /// No backend. Every call fails and callers use canned lines.
    None,
}

impl LlmProvider {
    /// Pick a provider from a name and an environment variable holding the key.
    ///
    /// `"gemini"` without a key becomes [`LlmProvider::MissingKey`]; unknown
    /// names become [`LlmProvider::None`]. Both log a warning.
    #[must_use]
    pub fn from_env(name: &str, base_url: &str, api_key_env: &str) -> Self {
        match name {
            "gemini" => match std::env::var(api_key_env) {
                Ok(key) if !key.trim().is_empty() => Self::Gemini {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    api_key: key,
                },
                _ => {
                    warn!(env = api_key_env, "Missing Gemini API key, using canned dialogue");
                    Self::MissingKey { env: api_key_env.to_string() }
                }
            },
            "none" => Self::None,
            other => {
                warn!(provider = other, "Unknown generation provider, using canned dialogue");
                Self::None
            }
        }
    }
}

/// The client that routes requests to the configured backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    max_retries: u32,
    sampling: Sampling,
    timeout_ms: u64,
}

impl LlmClient {
    /// Create a new client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            max_retries,
            sampling: Sampling::default(),
            timeout_ms: 10_000,
        }
    }

    /// Sampling applied by [`LlmClient::prepare`].
    #[must_use]
    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Timeout applied by [`LlmClient::prepare`].
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Stamp this client's sampling and timeout onto a request.
    #[must_use]
    pub fn prepare(&self, request: GenerationRequest) -> GenerationRequest {
        request.with_sampling(self.sampling).with_timeout(self.timeout_ms)
    }

    /// Create a client with no backend (all calls fail and trigger fallback).
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new(), 0)
    }

    /// Model name requests are sent to.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if the client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.provider, LlmProvider::Gemini { .. })
    }

    /// Generate text.
    ///
    /// # Errors
    /// Returns `Err` if no backend is configured or all retries fail.
    /// Callers should fall back to canned dialogue on error.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        match &self.provider {
            LlmProvider::None => Err(GenerationError::Unavailable(
                "No generation provider configured".into(),
            )),
            LlmProvider::MissingKey { env } => Err(GenerationError::MissingCredentials(env.clone())),
            LlmProvider::Gemini { base_url, api_key } => {
                self.generate_gemini(base_url, api_key, request).await
            }
        }
    }

    async fn generate_gemini(
        &self,
        base_url: &str,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let url = gemini_url(base_url, &self.model);
        let body = build_body(request);

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying Gemini call (attempt {}/{})", attempt + 1, self.max_retries + 1);
            }

            let start = Instant::now();
            let result = self
                .http
                .post(&url)
                .header("x-goog-api-key", api_key)
                .json(&body)
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| GenerationError::ParseError(e.to_string()))?;
                    let text = extract_text(&json)?;
                    debug!(latency_ms, chars = text.len(), "Gemini reply received");
                    return Ok(GenerationResponse {
                        text,
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    let err = GenerationError::Http { status, body };
                    warn!("Gemini returned error: {err}");
                    last_error = err.to_string();
                }
                Err(e) => {
                    if e.is_timeout() {
                        warn!("Gemini request timed out after {}ms", request.timeout_ms);
                        last_error = GenerationError::Timeout(request.timeout_ms).to_string();
                    } else {
                        let err = GenerationError::from(e);
                        warn!("Gemini request failed: {err}");
                        last_error = err.to_string();
                    }
                }
            }
        }

        Err(GenerationError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

/// `{base}/v1beta/models/{model}:generateContent`
#[must_use]
pub fn gemini_url(base_url: &str, model: &str) -> String {
    format!("{}/v1beta/models/{model}:generateContent", base_url.trim_end_matches('/'))
}

/// Build the `generateContent` body.
///
/// The system prompt travels as the first `user` turn; conversation turns
/// follow in order.
#[must_use]
pub fn build_body(request: &GenerationRequest) -> Value {
    let mut contents = Vec::with_capacity(request.turns.len() + 1);
    contents.push(json!({ "role": "user", "parts": [{ "text": request.system_prompt }] }));
    for turn in &request.turns {
        let role = match turn.role {
            Role::User => "user",
            Role::Model => "model",
        };
        contents.push(json!({ "role": role, "parts": [{ "text": turn.text }] }));
    }
    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": request.sampling.temperature,
            "topP": request.sampling.top_p,
            "maxOutputTokens": request.sampling.max_output_tokens,
        }
    })
}

/// Join the text parts of the first candidate.
///
/// # Errors
/// Returns [`GenerationError::EmptyResponse`] when no non-blank text exists.
pub fn extract_text(response: &Value) -> Result<String, GenerationError> {
    let text = response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        Err(GenerationError::EmptyResponse)
    } else {
        Ok(text.to_string())
    }
}
