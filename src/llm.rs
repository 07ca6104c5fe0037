//! Minimal client for the text-generation backend.
//!
//! We only call the non-streaming `generate` endpoint (Ollama wire format) and get raw text back.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! Every transport problem (connection refused, non-2xx, transport timeout, undecodable body)
//! surfaces as a `BackendError`; callers turn it into data, never into a panic.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::BackendConfig;

/// Errors from a backend call. All variants mean "backend unavailable" to the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
  #[error("backend unreachable: {0}")]
  Unavailable(String),
  #[error("backend HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("backend request timed out after {0:?}")]
  Timeout(Duration),
  #[error("backend response could not be decoded: {0}")]
  Decode(String),
  #[error("backend returned an empty response")]
  Empty,
}

/// One generation request, before it is flattened into the wire format.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
  pub system: String,
  pub user: String,
  pub temperature: f32,
  pub max_output_tokens: u32,
  /// Ask the backend to constrain output to JSON (best effort; output is still parsed defensively).
  pub json_mode: bool,
}

impl GenerationRequest {
  pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
    Self {
      system: system.into(),
      user: user.into(),
      temperature: 0.7,
      max_output_tokens: 1000,
      json_mode: true,
    }
  }

  pub fn temperature(mut self, t: f32) -> Self {
    self.temperature = t;
    self
  }

  pub fn max_output_tokens(mut self, n: u32) -> Self {
    self.max_output_tokens = n;
    self
  }

  /// System and user text concatenated the way the backend expects a single prompt.
  pub fn prompt(&self) -> String {
    if self.system.trim().is_empty() {
      self.user.clone()
    } else {
      format!("{}\n\n{}", self.system, self.user)
    }
  }
}

/// Raw backend output plus usage counters.
#[derive(Clone, Debug)]
pub struct GenerationResponse {
  pub text: String,
  pub model: String,
  pub prompt_tokens: u64,
  pub completion_tokens: u64,
}

/// Anything that turns a prompt into text. Knows nothing about math or validation.
#[async_trait]
pub trait TextGenerationClient: Send + Sync {
  async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, BackendError>;

  /// The model name (for display/logging).
  fn model_name(&self) -> &str;
}

#[derive(Clone)]
pub struct OllamaClient {
  client: reqwest::Client,
  endpoint: String,
  model: String,
}

impl OllamaClient {
  pub fn new(endpoint: impl Into<String>, model: impl Into<String>, request_timeout: Duration) -> Result<Self, BackendError> {
    let client = reqwest::Client::builder()
      .timeout(request_timeout)
      .build()
      .map_err(|e| BackendError::Unavailable(e.to_string()))?;
    Ok(Self { client, endpoint: endpoint.into(), model: model.into() })
  }

  pub fn from_config(cfg: &BackendConfig) -> Result<Self, BackendError> {
    Self::new(cfg.endpoint.clone(), cfg.model.clone(), Duration::from_secs(cfg.request_timeout_secs))
  }

  pub fn endpoint(&self) -> &str { &self.endpoint }
}

#[async_trait]
impl TextGenerationClient for OllamaClient {
  #[instrument(level = "info", skip(self, request), fields(model = %self.model, prompt_len = request.user.len() + request.system.len()))]
  async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, BackendError> {
    let body = GenerateRequest {
      model: self.model.clone(),
      prompt: request.prompt(),
      stream: false,
      format: if request.json_mode { Some("json") } else { None },
      options: GenerateOptions {
        temperature: request.temperature,
        num_predict: request.max_output_tokens,
      },
    };

    let start = Instant::now();
    let res = self.client.post(&self.endpoint)
      .header(USER_AGENT, "mathtutor/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(&body)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          BackendError::Timeout(start.elapsed())
        } else {
          BackendError::Unavailable(e.to_string())
        }
      })?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_backend_error(&body).unwrap_or(body);
      error!(target: "backend", status = status.as_u16(), elapsed = ?start.elapsed(), "Backend returned an error status");
      return Err(BackendError::Http { status: status.as_u16(), message });
    }

    let body: GenerateResponse = res.json().await.map_err(|e| BackendError::Decode(e.to_string()))?;
    let elapsed = start.elapsed();
    info!(
      target: "backend",
      ?elapsed,
      prompt_tokens = body.prompt_eval_count,
      completion_tokens = body.eval_count,
      response_len = body.response.len(),
      "Backend usage"
    );

    let text = body.response.trim().to_string();
    if text.is_empty() {
      debug!(target: "backend", "Backend produced no text");
      return Err(BackendError::Empty);
    }

    Ok(GenerationResponse {
      text,
      model: body.model.unwrap_or_else(|| self.model.clone()),
      prompt_tokens: body.prompt_eval_count,
      completion_tokens: body.eval_count,
    })
  }

  fn model_name(&self) -> &str {
    &self.model
  }
}

// --- Wire DTOs ---

#[derive(Serialize)]
struct GenerateRequest {
  model: String,
  prompt: String,
  stream: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  format: Option<&'static str>,
  options: GenerateOptions,
}
#[derive(Serialize)]
struct GenerateOptions { temperature: f32, num_predict: u32 }

#[derive(Deserialize)]
struct GenerateResponse {
  #[serde(default)] response: String,
  #[serde(default)] model: Option<String>,
  #[serde(default)] prompt_eval_count: u64,
  #[serde(default)] eval_count: u64,
}

/// Try to extract a clean error message from a backend error body.
fn extract_backend_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error),
    Err(_) => None,
  }
}
