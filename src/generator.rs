//! The generating side of the pipeline: cached variations, initial drafts, and revisions.
//!
//! Variation and draft generation retry up to `max_attempts` times, each attempt bounded by
//! `attempt_timeout`. Revisions are a single call; the orchestrator owns their time budget.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheError, CachedGenerationError, GeneratedVariation, VariationCache};
use crate::config::{GenerationConfig, PipelineConfig, Prompts};
use crate::domain::{CacheEntry, Candidate, ProblemTemplate};
use crate::llm::{GenerationRequest, TextGenerationClient};
use crate::parse::{generate_structured, require_text, text_or_json, StructuredCallError, Structured};
use crate::util::{fill_template, is_multi_part};

/// One is picked per attempt so repeated requests drift apart.
const STYLE_INSTRUCTIONS: &[&str] = &[
  "Use different names and numbers while keeping the problem structure the same.",
  "Change the context slightly (different objects or scenario) but keep the math the same.",
  "Modify the numbers to make the problem slightly easier or harder, but still appropriate for the grade.",
  "Use a different real-world context that requires the same mathematical operations to solve.",
  "Adjust the numbers to create a different but related mathematical relationship.",
];

const SINGLE_PART_INSTRUCTION: &str =
  "The question has a single part. Make sure the variation is self-contained and complete.";

const MULTI_PART_INSTRUCTION: &str = "For this multi-part question:
1. Keep exactly the same number of parts as the original.
2. Keep the same labels ((i), (ii), ...) for each part.
3. Keep all parts mathematically consistent with each other.";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
  #[error("{what}: all {attempts} attempts failed; last error: {last}")]
  Exhausted { what: &'static str, attempts: u32, last: String },
  #[error(transparent)]
  Call(#[from] StructuredCallError),
  #[error(transparent)]
  Cache(#[from] CacheError),
}

#[derive(Debug, Deserialize)]
pub struct VariationDraft {
  #[serde(deserialize_with = "text_or_json")]
  pub variation: String,
  #[serde(default)]
  pub explanation: String,
}

impl Structured for VariationDraft {
  fn validate(&self) -> Result<(), String> {
    require_text("variation", &self.variation)
  }
}

/// A problem with its worked solution.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProblemDraft {
  #[serde(deserialize_with = "text_or_json")]
  pub problem: String,
  #[serde(deserialize_with = "text_or_json")]
  pub solution: String,
}

impl Structured for ProblemDraft {
  fn validate(&self) -> Result<(), String> {
    require_text("problem", &self.problem)?;
    require_text("solution", &self.solution)
  }
}

/// Longer than 10 characters and mentions at least one number.
pub fn passes_quality_gate(variation: &str) -> bool {
  let v = variation.trim();
  v.chars().count() > 10 && v.chars().any(|c| c.is_ascii_digit())
}

/// Anything that can rewrite a candidate given reviewer feedback.
#[async_trait]
pub trait Reviser: Send + Sync {
  async fn revise(&self, candidate: &Candidate, feedback: &str) -> Result<ProblemDraft, GenerationError>;
}

pub struct ProblemGenerator {
  client: Arc<dyn TextGenerationClient>,
  cache: VariationCache,
  prompts: Prompts,
  generation: GenerationConfig,
  grade_level: u8,
  temperature: f32,
  max_output_tokens: u32,
}

impl ProblemGenerator {
  pub fn new(client: Arc<dyn TextGenerationClient>, cache: VariationCache, cfg: &PipelineConfig) -> Self {
    Self {
      client,
      cache,
      prompts: cfg.prompts.clone(),
      generation: cfg.generation.clone(),
      grade_level: cfg.review.grade_level,
      temperature: cfg.backend.temperature,
      max_output_tokens: cfg.backend.max_output_tokens,
    }
  }

  pub fn cache(&self) -> &VariationCache { &self.cache }

  fn request(&self, system: &str, user: String) -> GenerationRequest {
    let grade = self.grade_level.to_string();
    GenerationRequest::new(fill_template(system, &[("grade", &grade)]), user)
      .temperature(self.temperature)
      .max_output_tokens(self.max_output_tokens)
  }

  /// Run `build` → backend → parse → `accept` until one attempt succeeds.
  async fn with_retries<T, B, A>(&self, what: &'static str, mut build: B, accept: A) -> Result<T, GenerationError>
  where
    T: DeserializeOwned + Structured,
    B: FnMut(u32) -> GenerationRequest,
    A: Fn(&T) -> Result<(), String>,
  {
    let attempts = self.generation.max_attempts.max(1);
    let per_attempt = self.generation.attempt_timeout();
    let mut last = String::from("no attempt made");

    for attempt in 1..=attempts {
      let request = build(attempt);
      match timeout(per_attempt, generate_structured::<T>(self.client.as_ref(), request)).await {
        Ok(Ok(value)) => match accept(&value) {
          Ok(()) => {
            debug!(target: "pipeline", what, attempt, "Generation attempt succeeded");
            return Ok(value);
          }
          Err(reason) => last = reason,
        },
        Ok(Err(e)) => last = e.to_string(),
        Err(_) => last = format!("attempt timed out after {:?}", per_attempt),
      }
      warn!(target: "pipeline", what, attempt, max_attempts = attempts, reason = %last, "Generation attempt failed");
    }

    Err(GenerationError::Exhausted { what, attempts, last })
  }

  /// Variation `variation_index` of `source`. Index 0 is served from the cache when present.
  #[instrument(level = "info", skip(self, source), fields(source_len = source.len()))]
  pub async fn generate_variation(&self, source: &str, variation_index: u32) -> Result<CacheEntry, GenerationError> {
    let entry = self
      .cache
      .get_or_generate(source, variation_index, || self.fresh_variation(source, variation_index))
      .await
      .map_err(|e| match e {
        CachedGenerationError::Generate(g) => g,
        CachedGenerationError::Cache(c) => GenerationError::Cache(c),
      })?;
    info!(target: "pipeline", key = %entry.key, "Variation ready");
    Ok(entry)
  }

  async fn fresh_variation(&self, source: &str, variation_index: u32) -> Result<GeneratedVariation, GenerationError> {
    let part_instruction = if is_multi_part(source) { MULTI_PART_INSTRUCTION } else { SINGLE_PART_INSTRUCTION };
    let grade = self.grade_level.to_string();
    let number = (variation_index + 1).to_string();

    let build = |_attempt: u32| {
      let style = STYLE_INSTRUCTIONS.choose(&mut rand::thread_rng()).copied().unwrap_or_default();
      let user = fill_template(
        &self.prompts.variation_user_template,
        &[
          ("grade", &grade),
          ("part_instruction", part_instruction),
          ("problem", source),
          ("variation_number", &number),
          ("style_instruction", style),
        ],
      );
      self.request(&self.prompts.variation_system, user)
    };
    let accept = |d: &VariationDraft| {
      if passes_quality_gate(&d.variation) {
        Ok(())
      } else {
        Err(format!("variation failed the quality gate: {:?}", d.variation))
      }
    };

    let draft: VariationDraft = self.with_retries("variation", build, accept).await?;
    Ok(GeneratedVariation { variation_text: draft.variation.trim().to_string(), explanation: draft.explanation })
  }

  /// First problem+solution draft derived from a template.
  #[instrument(level = "info", skip(self, template), fields(template_id = %template.id))]
  pub async fn generate_problem(&self, template: &ProblemTemplate) -> Result<ProblemDraft, GenerationError> {
    let grade = self.grade_level.to_string();
    let build = |_attempt: u32| {
      let user = fill_template(
        &self.prompts.problem_user_template,
        &[("grade", &grade), ("original", &template.original_question)],
      );
      self.request(&self.prompts.problem_system, user)
    };
    let accept = |d: &ProblemDraft| {
      if passes_quality_gate(&d.problem) {
        Ok(())
      } else {
        Err(format!("problem failed the quality gate: {:?}", d.problem))
      }
    };
    self.with_retries("problem", build, accept).await
  }
}

#[async_trait]
impl Reviser for ProblemGenerator {
  #[instrument(level = "info", skip(self, candidate, feedback), fields(id = %candidate.id, feedback_len = feedback.len()))]
  async fn revise(&self, candidate: &Candidate, feedback: &str) -> Result<ProblemDraft, GenerationError> {
    let user = fill_template(
      &self.prompts.revision_user_template,
      &[
        ("original", &candidate.source_question),
        ("problem", &candidate.current_text),
        ("solution", &candidate.current_solution),
        ("feedback", feedback),
      ],
    );
    let request = self.request(&self.prompts.revision_system, user);
    let draft = generate_structured::<ProblemDraft>(self.client.as_ref(), request).await?;
    info!(target: "pipeline", id = %candidate.id, "Revision received");
    Ok(draft)
  }
}
