//! Loading pipeline configuration (backend, review budgets, paths, prompts) from TOML.
//!
//! See `PipelineConfig` and `Prompts` for expected schema. Every section is optional;
//! missing keys fall back to defaults. The loaded value is immutable and handed to the
//! pipeline at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
  pub backend: BackendConfig,
  pub review: ReviewConfig,
  pub generation: GenerationConfig,
  pub paths: PathsConfig,
  pub prompts: Prompts,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  pub endpoint: String,
  pub model: String,
  pub temperature: f32,
  pub max_output_tokens: u32,
  pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      endpoint: "http://localhost:11434/api/generate".into(),
      model: "mistral".into(),
      temperature: 0.7,
      max_output_tokens: 1000,
      request_timeout_secs: 60,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
  pub grade_level: u8,
  pub max_iterations: usize,
  pub iteration_timeout_secs: f64,
  pub total_timeout_secs: f64,
  pub min_solution_words: usize,
}

impl Default for ReviewConfig {
  fn default() -> Self {
    Self {
      grade_level: 7,
      max_iterations: 3,
      iteration_timeout_secs: 30.0,
      total_timeout_secs: 120.0,
      min_solution_words: 3,
    }
  }
}

impl ReviewConfig {
  pub fn iteration_timeout(&self) -> Duration {
    seconds("review.iteration_timeout_secs", self.iteration_timeout_secs, 30.0)
  }

  pub fn total_timeout(&self) -> Duration {
    seconds("review.total_timeout_secs", self.total_timeout_secs, 120.0)
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  /// Backend attempts per variation before giving up.
  pub max_attempts: u32,
  pub attempt_timeout_secs: f64,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self { max_attempts: 3, attempt_timeout_secs: 30.0 }
  }
}

impl GenerationConfig {
  pub fn attempt_timeout(&self) -> Duration {
    seconds("generation.attempt_timeout_secs", self.attempt_timeout_secs, 30.0)
  }
}

/// Seconds from the config file as a `Duration`. Negative values clamp to zero, values too
/// large to represent (including `inf`) mean unbounded, NaN falls back to `default_secs`.
fn seconds(setting: &str, secs: f64, default_secs: f64) -> Duration {
  if secs.is_nan() {
    warn!(setting, default_secs, "Timeout is NaN; using default");
    return Duration::from_secs_f64(default_secs);
  }
  match Duration::try_from_secs_f64(secs.max(0.0)) {
    Ok(d) => d,
    Err(_) => {
      warn!(setting, secs, "Timeout too large to represent; treating as unbounded");
      Duration::MAX
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
  pub templates_dir: PathBuf,
  pub cache_dir: PathBuf,
  pub records_dir: PathBuf,
}

impl Default for PathsConfig {
  fn default() -> Self {
    Self {
      templates_dir: PathBuf::from("data/problems"),
      cache_dir: PathBuf::from("data/llm_cache"),
      records_dir: PathBuf::from("data/variations"),
    }
  }
}

/// Prompts used against the backend. Defaults target grade-7 CBSE practice problems.
/// You can override them in TOML if you need to tune tone/structure.
/// User templates use `{placeholder}` substitution (see `util::fill_template`).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Variation generation (cached)
  pub variation_system: String,
  pub variation_user_template: String,
  // Initial problem + solution draft
  pub problem_system: String,
  pub problem_user_template: String,
  // Revision after a rejected review
  pub revision_system: String,
  pub revision_user_template: String,
  // Validator checks
  pub grade_system: String,
  pub grade_lenient_template: String,
  pub grade_strict_template: String,
  pub correctness_system: String,
  pub correctness_user_template: String,
  pub explanation_system: String,
  pub explanation_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      variation_system: "You are an expert math teacher creating practice problems for grade {grade} students following the CBSE curriculum. Respond ONLY with strict JSON.".into(),
      variation_user_template: r#"Create a variation of the given math problem that keeps the same mathematical structure and concepts.
- Use different numbers while preserving the mathematical relationships.
- Keep it clear, complete and appropriate for grade {grade}; end with a question mark.
{part_instruction}

Return JSON: {"variation": string, "explanation": string}
The explanation is brief and describes the mathematical changes.

Original problem:
{problem}

Generate a UNIQUE variation #{variation_number}. {style_instruction}"#.into(),
      problem_system: "You are an expert math teacher creating problem variations. Always respond with valid JSON.".into(),
      problem_user_template: r#"Create a new problem that is a variation of the original for grade {grade} students, preserving its exact algebraic structure.
1. Write down the equation behind the original problem.
2. Create a new problem with different numbers (and context, for word problems) that resolves to the same structure.
3. Keep the style: direct questions stay direct, word problems stay word problems.
4. Use precise language and integer answers for countable items.
5. Keep the numerical complexity (fractions stay fractions).

Original problem:
{original}

Return JSON: {"problem": string ending with '?', "solution": detailed step-by-step string}"#.into(),
      revision_system: "You are an expert math teacher revising problems. Always respond with valid JSON.".into(),
      revision_user_template: r#"Revise the problem and solution to address the feedback while keeping the algebraic structure of the original.

Original problem:
{original}

Current variation:
Problem: {problem}
Solution: {solution}

Feedback:
{feedback}

Return JSON: {"problem": string ending with '?', "solution": detailed step-by-step string}"#.into(),
      grade_system: "You are an expert in math curriculum development and grade-level appropriateness. Reply as compact JSON.".into(),
      grade_lenient_template: r#"Evaluate if this math problem is appropriate for a grade {grade} student.
Only flag MAJOR issues: concepts clearly beyond grade {grade}, missing information that makes it unsolvable, or a trivial problem. Ignore wording and style.

Problem: {problem}

Return JSON: {"is_appropriate": boolean, "feedback": string, "difficulty": "too_easy" | "appropriate" | "too_difficult", "suggestions": [string]}"#.into(),
      grade_strict_template: r#"Evaluate if this math problem is appropriate for a grade {grade} student. Apply the full rubric:
1. Mathematical concepts and their typical grade level
2. Complexity of calculations
3. Reading level and vocabulary
4. Prior knowledge required
5. Clarity: exactly one reasonable interpretation, all needed information present

Problem: {problem}

Return JSON: {"is_appropriate": boolean, "feedback": string, "difficulty": "too_easy" | "appropriate" | "too_difficult", "suggestions": [string]}"#.into(),
      correctness_system: "You are a math expert that validates solutions to math problems. Reply as compact JSON.".into(),
      correctness_user_template: r#"Verify if this solution correctly solves the math problem.

Problem: {problem}
Solution: {solution}

Check the mathematical principles, the logical flow, the final answer and the arithmetic.
Return JSON: {"is_correct": boolean, "feedback": string, "correct_answer": string or null, "suggestions": [string]}"#.into(),
      explanation_system: "You are a math education expert evaluating solution explanations. Reply as compact JSON.".into(),
      explanation_user_template: r#"Evaluate this math solution explanation for a grade {grade} student.
Check for clear step-by-step reasoning, correct operations, age-appropriate language and a complete solution.

Solution: {solution}

Return JSON: {"is_quality": boolean, "feedback": string, "missing_elements": [string]}"#.into(),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read { path: String, #[source] source: std::io::Error },
  #[error("failed to parse config {path}: {source}")]
  Parse { path: String, #[source] source: toml::de::Error },
}

impl PipelineConfig {
  pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str::<PipelineConfig>(s)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let display = path.display().to_string();
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: display.clone(), source })?;
    Self::from_toml_str(&s).map_err(|source| ConfigError::Parse { path: display, source })
  }

  /// Apply `LLM_ENDPOINT` / `LLM_MODEL` overrides.
  pub fn with_env_overrides(mut self) -> Self {
    if let Ok(endpoint) = std::env::var("LLM_ENDPOINT") {
      self.backend.endpoint = endpoint;
    }
    if let Ok(model) = std::env::var("LLM_MODEL") {
      self.backend.model = model;
    }
    self
  }
}

/// Load config from `explicit` or PIPELINE_CONFIG_PATH. On any parsing/IO error, logs and
/// returns defaults.
pub fn load_pipeline_config(explicit: Option<&Path>) -> PipelineConfig {
  let path = match explicit {
    Some(p) => p.to_path_buf(),
    None => match std::env::var("PIPELINE_CONFIG_PATH") {
      Ok(p) => PathBuf::from(p),
      Err(_) => return PipelineConfig::default().with_env_overrides(),
    },
  };

  let cfg = match PipelineConfig::from_file(&path) {
    Ok(cfg) => {
      info!(target: "mathtutor", path = %path.display(), "Loaded pipeline config (TOML)");
      cfg
    }
    Err(e) => {
      error!(target: "mathtutor", path = %path.display(), error = %e, "Failed to load TOML config; using defaults");
      PipelineConfig::default()
    }
  };
  cfg.with_env_overrides()
}
