//! Math practice problem pipeline.
//!
//! A generator proposes variations of template problems, a validator critiques them, and the
//! orchestrator loops review → revise under iteration and time budgets. All intelligence comes
//! from an external text-generation backend whose output is parsed defensively.

pub mod cache;
pub mod config;
pub mod domain;
pub mod generator;
pub mod llm;
pub mod orchestrator;
pub mod parse;
pub mod pipeline;
pub mod records;
pub mod telemetry;
pub mod templates;
pub mod util;
pub mod validator;

pub use crate::config::{load_pipeline_config, PipelineConfig};
pub use crate::domain::{Candidate, Review, Status, ValidationOutcome, Verdict};
pub use crate::generator::{GenerationError, ProblemDraft, ProblemGenerator, Reviser};
pub use crate::llm::{BackendError, GenerationRequest, GenerationResponse, OllamaClient, TextGenerationClient};
pub use crate::orchestrator::{Orchestrator, ReviewBudget, ReviewSummary};
pub use crate::pipeline::{Pipeline, PipelineError};
pub use crate::validator::{Critic, Validator};
