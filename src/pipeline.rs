//! Pipeline wiring: config, backend client, cache, generator, validator, orchestrator,
//! templates and the record store.
//!
//! This module owns:
//!   - the template store (selection state behind a mutex)
//!   - the shared variation cache (through the generator)
//!   - the review budget derived from config
//!
//! One review is one task owning one `Candidate`. Batches spawn those tasks on a `JoinSet`;
//! the cache is the only thing they share on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::cache::{CacheError, VariationCache};
use crate::config::PipelineConfig;
use crate::domain::{CacheEntry, Candidate, ProblemTemplate};
use crate::generator::{GenerationError, ProblemGenerator};
use crate::llm::{BackendError, OllamaClient, TextGenerationClient};
use crate::orchestrator::{Orchestrator, ReviewBudget, ReviewSummary};
use crate::records::{RecordError, RecordStore};
use crate::templates::TemplateStore;
use crate::validator::Validator;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("unknown template id: {0}")]
    UnknownTemplate(String),
    #[error("no templates available")]
    NoTemplates,
    #[error("review task failed: {0}")]
    Task(String),
}

/// A finished review: the summary, the candidate in its terminal state, and where it was saved.
#[derive(Debug)]
pub struct ReviewedCandidate {
    pub summary: ReviewSummary,
    pub candidate: Candidate,
    pub record_path: PathBuf,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub approved: Vec<ReviewSummary>,
    pub rejected: Vec<ReviewSummary>,
    /// Templates that never reached review (draft generation or storage failed).
    pub failed: Vec<(String, String)>,
}

pub struct Pipeline {
    generator: Arc<ProblemGenerator>,
    orchestrator: Orchestrator,
    templates: Mutex<TemplateStore>,
    records: RecordStore,
    budget: ReviewBudget,
}

impl Pipeline {
    /// Build the pipeline against the configured HTTP backend.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = OllamaClient::from_config(&cfg.backend)?;
        info!(target: "pipeline", endpoint = %client.endpoint(), model = %client.model_name(), "Backend configured");
        Self::with_client(cfg, Arc::new(client))
    }

    #[instrument(level = "info", skip_all)]
    pub fn with_client(cfg: &PipelineConfig, client: Arc<dyn TextGenerationClient>) -> Result<Self, PipelineError> {
        let cache = VariationCache::open(&cfg.paths.cache_dir)?;
        let records = RecordStore::open(&cfg.paths.records_dir)?;
        let templates = TemplateStore::load_dir(&cfg.paths.templates_dir);
        if templates.is_empty() {
            warn!(target: "pipeline", dir = %cfg.paths.templates_dir.display(), "No templates loaded");
        }

        let validator = Validator::new(client.clone(), cfg.prompts.clone(), &cfg.review);
        let generator = Arc::new(ProblemGenerator::new(client, cache, cfg));
        let orchestrator = Orchestrator::new(Arc::new(validator), generator.clone());
        let budget = ReviewBudget::from_config(&cfg.review);

        info!(
            target: "pipeline",
            templates = templates.len(),
            max_iterations = budget.max_iterations,
            per_iteration = ?budget.per_iteration_timeout,
            total = ?budget.total_timeout,
            "Pipeline ready"
        );

        Ok(Self {
            generator,
            orchestrator,
            templates: Mutex::new(templates),
            records,
            budget,
        })
    }

    pub fn budget(&self) -> &ReviewBudget {
        &self.budget
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub async fn template_count(&self) -> usize {
        self.templates.lock().await.len()
    }

    /// Template by id, or a random unused one.
    async fn select_template(&self, id: Option<&str>) -> Result<ProblemTemplate, PipelineError> {
        let mut store = self.templates.lock().await;
        match id {
            Some(id) => store
                .get(id)
                .cloned()
                .ok_or_else(|| PipelineError::UnknownTemplate(id.to_string())),
            None => store.pick("", None, true).ok_or(PipelineError::NoTemplates),
        }
    }

    /// Run the review loop on a candidate and persist the outcome.
    #[instrument(level = "info", skip(self, candidate), fields(id = %candidate.id))]
    pub async fn review_candidate(&self, mut candidate: Candidate) -> Result<ReviewedCandidate, PipelineError> {
        let summary = self.orchestrator.run_validation(&mut candidate, &self.budget).await;
        let record_path = self.records.save(&candidate)?;
        Ok(ReviewedCandidate { summary, candidate, record_path })
    }

    async fn review_from_template(&self, template: ProblemTemplate) -> Result<ReviewedCandidate, PipelineError> {
        let draft = self.generator.generate_problem(&template).await?;
        let candidate = Candidate::new(template.original_question, draft.problem, draft.solution);
        info!(target: "pipeline", template_id = %template.id, id = %candidate.id, "Draft ready for review");
        self.review_candidate(candidate).await
    }

    /// Draft a problem from one template (given or random) and review it.
    #[instrument(level = "info", skip(self))]
    pub async fn review_template(&self, template_id: Option<&str>) -> Result<ReviewedCandidate, PipelineError> {
        let template = self.select_template(template_id).await?;
        self.review_from_template(template).await
    }

    /// Review `count` distinct templates concurrently.
    #[instrument(level = "info", skip(self))]
    pub async fn review_batch(self: &Arc<Self>, count: usize) -> BatchReport {
        let mut chosen = Vec::with_capacity(count);
        {
            let mut store = self.templates.lock().await;
            for _ in 0..count {
                match store.pick("", None, true) {
                    Some(t) => chosen.push(t),
                    None => break,
                }
            }
        }

        let mut set = JoinSet::new();
        let mut task_templates = HashMap::with_capacity(chosen.len());
        for template in chosen {
            let pipeline = Arc::clone(self);
            let template_id = template.id.clone();
            let handle = set.spawn(async move { pipeline.review_from_template(template).await });
            task_templates.insert(handle.id(), template_id);
        }

        let mut report = BatchReport::default();
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, Ok(done))) if done.summary.approved => report.approved.push(done.summary),
                Ok((_, Ok(done))) => report.rejected.push(done.summary),
                Ok((task_id, Err(e))) => {
                    let template_id = task_templates.remove(&task_id).unwrap_or_default();
                    warn!(target: "pipeline", %template_id, error = %e, "Template never reached review");
                    report.failed.push((template_id, e.to_string()));
                }
                Err(e) => {
                    let template_id = task_templates.remove(&e.id()).unwrap_or_default();
                    error!(target: "pipeline", %template_id, error = %e, "Review task panicked or was cancelled");
                    report.failed.push((template_id, PipelineError::Task(e.to_string()).to_string()));
                }
            }
        }

        info!(
            target: "pipeline",
            approved = report.approved.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Batch finished"
        );
        report
    }

    /// Cached variation `index` of a template's question.
    pub async fn variation(&self, template_id: Option<&str>, index: u32) -> Result<(ProblemTemplate, CacheEntry), PipelineError> {
        let template = self.select_template(template_id).await?;
        let entry = self.generator.generate_variation(&template.original_question, index).await?;
        Ok((template, entry))
    }
}
