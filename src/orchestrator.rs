//! Bounded review/revise loop over a single candidate.
//!
//! The deadline is computed once at loop entry. Every awaited step (validation, revision) is
//! wrapped in `tokio::time::timeout` with `min(per_iteration_timeout, remaining)`, so a run
//! overshoots its total budget by at most scheduling noise. The candidate always leaves in a
//! terminal status.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{info, instrument, warn};

use crate::config::ReviewConfig;
use crate::domain::{Candidate, Status, ValidationOutcome, Verdict};
use crate::generator::Reviser;
use crate::validator::Critic;

pub const APPROVED_FEEDBACK: &str = "Problem validated successfully!";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReviewBudget {
  pub max_iterations: usize,
  pub per_iteration_timeout: Duration,
  pub total_timeout: Duration,
}

impl ReviewBudget {
  pub fn from_config(review: &ReviewConfig) -> Self {
    Self {
      max_iterations: review.max_iterations,
      per_iteration_timeout: review.iteration_timeout(),
      total_timeout: review.total_timeout(),
    }
  }
}

/// What a finished run reports back. `status` is always terminal.
#[derive(Clone, Debug)]
pub struct ReviewSummary {
  pub candidate_id: String,
  pub status: Status,
  pub approved: bool,
  pub feedback: String,
  /// Reviews recorded during this run.
  pub iterations: usize,
  pub elapsed: Duration,
}

pub struct Orchestrator {
  critic: Arc<dyn Critic>,
  reviser: Arc<dyn Reviser>,
}

fn time_left(deadline: Option<Instant>) -> Duration {
  deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()))
}

impl Orchestrator {
  pub fn new(critic: Arc<dyn Critic>, reviser: Arc<dyn Reviser>) -> Self {
    Self { critic, reviser }
  }

  #[instrument(level = "info", skip(self, candidate, budget), fields(id = %candidate.id, max_iterations = budget.max_iterations))]
  pub async fn run_validation(&self, candidate: &mut Candidate, budget: &ReviewBudget) -> ReviewSummary {
    let start = Instant::now();
    let reviews_before = candidate.reviews().len();
    let finish = |candidate: &Candidate, feedback: String| {
      let summary = ReviewSummary {
        candidate_id: candidate.id.clone(),
        status: candidate.status(),
        approved: candidate.status() == Status::Approved,
        feedback,
        iterations: candidate.reviews().len() - reviews_before,
        elapsed: start.elapsed(),
      };
      info!(target: "review", id = %summary.candidate_id, status = %summary.status, iterations = summary.iterations, elapsed = ?summary.elapsed, "Review finished");
      summary
    };

    if candidate.is_terminal() {
      let feedback = candidate.last_review().map(|r| r.feedback.clone()).unwrap_or_default();
      return finish(candidate, feedback);
    }

    candidate.begin();
    // None when the budget is too large to represent; the run is then only bounded by iterations.
    let deadline = start.checked_add(budget.total_timeout);
    let ceiling = budget.max_iterations;
    let mut iteration = 0;

    while iteration < ceiling {
      let remaining = time_left(deadline);
      if remaining.is_zero() {
        break;
      }
      let step = budget.per_iteration_timeout.min(remaining);

      let validation = self.critic.validate(
        &candidate.current_text,
        &candidate.current_solution,
        iteration,
        Some(&candidate.source_question),
      );
      let verdict = match timeout(step, validation).await {
        Ok(v) => v,
        Err(_) => {
          let feedback = format!("Validation timed out after {:.1}s", step.as_secs_f64());
          warn!(target: "review", id = %candidate.id, iteration, "Validation timed out");
          candidate.record_terminal_failure(Verdict::invalid(ValidationOutcome::InvalidFormat, feedback.clone()), iteration);
          return finish(candidate, feedback);
        }
      };

      let feedback = verdict.feedback.clone();
      let status = candidate.record_review(verdict, iteration, ceiling);
      info!(target: "review", id = %candidate.id, iteration, %status, "Review recorded");
      match status {
        Status::Approved => return finish(candidate, APPROVED_FEEDBACK.to_string()),
        Status::Rejected => break,
        Status::Pending | Status::NeedsRevision => {}
      }

      let remaining = time_left(deadline);
      if remaining.is_zero() {
        break;
      }
      let step = budget.per_iteration_timeout.min(remaining);
      match timeout(step, self.reviser.revise(candidate, &feedback)).await {
        Ok(Ok(draft)) => candidate.apply_revision(draft.problem, draft.solution),
        Ok(Err(e)) => {
          warn!(target: "review", id = %candidate.id, iteration, error = %e, "Revision failed");
          candidate.reject();
          return finish(candidate, format!("Revision failed: {e}"));
        }
        Err(_) => {
          warn!(target: "review", id = %candidate.id, iteration, "Revision timed out");
          candidate.reject();
          return finish(candidate, format!("Revision timed out after {:.1}s", step.as_secs_f64()));
        }
      }

      iteration += 1;
    }

    candidate.reject();
    let last = candidate
      .last_review()
      .map(|r| r.feedback.clone())
      .unwrap_or_else(|| "no review completed".to_string());
    finish(candidate, format!("Maximum iterations or time limit reached: {last}"))
  }
}
