//! Domain models used by the pipeline: candidates under review, their reviews,
//! validation outcomes, cache entries and problem templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a candidate. `Approved` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
  Pending,
  NeedsRevision,
  Approved,
  Rejected,
}

impl Default for Status {
  fn default() -> Self { Status::Pending }
}

impl Status {
  pub fn is_terminal(self) -> bool {
    matches!(self, Status::Approved | Status::Rejected)
  }

  /// The only place where a review result turns into a status.
  ///
  /// `reviews_so_far` includes the review that was just appended.
  pub fn after_review(is_valid: bool, reviews_so_far: usize, ceiling: usize) -> Status {
    if is_valid {
      Status::Approved
    } else if reviews_so_far < ceiling {
      Status::NeedsRevision
    } else {
      Status::Rejected
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Status::Pending => "pending",
      Status::NeedsRevision => "needs_revision",
      Status::Approved => "approved",
      Status::Rejected => "rejected",
    }
  }
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Classification a validator assigns to a single validation attempt.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
  Valid,
  TooEasy,
  TooHard,
  Ambiguous,
  Incomplete,
  InvalidFormat,
}

impl ValidationOutcome {
  pub fn as_str(self) -> &'static str {
    match self {
      ValidationOutcome::Valid => "valid",
      ValidationOutcome::TooEasy => "too_easy",
      ValidationOutcome::TooHard => "too_hard",
      ValidationOutcome::Ambiguous => "ambiguous",
      ValidationOutcome::Incomplete => "incomplete",
      ValidationOutcome::InvalidFormat => "invalid_format",
    }
  }
}

impl std::fmt::Display for ValidationOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result of one validation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
  pub is_valid: bool,
  pub outcome: ValidationOutcome,
  pub feedback: String,
}

impl Verdict {
  pub fn valid(feedback: impl Into<String>) -> Self {
    Self { is_valid: true, outcome: ValidationOutcome::Valid, feedback: feedback.into() }
  }

  pub fn invalid(outcome: ValidationOutcome, feedback: impl Into<String>) -> Self {
    Self { is_valid: false, outcome, feedback: feedback.into() }
  }
}

/// One immutable entry of a candidate's review history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Review {
  pub text_at_review: String,
  pub solution_at_review: String,
  pub feedback: String,
  pub is_valid: bool,
  pub outcome: ValidationOutcome,
  pub iteration: usize,
  pub timestamp: DateTime<Utc>,
}

impl Review {
  fn from_verdict(candidate: &Candidate, verdict: Verdict, iteration: usize) -> Self {
    Self {
      text_at_review: candidate.current_text.clone(),
      solution_at_review: candidate.current_solution.clone(),
      feedback: verdict.feedback,
      is_valid: verdict.is_valid,
      outcome: verdict.outcome,
      iteration,
      timestamp: Utc::now(),
    }
  }
}

/// A problem+solution pair under review.
///
/// Owned by exactly one orchestrator run at a time. Text fields change only on
/// revision; the review history only grows.
#[derive(Clone, Debug)]
pub struct Candidate {
  pub id: String,
  pub source_question: String,
  pub current_text: String,
  pub current_solution: String,
  status: Status,
  review_history: Vec<Review>,
}

impl Candidate {
  pub fn new(source_question: impl Into<String>, text: impl Into<String>, solution: impl Into<String>) -> Self {
    Self {
      id: format!("prob_{}", Uuid::new_v4().simple()),
      source_question: source_question.into(),
      current_text: text.into(),
      current_solution: solution.into(),
      status: Status::Pending,
      review_history: Vec::new(),
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = id.into();
    self
  }

  pub fn status(&self) -> Status { self.status }

  pub fn is_terminal(&self) -> bool { self.status.is_terminal() }

  pub fn reviews(&self) -> &[Review] { &self.review_history }

  pub fn last_review(&self) -> Option<&Review> { self.review_history.last() }

  /// Append the review for `iteration` and derive the next status.
  pub(crate) fn record_review(&mut self, verdict: Verdict, iteration: usize, ceiling: usize) -> Status {
    debug_assert!(!self.is_terminal(), "terminal candidates are immutable");
    let review = Review::from_verdict(self, verdict, iteration);
    let is_valid = review.is_valid;
    self.review_history.push(review);
    self.status = Status::after_review(is_valid, self.review_history.len(), ceiling);
    self.status
  }

  /// Append a review that forces rejection regardless of the ceiling (timeouts).
  pub(crate) fn record_terminal_failure(&mut self, verdict: Verdict, iteration: usize) {
    debug_assert!(!self.is_terminal(), "terminal candidates are immutable");
    let review = Review::from_verdict(self, verdict, iteration);
    self.review_history.push(review);
    self.status = Status::Rejected;
  }

  pub(crate) fn apply_revision(&mut self, text: String, solution: String) {
    debug_assert!(!self.is_terminal(), "terminal candidates are immutable");
    self.current_text = text;
    self.current_solution = solution;
  }

  pub(crate) fn begin(&mut self) {
    if !self.is_terminal() {
      self.status = Status::Pending;
    }
  }

  pub(crate) fn reject(&mut self) {
    if !self.is_terminal() {
      self.status = Status::Rejected;
    }
  }

  /// Rebuild a candidate from its persisted form.
  pub(crate) fn restore(
    id: String,
    source_question: String,
    text: String,
    solution: String,
    status: Status,
    review_history: Vec<Review>,
  ) -> Self {
    Self { id, source_question, current_text: text, current_solution: solution, status, review_history }
  }
}

/// A memoized variation produced by the backend for one (source, index) pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub variation_text: String,
  pub explanation: String,
  pub generated_at: DateTime<Utc>,
}

/// Problem template as stored on disk, one JSON file per template.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemTemplate {
  pub id: String,
  pub original_question: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub difficulty: String,
  pub solution: String,
  #[serde(default)] pub category: Option<String>,
  #[serde(default)] pub variations: Vec<TemplateVariation>,
}

/// Example variation shipped inside a template file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateVariation {
  pub text: String,
  #[serde(default)] pub explanation: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transition_rule_covers_every_case() {
    assert_eq!(Status::after_review(true, 1, 3), Status::Approved);
    assert_eq!(Status::after_review(true, 3, 3), Status::Approved);
    assert_eq!(Status::after_review(false, 1, 3), Status::NeedsRevision);
    assert_eq!(Status::after_review(false, 3, 3), Status::Rejected);
    assert_eq!(Status::after_review(false, 4, 3), Status::Rejected);
  }

  #[test]
  fn record_review_snapshots_current_text() {
    let mut c = Candidate::new("orig", "text v1", "sol v1");
    let status = c.record_review(Verdict::invalid(ValidationOutcome::TooEasy, "too easy"), 0, 2);
    assert_eq!(status, Status::NeedsRevision);

    c.apply_revision("text v2".into(), "sol v2".into());
    let status = c.record_review(Verdict::valid("Problem is valid"), 1, 2);
    assert_eq!(status, Status::Approved);
    assert!(c.is_terminal());

    let reviews = c.reviews();
    assert_eq!(reviews[0].text_at_review, "text v1");
    assert_eq!(reviews[1].text_at_review, "text v2");
    assert_eq!(reviews[1].iteration, 1);
  }

  #[test]
  fn outcomes_serialize_snake_case() {
    let s = serde_json::to_string(&ValidationOutcome::InvalidFormat).expect("serialize");
    assert_eq!(s, "\"invalid_format\"");
    let st: Status = serde_json::from_str("\"needs_revision\"").expect("deserialize");
    assert_eq!(st, Status::NeedsRevision);
  }

  #[test]
  fn template_requires_solution_field() {
    let missing = r#"{"id":"t1","original_question":"What is 2+2?","type":"integer","difficulty":"easy"}"#;
    assert!(serde_json::from_str::<ProblemTemplate>(missing).is_err());
    let ok = r#"{"id":"t1","original_question":"What is 2+2?","type":"integer","difficulty":"easy","solution":"4"}"#;
    let t: ProblemTemplate = serde_json::from_str(ok).expect("template");
    assert_eq!(t.kind, "integer");
    assert!(t.variations.is_empty());
  }
}
