mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{RoutingClient, GRADE_TOO_EASY};
use mathtutor::config::PipelineConfig;
use mathtutor::domain::{Status, ValidationOutcome};
use mathtutor::pipeline::{Pipeline, PipelineError};
use mathtutor::validator::{Critic, Validator};

fn config(root: &Path) -> PipelineConfig {
  let mut cfg = PipelineConfig::default();
  cfg.paths.templates_dir = root.join("problems");
  cfg.paths.cache_dir = root.join("cache");
  cfg.paths.records_dir = root.join("records");
  cfg
}

fn write_template(root: &Path, id: &str, question: &str) {
  let dir = root.join("problems");
  fs::create_dir_all(&dir).expect("mkdir");
  let body = serde_json::json!({
    "id": id,
    "original_question": question,
    "type": "integer_multiplication",
    "difficulty": "easy",
    "solution": "Multiply the quantity by the price.",
  });
  fs::write(dir.join(format!("{id}.json")), serde_json::to_vec_pretty(&body).expect("json")).expect("write");
}

const QUESTION: &str = "Riya buys 3 pens at 12 rupees each. How much does she pay?";

#[tokio::test]
async fn empty_problem_never_reaches_the_backend() {
  let client = Arc::new(RoutingClient::new());
  let validator = Validator::new(client.clone(), Default::default(), &Default::default());
  let v = validator.validate("", "ok", 0, None).await;
  assert!(!v.is_valid);
  assert_eq!(v.outcome, ValidationOutcome::Incomplete);
  assert_eq!(v.feedback, "Problem or solution is empty");
  assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn template_review_is_approved_and_persisted() {
  let root = tempfile::tempdir().expect("tempdir");
  write_template(root.path(), "pens", QUESTION);
  let client = Arc::new(RoutingClient::new());
  let pipeline = Pipeline::with_client(&config(root.path()), client.clone()).expect("pipeline");

  let done = pipeline.review_template(Some("pens")).await.expect("review");

  assert!(done.summary.approved);
  assert_eq!(done.candidate.status(), Status::Approved);
  assert_eq!(done.candidate.source_question, QUESTION);
  assert!(done.candidate.current_text.starts_with("Sam buys 5 notebooks"));
  // draft + grade + correctness + explanation
  assert_eq!(client.calls(), 4);

  let records = pipeline.records().load_all();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].status, Status::Approved);
  assert!(fs::read_to_string(&done.record_path).expect("read").ends_with('\n'));
}

#[tokio::test]
async fn rejected_review_is_revised_and_approved() {
  let root = tempfile::tempdir().expect("tempdir");
  write_template(root.path(), "pens", QUESTION);
  let client = Arc::new(RoutingClient::with_grade_replies(&[GRADE_TOO_EASY]));
  let pipeline = Pipeline::with_client(&config(root.path()), client).expect("pipeline");

  let done = pipeline.review_template(None).await.expect("review");

  assert_eq!(done.summary.status, Status::Approved);
  let reviews = done.candidate.reviews();
  assert_eq!(reviews.len(), 2);
  assert_eq!(reviews[0].outcome, ValidationOutcome::TooEasy);
  assert!(reviews[0].feedback.contains("two-digit prices"));
  assert!(reviews[1].is_valid);
}

#[tokio::test]
async fn unknown_template_is_an_error() {
  let root = tempfile::tempdir().expect("tempdir");
  write_template(root.path(), "pens", QUESTION);
  let pipeline = Pipeline::with_client(&config(root.path()), Arc::new(RoutingClient::new())).expect("pipeline");
  let err = pipeline.review_template(Some("nope")).await.expect_err("must fail");
  assert!(matches!(err, PipelineError::UnknownTemplate(ref id) if id == "nope"));
}

#[tokio::test]
async fn variation_is_cached_across_pipelines() {
  let root = tempfile::tempdir().expect("tempdir");
  write_template(root.path(), "pens", QUESTION);
  let cfg = config(root.path());

  let client = Arc::new(RoutingClient::new());
  let pipeline = Pipeline::with_client(&cfg, client.clone()).expect("pipeline");
  let (_, first) = pipeline.variation(Some("pens"), 0).await.expect("variation");
  assert_eq!(client.calls(), 1);

  let client = Arc::new(RoutingClient::new());
  let pipeline = Pipeline::with_client(&cfg, client.clone()).expect("pipeline");
  let (_, second) = pipeline.variation(Some("pens"), 0).await.expect("variation");
  assert_eq!(client.calls(), 0);
  assert_eq!(first, second);
}

#[tokio::test]
async fn batch_reviews_distinct_templates_concurrently() {
  let root = tempfile::tempdir().expect("tempdir");
  write_template(root.path(), "pens", QUESTION);
  write_template(root.path(), "mangoes", "A box holds 24 mangoes. How many mangoes are in 6 boxes?");
  write_template(root.path(), "tickets", "A ticket costs 45 rupees. What do 4 tickets cost?");
  let pipeline = Arc::new(Pipeline::with_client(&config(root.path()), Arc::new(RoutingClient::new())).expect("pipeline"));

  let report = pipeline.review_batch(5).await;

  assert_eq!(report.approved.len(), 3);
  assert!(report.rejected.is_empty());
  assert!(report.failed.is_empty());
  let mut ids: Vec<_> = report.approved.iter().map(|s| s.candidate_id.clone()).collect();
  ids.sort();
  ids.dedup();
  assert_eq!(ids.len(), 3);
  assert_eq!(pipeline.records().load_all().len(), 3);
}

#[tokio::test]
async fn crashed_batch_task_names_its_template() {
  let root = tempfile::tempdir().expect("tempdir");
  write_template(root.path(), "pens", QUESTION);
  write_template(root.path(), "mangoes", "A box holds 24 mangoes. How many mangoes are in 6 boxes?");
  let client = Arc::new(RoutingClient::panicking_on("mangoes"));
  let pipeline = Arc::new(Pipeline::with_client(&config(root.path()), client).expect("pipeline"));

  let report = pipeline.review_batch(2).await;

  assert_eq!(report.approved.len(), 1);
  assert_eq!(report.failed.len(), 1);
  let (template_id, reason) = &report.failed[0];
  assert_eq!(template_id, "mangoes");
  assert!(reason.contains("panicked"), "reason: {reason}");
}
