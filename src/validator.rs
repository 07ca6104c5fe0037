//! The critic side of the review loop.
//!
//! A fixed sequence of checks, short-circuiting on the first failure:
//!   1. structure (local),
//!   2. grade appropriateness (local keyword lists, consistency with the original, then the backend),
//!   3. mathematical correctness (backend),
//!   4. explanation quality (backend, fails open).
//!
//! Nothing here returns an error: backend and parse failures become an `InvalidFormat` verdict
//! carrying a readable reason.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, instrument, warn};

use crate::config::{Prompts, ReviewConfig};
use crate::domain::{ValidationOutcome, Verdict};
use crate::llm::{GenerationRequest, TextGenerationClient};
use crate::parse::{generate_structured, Structured};
use crate::util::{count_part_labels, fill_template, has_symbolic_variable, word_count};

/// Concepts that do not belong in problems for grades below 8.
const ADVANCED_TOPICS: &[&str] = &[
  "quadratic",
  "polynomial",
  "trigonometry",
  "calculus",
  "theorem",
  "derivative",
  "integral",
  "logarithm",
];

/// Phrases that mark a problem as too basic for grades above 7.
const SIMPLE_INDICATORS: &[&str] = &["what is 1+1", "basic addition", "counting"];

const CHECK_TEMPERATURE: f32 = 0.2;
const CHECK_MAX_TOKENS: u32 = 500;

/// Anything that can judge a problem+solution pair.
#[async_trait]
pub trait Critic: Send + Sync {
  /// `iteration` is 0 for the first review of a candidate; `original` is the template text
  /// the candidate was derived from, when known.
  async fn validate(&self, problem: &str, solution: &str, iteration: usize, original: Option<&str>) -> Verdict;
}

// --- Schema records ---

#[derive(Debug, Deserialize)]
pub struct GradeAssessment {
  pub is_appropriate: bool,
  #[serde(default)] pub feedback: String,
  #[serde(default)] pub difficulty: Option<String>,
  #[serde(default)] pub suggestions: Vec<String>,
}
impl Structured for GradeAssessment {}

#[derive(Debug, Deserialize)]
pub struct CorrectnessVerdict {
  pub is_correct: bool,
  #[serde(default)] pub feedback: String,
  #[serde(default, deserialize_with = "loose_text")] pub correct_answer: Option<String>,
  #[serde(default)] pub suggestions: Vec<String>,
}
impl Structured for CorrectnessVerdict {}

#[derive(Debug, Deserialize)]
pub struct ExplanationVerdict {
  pub is_quality: bool,
  #[serde(default)] pub feedback: String,
  #[serde(default)] pub missing_elements: Vec<String>,
}
impl Structured for ExplanationVerdict {}

/// Models answer `"correct_answer": 42` as often as `"42"`; keep either as text.
fn loose_text<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Option::<serde_json::Value>::deserialize(d)?;
  Ok(match v {
    None | Some(serde_json::Value::Null) => None,
    Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
    Some(serde_json::Value::String(s)) => Some(s),
    Some(other) => Some(other.to_string()),
  })
}

fn with_suggestions(feedback: &str, suggestions: &[String]) -> String {
  let mut out = feedback.trim().to_string();
  if !suggestions.is_empty() {
    if !out.is_empty() {
      out.push(' ');
    }
    out.push_str("Suggestions: ");
    out.push_str(&suggestions.join("; "));
  }
  out
}

fn difficulty_outcome(difficulty: Option<&str>) -> ValidationOutcome {
  match difficulty.map(|d| d.trim().to_ascii_lowercase()).as_deref() {
    Some("too_easy") => ValidationOutcome::TooEasy,
    Some("too_difficult") | Some("too_hard") => ValidationOutcome::TooHard,
    _ => ValidationOutcome::Ambiguous,
  }
}

/// Backend-backed `Critic`.
pub struct Validator {
  client: Arc<dyn TextGenerationClient>,
  prompts: Prompts,
  grade_level: u8,
  min_solution_words: usize,
}

impl Validator {
  pub fn new(client: Arc<dyn TextGenerationClient>, prompts: Prompts, review: &ReviewConfig) -> Self {
    Self {
      client,
      prompts,
      grade_level: review.grade_level,
      min_solution_words: review.min_solution_words,
    }
  }

  pub fn grade_level(&self) -> u8 { self.grade_level }

  fn request(&self, system: &str, user: String) -> GenerationRequest {
    let system = fill_template(system, &[("grade", &self.grade_level.to_string())]);
    GenerationRequest::new(system, user)
      .temperature(CHECK_TEMPERATURE)
      .max_output_tokens(CHECK_MAX_TOKENS)
  }

  /// Step 1: no backend involved.
  pub fn check_structure(&self, problem: &str, solution: &str) -> Option<Verdict> {
    if problem.trim().is_empty() || solution.trim().is_empty() {
      return Some(Verdict::invalid(ValidationOutcome::Incomplete, "Problem or solution is empty"));
    }
    if word_count(solution) < self.min_solution_words {
      return Some(Verdict::invalid(ValidationOutcome::Incomplete, "Solution is too brief"));
    }
    None
  }

  /// Local part of step 2: keyword lists and consistency with the original.
  pub fn check_grade_rules(&self, problem: &str, original: Option<&str>) -> Option<Verdict> {
    let lower = problem.to_lowercase();
    if self.grade_level < 8 {
      if let Some(topic) = ADVANCED_TOPICS.iter().find(|t| lower.contains(*t)) {
        debug!(target: "review", %topic, "Advanced concept found");
        return Some(Verdict::invalid(
          ValidationOutcome::TooHard,
          format!("Problem contains concepts too advanced for grade {} ({topic}).", self.grade_level),
        ));
      }
    }
    if self.grade_level > 7 && SIMPLE_INDICATORS.iter().any(|s| lower.contains(s)) {
      return Some(Verdict::invalid(ValidationOutcome::TooEasy, "Problem is too basic for this grade level."));
    }

    let original = original?;
    let (want, got) = (count_part_labels(original), count_part_labels(problem));
    if want != got {
      return Some(Verdict::invalid(
        ValidationOutcome::Incomplete,
        format!("The original problem has {want} labelled parts but the variation has {got}; keep the same parts."),
      ));
    }
    let (want, got) = (has_symbolic_variable(original), has_symbolic_variable(problem));
    if want != got {
      let msg = if want {
        "The original problem is stated with a symbolic variable; the variation must use one too."
      } else {
        "The original problem uses no symbolic variables; the variation must not introduce any."
      };
      return Some(Verdict::invalid(ValidationOutcome::Ambiguous, msg));
    }
    None
  }

  /// Backend part of step 2. Iteration 0 only flags major issues.
  async fn check_grade_detailed(&self, problem: &str, iteration: usize) -> Option<Verdict> {
    let template = if iteration == 0 {
      &self.prompts.grade_lenient_template
    } else {
      &self.prompts.grade_strict_template
    };
    let grade = self.grade_level.to_string();
    let user = fill_template(template, &[("grade", &grade), ("problem", problem)]);
    let request = self.request(&self.prompts.grade_system, user);

    match generate_structured::<GradeAssessment>(self.client.as_ref(), request).await {
      Ok(a) if a.is_appropriate => None,
      Ok(a) => {
        let outcome = difficulty_outcome(a.difficulty.as_deref());
        let mut feedback = with_suggestions(&a.feedback, &a.suggestions);
        if feedback.is_empty() {
          feedback = format!("Problem is not appropriate for grade {}.", self.grade_level);
        }
        Some(Verdict::invalid(outcome, feedback))
      }
      Err(e) => {
        warn!(target: "review", error = %e, "Grade check failed");
        Some(Verdict::invalid(ValidationOutcome::InvalidFormat, format!("Grade-level check failed: {e}")))
      }
    }
  }

  /// Step 3.
  async fn check_correctness(&self, problem: &str, solution: &str) -> Option<Verdict> {
    let user = fill_template(&self.prompts.correctness_user_template, &[("problem", problem), ("solution", solution)]);
    let request = self.request(&self.prompts.correctness_system, user);

    match generate_structured::<CorrectnessVerdict>(self.client.as_ref(), request).await {
      Ok(v) if v.is_correct => None,
      Ok(v) => {
        let mut feedback = with_suggestions(&v.feedback, &v.suggestions);
        if feedback.is_empty() {
          feedback = "The solution is not mathematically correct.".into();
        }
        if let Some(answer) = v.correct_answer {
          feedback.push_str(&format!(" Correct answer: {answer}"));
        }
        Some(Verdict::invalid(ValidationOutcome::Incomplete, feedback))
      }
      Err(e) => {
        warn!(target: "review", error = %e, "Correctness check failed");
        Some(Verdict::invalid(ValidationOutcome::InvalidFormat, format!("Correctness check failed: {e}")))
      }
    }
  }

  /// Step 4. An unusable backend answer lets the candidate through.
  async fn check_explanation(&self, solution: &str) -> Option<Verdict> {
    let grade = self.grade_level.to_string();
    let user = fill_template(&self.prompts.explanation_user_template, &[("grade", &grade), ("solution", solution)]);
    let request = self.request(&self.prompts.explanation_system, user);

    match generate_structured::<ExplanationVerdict>(self.client.as_ref(), request).await {
      Ok(v) if v.is_quality => None,
      Ok(v) => {
        let mut feedback = v.feedback.trim().to_string();
        if feedback.is_empty() {
          feedback = "The explanation needs improvement.".into();
        }
        if !v.missing_elements.is_empty() {
          feedback.push_str(&format!(" Missing: {}", v.missing_elements.join(", ")));
        }
        Some(Verdict::invalid(ValidationOutcome::Incomplete, feedback))
      }
      Err(e) => {
        warn!(target: "review", error = %e, "Explanation check unavailable; passing");
        None
      }
    }
  }
}

#[async_trait]
impl Critic for Validator {
  #[instrument(level = "info", skip(self, problem, solution, original), fields(problem_len = problem.len(), solution_len = solution.len()))]
  async fn validate(&self, problem: &str, solution: &str, iteration: usize, original: Option<&str>) -> Verdict {
    if let Some(v) = self.check_structure(problem, solution) {
      info!(target: "review", outcome = %v.outcome, "Structural check failed");
      return v;
    }
    if let Some(v) = self.check_grade_rules(problem, original) {
      info!(target: "review", outcome = %v.outcome, "Grade rules failed");
      return v;
    }
    if let Some(v) = self.check_grade_detailed(problem, iteration).await {
      info!(target: "review", outcome = %v.outcome, "Grade check failed");
      return v;
    }
    if let Some(v) = self.check_correctness(problem, solution).await {
      info!(target: "review", outcome = %v.outcome, "Correctness check failed");
      return v;
    }
    if let Some(v) = self.check_explanation(solution).await {
      info!(target: "review", outcome = %v.outcome, "Explanation check failed");
      return v;
    }
    info!(target: "review", "Problem passed all checks");
    Verdict::valid("Problem is valid")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::llm::scripted::{ScriptedClient, Step};

  const PROBLEM: &str = "A car travels 280 km on 20 liters of petrol. How far can it travel on 35 liters?";
  const SOLUTION: &str = "Distance per liter is 280 / 20 = 14 km. So on 35 liters it travels 14 * 35 = 490 km.";

  const GRADE_OK: &str = r#"{"is_appropriate": true, "feedback": "fine", "difficulty": "appropriate", "suggestions": []}"#;
  const CORRECT: &str = r#"{"is_correct": true, "feedback": "ok", "correct_answer": null, "suggestions": []}"#;
  const GOOD_EXPLANATION: &str = r#"{"is_quality": true, "feedback": "clear", "missing_elements": []}"#;

  fn validator(client: Arc<ScriptedClient>) -> Validator {
    Validator::new(client, Prompts::default(), &ReviewConfig::default())
  }

  #[tokio::test]
  async fn empty_problem_is_incomplete_without_backend() {
    let client = Arc::new(ScriptedClient::default());
    let v = validator(client.clone()).validate("", "ok", 0, None).await;
    assert_eq!(v, Verdict::invalid(ValidationOutcome::Incomplete, "Problem or solution is empty"));
    assert_eq!(client.calls(), 0);
  }

  #[tokio::test]
  async fn brief_solution_is_incomplete() {
    let client = Arc::new(ScriptedClient::default());
    let v = validator(client.clone()).validate(PROBLEM, "490 km", 0, None).await;
    assert_eq!(v.outcome, ValidationOutcome::Incomplete);
    assert_eq!(v.feedback, "Solution is too brief");
    assert_eq!(client.calls(), 0);
  }

  #[tokio::test]
  async fn advanced_topic_is_too_hard_for_grade_seven() {
    let client = Arc::new(ScriptedClient::default());
    let v = validator(client)
      .validate("Solve the quadratic equation x^2 - 5x + 6 = 0.", SOLUTION, 0, None)
      .await;
    assert_eq!(v.outcome, ValidationOutcome::TooHard);
    assert!(v.feedback.contains("too advanced for grade 7"));
  }

  #[tokio::test]
  async fn basic_problem_is_too_easy_above_grade_seven() {
    let client = Arc::new(ScriptedClient::default());
    let review = ReviewConfig { grade_level: 9, ..ReviewConfig::default() };
    let v = Validator::new(client, Prompts::default(), &review)
      .validate("What is 1+1 in basic addition?", SOLUTION, 0, None)
      .await;
    assert_eq!(v, Verdict::invalid(ValidationOutcome::TooEasy, "Problem is too basic for this grade level."));
  }

  #[tokio::test]
  async fn part_count_and_variable_mismatches_are_caught() {
    let client = Arc::new(ScriptedClient::default());
    let val = validator(client.clone());
    let original = "A bag has 12 balls.\n(i) How many are red?\n(ii) How many are blue?";
    let v = val.validate("A box has 15 pens. How many are black?", SOLUTION, 0, Some(original)).await;
    assert_eq!(v.outcome, ValidationOutcome::Incomplete);

    let v = val.validate("Solve for x: 3x + 2 = 11. What is x?", SOLUTION, 0, Some(PROBLEM)).await;
    assert_eq!(v.outcome, ValidationOutcome::Ambiguous);
    assert_eq!(client.calls(), 0);
  }

  #[tokio::test]
  async fn all_checks_pass() {
    let client = Arc::new(ScriptedClient::replies(&[GRADE_OK, CORRECT, GOOD_EXPLANATION]));
    let v = validator(client.clone()).validate(PROBLEM, SOLUTION, 0, Some(PROBLEM)).await;
    assert_eq!(v, Verdict::valid("Problem is valid"));
    assert_eq!(client.calls(), 3);
  }

  #[tokio::test]
  async fn rubric_depends_on_iteration() {
    let client = Arc::new(ScriptedClient::replies(&[GRADE_OK, CORRECT, GOOD_EXPLANATION, GRADE_OK, CORRECT, GOOD_EXPLANATION]));
    let val = validator(client.clone());
    val.validate(PROBLEM, SOLUTION, 0, None).await;
    val.validate(PROBLEM, SOLUTION, 1, None).await;
    assert!(client.prompt(0).contains("Only flag MAJOR issues"));
    assert!(client.prompt(3).contains("Apply the full rubric"));
  }

  #[tokio::test]
  async fn difficulty_maps_to_outcome() {
    let too_easy = r#"```json
{"is_appropriate": false, "feedback": "Too simple.", "difficulty": "too_easy", "suggestions": ["use larger numbers"]}
```"#;
    let client = Arc::new(ScriptedClient::replies(&[too_easy]));
    let v = validator(client).validate(PROBLEM, SOLUTION, 0, None).await;
    assert_eq!(v.outcome, ValidationOutcome::TooEasy);
    assert!(v.feedback.contains("use larger numbers"));

    let unclear = r#"{"is_appropriate": false, "feedback": "Unclear units.", "difficulty": "appropriate"}"#;
    let client = Arc::new(ScriptedClient::replies(&[unclear]));
    let v = validator(client).validate(PROBLEM, SOLUTION, 0, None).await;
    assert_eq!(v.outcome, ValidationOutcome::Ambiguous);
  }

  #[tokio::test]
  async fn wrong_answer_carries_the_hint() {
    let wrong = r#"{"is_correct": false, "feedback": "Multiplication error.", "correct_answer": 490, "suggestions": []}"#;
    let client = Arc::new(ScriptedClient::replies(&[GRADE_OK, wrong]));
    let v = validator(client).validate(PROBLEM, SOLUTION, 1, None).await;
    assert_eq!(v.outcome, ValidationOutcome::Incomplete);
    assert!(v.feedback.contains("Multiplication error."));
    assert!(v.feedback.contains("Correct answer: 490"));
  }

  #[tokio::test]
  async fn backend_failure_in_grade_check_is_invalid_format() {
    let client = Arc::new(ScriptedClient::new(vec![Step::Fail]));
    let v = validator(client).validate(PROBLEM, SOLUTION, 0, None).await;
    assert_eq!(v.outcome, ValidationOutcome::InvalidFormat);
    assert!(v.feedback.starts_with("Grade-level check failed"));
  }

  #[tokio::test]
  async fn unparseable_correctness_reply_is_invalid_format() {
    let client = Arc::new(ScriptedClient::replies(&[GRADE_OK, "I think it's right!"]));
    let v = validator(client).validate(PROBLEM, SOLUTION, 0, None).await;
    assert_eq!(v.outcome, ValidationOutcome::InvalidFormat);
  }

  #[tokio::test]
  async fn explanation_check_fails_open() {
    let client = Arc::new(ScriptedClient::new(vec![
      Step::Reply(GRADE_OK.into()),
      Step::Reply(CORRECT.into()),
      Step::Fail,
    ]));
    let v = validator(client).validate(PROBLEM, SOLUTION, 0, None).await;
    assert!(v.is_valid);
  }

  #[tokio::test]
  async fn poor_explanation_is_incomplete() {
    let poor = r#"{"is_quality": false, "feedback": "Skips steps.", "missing_elements": ["units"]}"#;
    let client = Arc::new(ScriptedClient::replies(&[GRADE_OK, CORRECT, poor]));
    let v = validator(client).validate(PROBLEM, SOLUTION, 0, None).await;
    assert_eq!(v.outcome, ValidationOutcome::Incomplete);
    assert_eq!(v.feedback, "Skips steps. Missing: units");
  }
}
