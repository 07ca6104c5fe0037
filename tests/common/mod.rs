#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use mathtutor::domain::{Candidate, ValidationOutcome, Verdict};
use mathtutor::generator::{GenerationError, ProblemDraft, Reviser};
use mathtutor::llm::{BackendError, GenerationRequest, GenerationResponse, TextGenerationClient};
use mathtutor::validator::Critic;

/// Critic that hands out queued verdicts, then keeps saying "ambiguous".
pub struct ScriptedCritic {
  verdicts: Mutex<VecDeque<Verdict>>,
  delay: Duration,
  pub calls: AtomicUsize,
  pub iterations: Mutex<Vec<usize>>,
}

impl ScriptedCritic {
  pub fn new(verdicts: Vec<Verdict>) -> Self {
    Self::slow(verdicts, Duration::ZERO)
  }

  pub fn slow(verdicts: Vec<Verdict>, delay: Duration) -> Self {
    Self { verdicts: Mutex::new(verdicts.into()), delay, calls: AtomicUsize::new(0), iterations: Mutex::new(Vec::new()) }
  }

  pub fn always_invalid() -> Self {
    Self::new(Vec::new())
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Critic for ScriptedCritic {
  async fn validate(&self, _problem: &str, _solution: &str, iteration: usize, _original: Option<&str>) -> Verdict {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.iterations.lock().expect("lock").push(iteration);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    self
      .verdicts
      .lock()
      .expect("lock")
      .pop_front()
      .unwrap_or_else(|| Verdict::invalid(ValidationOutcome::Ambiguous, "The question is still unclear."))
  }
}

/// Reviser that numbers its revisions, or always fails.
pub struct ScriptedReviser {
  fail: bool,
  delay: Duration,
  pub calls: AtomicUsize,
}

impl ScriptedReviser {
  pub fn ok() -> Self {
    Self { fail: false, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
  }

  pub fn failing() -> Self {
    Self { fail: true, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
  }

  pub fn slow(delay: Duration) -> Self {
    Self { fail: false, delay, calls: AtomicUsize::new(0) }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Reviser for ScriptedReviser {
  async fn revise(&self, candidate: &Candidate, feedback: &str) -> Result<ProblemDraft, GenerationError> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    if self.fail {
      return Err(GenerationError::Exhausted { what: "revision", attempts: 1, last: "backend down".into() });
    }
    Ok(ProblemDraft {
      problem: format!("{} (revision {n})", candidate.current_text),
      solution: format!("{} Addressed: {feedback}", candidate.current_solution),
    })
  }
}

pub const DRAFT: &str = r#"{"problem": "Sam buys 5 notebooks at 24 rupees each. How much does he pay?", "solution": "Each notebook costs 24 rupees, so 5 * 24 = 120 rupees."}"#;
pub const GRADE_OK: &str = r#"{"is_appropriate": true, "feedback": "Fits grade 7.", "difficulty": "appropriate", "suggestions": []}"#;
pub const GRADE_TOO_EASY: &str = r#"{"is_appropriate": false, "feedback": "Numbers are too small.", "difficulty": "too_easy", "suggestions": ["use two-digit prices"]}"#;
pub const CORRECT: &str = r#"```json
{"is_correct": true, "feedback": "Correct.", "correct_answer": "120 rupees", "suggestions": []}
```"#;
pub const GOOD_EXPLANATION: &str = r#"{"is_quality": true, "feedback": "Clear steps.", "missing_elements": []}"#;
pub const VARIATION: &str = r#"{"variation": "Asha buys 7 pencils at 9 rupees each. How much does she pay?", "explanation": "Changed quantities."}"#;

/// Backend fake that answers by recognising which schema the prompt asks for.
/// Safe under concurrent callers because replies do not depend on call order
/// (except the queued grade replies, consumed first-come).
pub struct RoutingClient {
  grade_replies: Mutex<VecDeque<String>>,
  panic_on: Option<&'static str>,
  pub calls: AtomicUsize,
}

impl RoutingClient {
  pub fn new() -> Self {
    Self::with_grade_replies(&[])
  }

  pub fn with_grade_replies(replies: &[&str]) -> Self {
    Self {
      grade_replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
      panic_on: None,
      calls: AtomicUsize::new(0),
    }
  }

  /// Panics inside `generate` for any prompt mentioning `needle`.
  pub fn panicking_on(needle: &'static str) -> Self {
    Self { panic_on: Some(needle), ..Self::new() }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl TextGenerationClient for RoutingClient {
  async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, BackendError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let prompt = request.prompt();
    if let Some(needle) = self.panic_on {
      assert!(!prompt.contains(needle), "backend crashed on a prompt about {needle}");
    }
    let text = if prompt.contains("\"is_appropriate\"") {
      self.grade_replies.lock().expect("lock").pop_front().unwrap_or_else(|| GRADE_OK.to_string())
    } else if prompt.contains("\"is_correct\"") {
      CORRECT.to_string()
    } else if prompt.contains("\"is_quality\"") {
      GOOD_EXPLANATION.to_string()
    } else if prompt.contains("\"variation\"") {
      VARIATION.to_string()
    } else if prompt.contains("\"problem\"") {
      DRAFT.to_string()
    } else {
      return Err(BackendError::Unavailable("unrecognised prompt".into()));
    };
    Ok(GenerationResponse { text, model: "routing".into(), prompt_tokens: 0, completion_tokens: 0 })
  }

  fn model_name(&self) -> &str {
    "routing"
  }
}
