//! Tolerant decoding of backend output into typed records.
//!
//! The backend is a language model: it wraps JSON in prose, in ```json fences, sometimes in
//! two layers of fences. We try, in order:
//!   1. the whole text,
//!   2. the contents of a fenced code block (nested fences peeled),
//!   3. the span from the first '{' to the last '}'.
//! A strategy only wins if serde accepts the record AND `Structured::validate` agrees that the
//! required fields carry something. Otherwise the next strategy gets a turn.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::llm::{BackendError, GenerationRequest, TextGenerationClient};
use crate::util::trunc_for_log;

const EXCERPT_LEN: usize = 160;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  #[error("empty response")]
  Empty,
  #[error("no strategy produced a complete record ({reason}); response starts with: {excerpt}")]
  Exhausted { reason: String, excerpt: String },
}

/// A schema record the parser can hand back.
///
/// serde already rejects records with missing required fields; `validate` catches the
/// "present but useless" cases such as empty strings.
pub trait Structured {
  fn validate(&self) -> Result<(), String> {
    Ok(())
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
  Direct,
  Fenced,
  BraceSpan,
}

pub fn parse<T>(raw: &str) -> Result<T, ParseError>
where
  T: DeserializeOwned + Structured,
{
  let text = raw.trim();
  if text.is_empty() {
    return Err(ParseError::Empty);
  }

  let mut last_reason = String::from("no JSON object found");
  for strategy in [Strategy::Direct, Strategy::Fenced, Strategy::BraceSpan] {
    let Some(candidate) = extract(strategy, text) else { continue };
    match decode::<T>(candidate) {
      Ok(value) => {
        debug!(target: "parse", ?strategy, "Decoded structured response");
        return Ok(value);
      }
      Err(reason) => {
        debug!(target: "parse", ?strategy, %reason, "Strategy rejected");
        last_reason = reason;
      }
    }
  }

  Err(ParseError::Exhausted { reason: last_reason, excerpt: trunc_for_log(text, EXCERPT_LEN) })
}

fn extract(strategy: Strategy, text: &str) -> Option<&str> {
  match strategy {
    Strategy::Direct => Some(text),
    Strategy::Fenced => fenced_block(text),
    Strategy::BraceSpan => brace_span(text),
  }
}

fn decode<T>(candidate: &str) -> Result<T, String>
where
  T: DeserializeOwned + Structured,
{
  let value: T = serde_json::from_str(candidate.trim()).map_err(|e| e.to_string())?;
  value.validate()?;
  Ok(value)
}

/// Contents of the first fenced block, peeling nested fences.
///
/// An opening fence is "```" optionally followed by a language tag on the same line. When the
/// block body is itself fenced (two layers), the inner body is returned. The block closes at the
/// first fence after its body, so later blocks in the same reply are ignored.
fn fenced_block(text: &str) -> Option<&str> {
  let open = text.find("```")?;
  let mut rest = after_opening_fence(&text[open..]);
  while rest.trim_start().starts_with("```") {
    rest = after_opening_fence(rest.trim_start());
  }
  let close = rest.find("```")?;
  let body = rest[..close].trim();
  if body.is_empty() { None } else { Some(body) }
}

/// `text` starts with "```"; skip it and its info string ("json", "JSON", ...).
fn after_opening_fence(text: &str) -> &str {
  let after_ticks = &text[3..];
  match after_ticks.find('\n') {
    Some(nl) if after_ticks[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &after_ticks[nl + 1..],
    _ => {
      let tag = after_ticks.chars().take_while(|c| c.is_ascii_alphabetic()).count();
      &after_ticks[tag..]
    }
  }
}

fn brace_span(text: &str) -> Option<&str> {
  let start = text.find('{')?;
  let end = text.rfind('}')?;
  if end <= start {
    return None;
  }
  Some(&text[start..=end])
}

/// Failure of a backend call that expected a structured reply.
#[derive(Debug, thiserror::Error)]
pub enum StructuredCallError {
  #[error(transparent)]
  Backend(#[from] BackendError),
  #[error(transparent)]
  Parse(#[from] ParseError),
}

/// Call the backend and decode its text into `T`.
pub async fn generate_structured<T>(
  client: &dyn TextGenerationClient,
  request: GenerationRequest,
) -> Result<T, StructuredCallError>
where
  T: DeserializeOwned + Structured,
{
  let response = client.generate(request).await?;
  Ok(parse::<T>(&response.text)?)
}

/// Serde helper for text fields the backend sometimes answers with a number, list or object.
/// Non-string values are kept as their JSON rendering.
pub fn text_or_json<'de, D>(d: D) -> Result<String, D::Error>
where
  D: serde::Deserializer<'de>,
{
  use serde::Deserialize;
  Ok(match serde_json::Value::deserialize(d)? {
    serde_json::Value::String(s) => s,
    serde_json::Value::Null => String::new(),
    other => other.to_string(),
  })
}

/// Require a non-empty string field.
pub fn require_text(field: &str, value: &str) -> Result<(), String> {
  if value.trim().is_empty() {
    Err(format!("field '{field}' is empty"))
  } else {
    Ok(())
  }
}
