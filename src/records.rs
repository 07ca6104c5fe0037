//! Persisted audit record of a reviewed candidate: `<records_dir>/<id>.json`.
//!
//! Pretty JSON with a fixed field order and a trailing newline, so the same candidate always
//! serializes to the same bytes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Candidate, Review, Status, ValidationOutcome};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
  #[error("record io error at {path}: {source}")]
  Io { path: PathBuf, #[source] source: std::io::Error },
  #[error("record {path} is not valid JSON: {source}")]
  Decode { path: PathBuf, #[source] source: serde_json::Error },
  #[error("record serialization error: {0}")]
  Encode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReviewRecord {
  pub feedback: String,
  pub is_valid: bool,
  pub outcome: ValidationOutcome,
  pub iteration: usize,
  pub timestamp: DateTime<Utc>,
  /// Text the review was about; older records may not carry it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variation: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub solution: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateRecord {
  pub id: String,
  pub original_question: String,
  pub variation: String,
  pub solution: String,
  pub status: Status,
  #[serde(default)]
  pub reviews: Vec<ReviewRecord>,
}

impl CandidateRecord {
  pub fn from_candidate(c: &Candidate) -> Self {
    Self {
      id: c.id.clone(),
      original_question: c.source_question.clone(),
      variation: c.current_text.clone(),
      solution: c.current_solution.clone(),
      status: c.status(),
      reviews: c
        .reviews()
        .iter()
        .map(|r| ReviewRecord {
          feedback: r.feedback.clone(),
          is_valid: r.is_valid,
          outcome: r.outcome,
          iteration: r.iteration,
          timestamp: r.timestamp,
          variation: Some(r.text_at_review.clone()),
          solution: Some(r.solution_at_review.clone()),
        })
        .collect(),
    }
  }

  /// Rebuild a candidate. Reviews without a stored text or solution fall back to the final one.
  pub fn into_candidate(self) -> Candidate {
    let reviews = self
      .reviews
      .into_iter()
      .map(|r| Review {
        text_at_review: r.variation.unwrap_or_else(|| self.variation.clone()),
        solution_at_review: r.solution.unwrap_or_else(|| self.solution.clone()),
        feedback: r.feedback,
        is_valid: r.is_valid,
        outcome: r.outcome,
        iteration: r.iteration,
        timestamp: r.timestamp,
      })
      .collect();
    Candidate::restore(self.id, self.original_question, self.variation, self.solution, self.status, reviews)
  }

  pub fn to_pretty_json(&self) -> Result<String, RecordError> {
    let mut s = serde_json::to_string_pretty(self)?;
    s.push('\n');
    Ok(s)
  }
}

#[derive(Clone, Debug)]
pub struct RecordStore {
  dir: PathBuf,
}

impl RecordStore {
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RecordError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(|source| RecordError::Io { path: dir.clone(), source })?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path { &self.dir }

  pub fn path_for(&self, id: &str) -> PathBuf {
    self.dir.join(format!("{id}.json"))
  }

  /// Write (or replace) the record for `candidate`. Readers never see a half-written file.
  pub fn save(&self, candidate: &Candidate) -> Result<PathBuf, RecordError> {
    let record = CandidateRecord::from_candidate(candidate);
    let json = record.to_pretty_json()?;
    let path = self.path_for(&record.id);
    let tmp = self.dir.join(format!(".{}.{}.tmp", record.id, Uuid::new_v4().simple()));
    let io = |source| RecordError::Io { path: tmp.clone(), source };
    {
      let mut f = fs::File::create(&tmp).map_err(io)?;
      f.write_all(json.as_bytes()).map_err(io)?;
    }
    fs::rename(&tmp, &path).map_err(|source| RecordError::Io { path: path.clone(), source })?;
    info!(target: "pipeline", id = %record.id, status = %record.status, path = %path.display(), "Record saved");
    Ok(path)
  }

  pub fn load(&self, id: &str) -> Result<CandidateRecord, RecordError> {
    let path = self.path_for(id);
    let bytes = fs::read(&path).map_err(|source| RecordError::Io { path: path.clone(), source })?;
    serde_json::from_slice(&bytes).map_err(|source| RecordError::Decode { path, source })
  }

  /// Every readable record in the directory, sorted by id. Unreadable files are skipped.
  pub fn load_all(&self) -> Vec<CandidateRecord> {
    let entries = match fs::read_dir(&self.dir) {
      Ok(e) => e,
      Err(e) => {
        warn!(target: "pipeline", dir = %self.dir.display(), error = %e, "Records directory unreadable");
        return Vec::new();
      }
    };
    let mut out: Vec<CandidateRecord> = entries
      .filter_map(|e| e.ok().map(|e| e.path()))
      .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
      .filter_map(|p| {
        let parsed = fs::read(&p)
          .map_err(|e| e.to_string())
          .and_then(|b| serde_json::from_slice::<CandidateRecord>(&b).map_err(|e| e.to_string()));
        match parsed {
          Ok(r) => Some(r),
          Err(e) => {
            warn!(target: "pipeline", path = %p.display(), error = %e, "Skipping unreadable record");
            None
          }
        }
      })
      .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
  }
}
