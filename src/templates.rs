//! Problem templates: one JSON file per template under the templates directory.
//!
//! Files that fail to read or decode are skipped with a warning; loading never fails as a
//! whole. Selection filters by type (substring, case-insensitive) and difficulty, prefers
//! templates not handed out yet, and remembers what it handed out until `reset_usage`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::domain::ProblemTemplate;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
  #[error("failed to read template {path}: {source}")]
  Read { path: PathBuf, #[source] source: std::io::Error },
  #[error("invalid template {path}: {source}")]
  Decode { path: PathBuf, #[source] source: serde_json::Error },
  #[error("invalid template {path}: {reason}")]
  Invalid { path: PathBuf, reason: String },
}

pub fn load_template_file(path: &Path) -> Result<ProblemTemplate, TemplateError> {
  let bytes = fs::read(path).map_err(|source| TemplateError::Read { path: path.to_path_buf(), source })?;
  let t: ProblemTemplate =
    serde_json::from_slice(&bytes).map_err(|source| TemplateError::Decode { path: path.to_path_buf(), source })?;
  for (field, value) in [("id", &t.id), ("original_question", &t.original_question), ("type", &t.kind)] {
    if value.trim().is_empty() {
      return Err(TemplateError::Invalid { path: path.to_path_buf(), reason: format!("field '{field}' is empty") });
    }
  }
  Ok(t)
}

#[derive(Debug, Default)]
pub struct TemplateStore {
  templates: Vec<ProblemTemplate>,
  used: HashSet<String>,
}

impl TemplateStore {
  pub fn from_templates(templates: Vec<ProblemTemplate>) -> Self {
    Self { templates, used: HashSet::new() }
  }

  pub fn load_dir(dir: &Path) -> Self {
    let entries = match fs::read_dir(dir) {
      Ok(e) => e,
      Err(e) => {
        warn!(target: "pipeline", dir = %dir.display(), error = %e, "Templates directory unreadable; no templates loaded");
        return Self::default();
      }
    };

    let mut paths: Vec<PathBuf> = entries
      .filter_map(|e| e.ok().map(|e| e.path()))
      .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
      .collect();
    paths.sort();

    let mut templates: Vec<ProblemTemplate> = Vec::with_capacity(paths.len());
    for path in paths {
      match load_template_file(&path) {
        Ok(t) if templates.iter().any(|x| x.id == t.id) => {
          warn!(target: "pipeline", path = %path.display(), id = %t.id, "Duplicate template id; skipping");
        }
        Ok(t) => templates.push(t),
        Err(e) => warn!(target: "pipeline", error = %e, "Skipping template"),
      }
    }
    info!(target: "pipeline", dir = %dir.display(), count = templates.len(), "Templates loaded");
    Self::from_templates(templates)
  }

  pub fn len(&self) -> usize { self.templates.len() }

  pub fn is_empty(&self) -> bool { self.templates.is_empty() }

  pub fn all(&self) -> &[ProblemTemplate] { &self.templates }

  pub fn get(&self, id: &str) -> Option<&ProblemTemplate> {
    self.templates.iter().find(|t| t.id == id)
  }

  /// Templates whose type contains `kind` and, when given, whose difficulty equals `difficulty`.
  pub fn matching(&self, kind: &str, difficulty: Option<&str>) -> Vec<&ProblemTemplate> {
    let kind = kind.to_lowercase();
    self
      .templates
      .iter()
      .filter(|t| t.kind.to_lowercase().contains(&kind))
      .filter(|t| difficulty.map_or(true, |d| t.difficulty.eq_ignore_ascii_case(d)))
      .collect()
  }

  /// Random template for (`kind`, `difficulty`). Falls back to any difficulty when nothing
  /// matches, and to already-used templates when every match was handed out before.
  pub fn pick(&mut self, kind: &str, difficulty: Option<&str>, avoid_used: bool) -> Option<ProblemTemplate> {
    let mut candidates = self.matching(kind, difficulty);
    if candidates.is_empty() && difficulty.is_some() {
      candidates = self.matching(kind, None);
    }
    if avoid_used {
      let unused: Vec<&ProblemTemplate> = candidates.iter().copied().filter(|t| !self.used.contains(&t.id)).collect();
      if !unused.is_empty() {
        candidates = unused;
      }
    }
    let chosen = candidates.choose(&mut rand::thread_rng()).map(|t| (*t).clone())?;
    self.used.insert(chosen.id.clone());
    Some(chosen)
  }

  pub fn reset_usage(&mut self) {
    self.used.clear();
  }
}
