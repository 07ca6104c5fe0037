//! On-disk, write-once memoization of generated variations.
//!
//! One JSON file per key under the cache directory. The key is
//! `<sha256(source_text)>_<variation_index>`. Index 0 is the canonical variation and is
//! looked up before generating; higher indices ask for a fresh alternative and skip the
//! lookup, but are still stored for audit.
//!
//! Entries are published with a hard link from a temp file, which fails when the key already
//! exists. Racing writers may both generate; the first link wins and everyone returns the
//! stored entry. A readable entry is never overwritten. An unreadable one sitting on the key
//! is replaced by rename so it is only regenerated once.

use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::CacheEntry;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("cache io error at {path}: {source}")]
  Io { path: String, #[source] source: io::Error },
  #[error("cache serialization error: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Failure of `get_or_generate`: either the generator failed or the store did.
#[derive(Debug, thiserror::Error)]
pub enum CachedGenerationError<E> {
  #[error("generation failed: {0}")]
  Generate(E),
  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// What the generator hands back on a miss.
#[derive(Clone, Debug)]
pub struct GeneratedVariation {
  pub variation_text: String,
  pub explanation: String,
}

#[derive(Clone, Debug)]
pub struct VariationCache {
  dir: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError {
  let path = path.display().to_string();
  move |source| CacheError::Io { path, source }
}

impl VariationCache {
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(|source| CacheError::Io { path: dir.display().to_string(), source })?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path { &self.dir }

  /// Stable key for a (source, index) pair.
  pub fn key(source_text: &str, variation_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_text.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{hex}_{variation_index}")
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{key}.json"))
  }

  /// Read an entry. Missing, unreadable or corrupt files are all a miss.
  pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
    let path = self.path_for(key);
    let bytes = match fs::read(&path) {
      Ok(b) => b,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
      Err(e) => {
        warn!(target: "cache", path = %path.display(), error = %e, "Unreadable cache entry; treating as miss");
        return None;
      }
    };
    match serde_json::from_slice::<CacheEntry>(&bytes) {
      Ok(entry) if entry.key == key && !entry.variation_text.trim().is_empty() => Some(entry),
      Ok(_) => {
        warn!(target: "cache", path = %path.display(), "Cache entry does not match its key; treating as miss");
        None
      }
      Err(e) => {
        warn!(target: "cache", path = %path.display(), error = %e, "Corrupt cache entry; treating as miss");
        None
      }
    }
  }

  /// Store an entry unless the key is already present. Returns the entry that ends up stored.
  pub fn store_if_absent(&self, entry: CacheEntry) -> Result<CacheEntry, CacheError> {
    let path = self.path_for(&entry.key);
    if let Some(existing) = self.lookup(&entry.key) {
      debug!(target: "cache", key = %entry.key, "Key already stored; keeping first write");
      return Ok(existing);
    }

    let json = serde_json::to_vec_pretty(&entry)?;
    let tmp = self.dir.join(format!(".{}.{}.tmp", entry.key, Uuid::new_v4().simple()));
    {
      let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
      f.write_all(&json).map_err(io_err(&tmp))?;
      f.sync_all().map_err(io_err(&tmp))?;
    }

    let stored = match fs::hard_link(&tmp, &path) {
      Ok(()) => Ok(entry),
      Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match self.lookup(&entry.key) {
        // lost the race to a valid entry
        Some(existing) => Ok(existing),
        None => {
          // Only unreadable entries are ever replaced.
          warn!(target: "cache", key = %entry.key, "Replacing unreadable cache entry");
          fs::rename(&tmp, &path)
            .map_err(io_err(&path))
            .map(|()| self.lookup(&entry.key).unwrap_or(entry))
        }
      },
      Err(e) => Err(CacheError::Io { path: path.display().to_string(), source: e }),
    };
    let _ = fs::remove_file(&tmp);
    stored
  }

  /// Return the cached variation for (source, index) or produce and store it.
  pub async fn get_or_generate<F, Fut, E>(
    &self,
    source_text: &str,
    variation_index: u32,
    generator_fn: F,
  ) -> Result<CacheEntry, CachedGenerationError<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<GeneratedVariation, E>>,
  {
    let key = Self::key(source_text, variation_index);

    if variation_index == 0 {
      if let Some(entry) = self.lookup(&key) {
        debug!(target: "cache", %key, "Cache hit");
        return Ok(entry);
      }
    }

    debug!(target: "cache", %key, variation_index, "Cache miss; generating");
    let generated = generator_fn().await.map_err(CachedGenerationError::Generate)?;
    let entry = CacheEntry {
      key,
      variation_text: generated.variation_text,
      explanation: generated.explanation,
      generated_at: Utc::now(),
    };
    let stored = self.store_if_absent(entry)?;
    info!(target: "cache", key = %stored.key, "Variation stored");
    Ok(stored)
  }
}
