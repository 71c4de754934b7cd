//! Result caching keyed by request content.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, warn};

use crate::consts::PROCESS_CACHE_DIR;
use crate::process::ProcessExecutor;
use crate::process::types::{ExecutionError, ProcessRequest, ProcessResult, ResultSource};
use crate::store::{Digest, Store};
use crate::util::hash::Fingerprint;

/// Persisted form of a successful result. Output streams live in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
  exit_code: i32,
  stdout: Digest,
  stderr: Digest,
  output_digest: Digest,
  elapsed: Duration,
}

/// Wraps another executor and reuses results of identical requests.
///
/// Only successful results are cached. Entries live in memory and, when the
/// store has an on-disk root, as JSON files under `process-cache/`. An entry
/// whose outputs are no longer in the store is treated as a miss.
#[derive(Debug)]
pub struct CachingExecutor<E> {
  inner: E,
  entries: Arc<CacheEntries>,
}

/// The cache proper. Every method touches the store or the cache directory,
/// so callers run them on the blocking pool.
#[derive(Debug)]
struct CacheEntries {
  store: Store,
  dir: Option<PathBuf>,
  memory: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl<E: ProcessExecutor> CachingExecutor<E> {
  pub fn new(inner: E, store: Store) -> Self {
    let dir = store.root().map(|root| root.join(PROCESS_CACHE_DIR));
    Self {
      inner,
      entries: Arc::new(CacheEntries {
        store,
        dir,
        memory: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn inner(&self) -> &E {
    &self.inner
  }

  async fn run(&self, request: ProcessRequest) -> Result<ProcessResult, ExecutionError> {
    let key = request
      .cache_key()
      .map_err(|e| ExecutionError::Cache { message: e.to_string() })?;

    let entries = self.entries.clone();
    if let Some(result) = blocking(move || entries.lookup(&key)).await? {
      debug!(description = %request.description, key = %key, "process cache hit");
      return Ok(result);
    }

    let result = self.inner.execute(request).await?;
    if result.is_success() {
      let entries = self.entries.clone();
      let recorded = result.clone();
      blocking(move || entries.record(key, &recorded)).await?;
    }
    Ok(result)
  }
}

impl CacheEntries {
  fn lookup(&self, key: &Fingerprint) -> Result<Option<ProcessResult>, ExecutionError> {
    let cached = self.memory.lock().ok().and_then(|m| m.get(key).cloned());
    let entry = match cached {
      Some(entry) => Some(entry),
      None => self.read_entry(key),
    };
    let Some(entry) = entry else {
      return Ok(None);
    };

    if !self.store.contains_tree(entry.output_digest).map_err(cache_error)? {
      debug!(key = %key, "cached outputs missing from store, ignoring entry");
      return Ok(None);
    }
    let (Ok(stdout), Ok(stderr)) = (self.store.load_bytes(entry.stdout), self.store.load_bytes(entry.stderr)) else {
      debug!(key = %key, "cached output streams missing from store, ignoring entry");
      return Ok(None);
    };

    if let Ok(mut memory) = self.memory.lock() {
      memory.insert(*key, entry.clone());
    }

    Ok(Some(ProcessResult {
      exit_code: entry.exit_code,
      stdout: stdout.to_vec(),
      stderr: stderr.to_vec(),
      output_digest: entry.output_digest,
      timed_out: false,
      elapsed: entry.elapsed,
      source: ResultSource::Cached,
    }))
  }

  fn read_entry(&self, key: &Fingerprint) -> Option<CacheEntry> {
    let path = self.dir.as_ref()?.join(format!("{key}.json"));
    let bytes = std::fs::read(&path).ok()?;
    match serde_json::from_slice(&bytes) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(path = ?path, error = %e, "ignoring unreadable process cache entry");
        None
      }
    }
  }

  fn record(&self, key: Fingerprint, result: &ProcessResult) -> Result<(), ExecutionError> {
    let entry = CacheEntry {
      exit_code: result.exit_code,
      stdout: self.store.store_bytes(&result.stdout).map_err(cache_error)?,
      stderr: self.store.store_bytes(&result.stderr).map_err(cache_error)?,
      output_digest: result.output_digest,
      elapsed: result.elapsed,
    };

    if let Some(dir) = &self.dir {
      let json = serde_json::to_vec_pretty(&entry).map_err(cache_error)?;
      std::fs::create_dir_all(dir).map_err(cache_error)?;
      let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(cache_error)?;
      std::io::Write::write_all(&mut tmp, &json).map_err(cache_error)?;
      tmp.persist(dir.join(format!("{key}.json"))).map_err(cache_error)?;
    }

    if let Ok(mut memory) = self.memory.lock() {
      memory.insert(key, entry);
    }
    Ok(())
  }
}

/// Run `f` on the blocking pool inside the caller's span.
async fn blocking<T, F>(f: F) -> Result<T, ExecutionError>
where
  F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
  T: Send + 'static,
{
  let span = Span::current();
  tokio::task::spawn_blocking(move || span.in_scope(f))
    .await
    .map_err(cache_error)?
}

impl<E: ProcessExecutor> ProcessExecutor for CachingExecutor<E> {
  fn execute(&self, request: ProcessRequest) -> BoxFuture<'_, Result<ProcessResult, ExecutionError>> {
    self.run(request).boxed()
  }
}

fn cache_error(e: impl std::fmt::Display) -> ExecutionError {
  ExecutionError::Cache { message: e.to_string() }
}
