//! Serves stored pages by `(result_id, page index)` and arms cleanup after the last one

use std::{
    collections::HashSet,
    fs, io,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunking::{
    cleanup::run_cleanup_scheduler,
    page::ChunkPage,
    storage::{page_path, result_dir},
    ChunkError,
};

/// Result ids with a deletion already queued. Claiming is an atomic check-and-insert.
#[derive(Debug, Default)]
pub struct PendingCleanups {
    ids: Mutex<HashSet<String>>,
}

impl PendingCleanups {
    /// Returns `true` only for the first caller claiming `result_id`.
    pub fn try_claim(&self, result_id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result_id.to_string())
    }

    pub fn release(&self, result_id: &str) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(result_id);
    }

    pub fn contains(&self, result_id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(result_id)
    }
}

#[derive(Debug)]
pub struct ChunkReader {
    base_dir: PathBuf,
    pending: Arc<PendingCleanups>,
    cleanup_tx: mpsc::UnboundedSender<String>,
}

impl ChunkReader {
    /// Creates a reader and spawns its cleanup scheduler on the current runtime.
    pub fn spawn(base_dir: impl Into<PathBuf>, cleanup_delay: Duration) -> (Self, JoinHandle<()>) {
        let base_dir = base_dir.into();
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();
        let reader = Self::with_cleanup_channel(base_dir.clone(), cleanup_tx);
        let handle = tokio::spawn(run_cleanup_scheduler(
            base_dir,
            cleanup_delay,
            cleanup_rx,
            Arc::clone(&reader.pending),
        ));
        (reader, handle)
    }

    /// Creates a reader that hands cleanup requests to `cleanup_tx` instead of a scheduler.
    pub fn with_cleanup_channel(
        base_dir: impl Into<PathBuf>,
        cleanup_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            pending: Arc::new(PendingCleanups::default()),
            cleanup_tx,
        }
    }

    pub fn pending_cleanups(&self) -> &PendingCleanups {
        &self.pending
    }

    /// Reads one page. A missing or negative index reads page 0.
    ///
    /// Unknown result ids and absent pages yield a page-shaped not-found response,
    /// never an error. Only unreadable or corrupt pages are reported as errors.
    pub fn fetch(
        &self,
        result_id: &str,
        result_number: Option<i64>,
    ) -> Result<ChunkPage, ChunkError> {
        let index = result_number.filter(|number| *number >= 0).unwrap_or(0);

        if !is_result_id(result_id) {
            debug!(result_id = %result_id, "rejected malformed chunk result id");
            return Ok(ChunkPage::not_found(result_id, index));
        }

        let path = page_path(&result_dir(&self.base_dir, result_id), index as usize);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ChunkPage::not_found(result_id, index));
            }
            Err(source) => {
                warn!(path = %path.display(), error = %source, "failed to read chunk file");
                return Err(ChunkError::Storage { path, source });
            }
        };

        let page: ChunkPage = serde_json::from_slice(&bytes)?;
        if !page.has_more {
            self.schedule_cleanup(result_id);
        }
        Ok(page)
    }

    fn schedule_cleanup(&self, result_id: &str) {
        if !self.pending.try_claim(result_id) {
            return;
        }

        if self.cleanup_tx.send(result_id.to_string()).is_err() {
            self.pending.release(result_id);
            warn!(result_id = %result_id, "chunk cleanup scheduler is not running");
            return;
        }

        debug!(result_id = %result_id, "scheduled chunk directory cleanup");
    }
}

/// Only canonical lowercase UUIDs, as produced by the writer, address a directory.
fn is_result_id(value: &str) -> bool {
    Uuid::parse_str(value)
        .map(|parsed| parsed.hyphenated().to_string() == value)
        .unwrap_or(false)
}
