//! Disk-backed pagination of tool results that exceed the transport payload ceiling
//!
//! The writer turns one aggregate into numbered pages under a fresh result id, the
//! reader serves them back one at a time, and the cleanup scheduler removes a result
//! directory some time after its last page was first served.

use std::{io, path::PathBuf};

use thiserror::Error;

pub mod cleanup;
pub mod page;
pub mod reader;
pub mod storage;
pub mod writer;

pub use page::ChunkPage;
pub use reader::{ChunkReader, PendingCleanups};
pub use writer::{ChunkCreationResult, ChunkWriter};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk storage failure at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode or decode chunk page: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("chunk page exceeds limit ({context}): {size} > {limit}")]
    PageTooLarge {
        context: &'static str,
        size: usize,
        limit: u64,
    },
}
