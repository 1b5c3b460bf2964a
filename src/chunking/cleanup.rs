//! Background deletion of served chunk results
//!
//! One task per reader owns a delay queue of result ids. Deletions run on the
//! blocking pool so slow file systems never stall page reads.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::chunking::{
    reader::PendingCleanups,
    storage::{remove_tree, result_dir},
};

/// Deletes `<base_dir>/<result_id>` `delay` after each id arrives on `requests`.
///
/// Runs until the request channel closes and every queued deletion has fired. The
/// claim in `pending` is released after each attempt, whatever its outcome.
pub async fn run_cleanup_scheduler(
    base_dir: PathBuf,
    delay: Duration,
    mut requests: mpsc::UnboundedReceiver<String>,
    pending: Arc<PendingCleanups>,
) {
    let mut queue: DelayQueue<String> = DelayQueue::new();
    let mut accepting = true;

    debug!(delay_secs = delay.as_secs(), "chunk cleanup scheduler started");

    while accepting || !queue.is_empty() {
        tokio::select! {
            request = requests.recv(), if accepting => match request {
                Some(result_id) => {
                    queue.insert(result_id, delay);
                }
                None => accepting = false,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let result_id = expired.into_inner();
                delete_result_dir(&base_dir, &result_id).await;
                pending.release(&result_id);
            }
            else => break,
        }
    }

    debug!("chunk cleanup scheduler stopped");
}

async fn delete_result_dir(base_dir: &Path, result_id: &str) {
    let dir = result_dir(base_dir, result_id);
    if !dir.exists() {
        debug!(result_id = %result_id, "chunk directory already gone");
        return;
    }

    let target = dir.clone();
    match tokio::task::spawn_blocking(move || remove_tree(&target)).await {
        Ok(0) => info!(result_id = %result_id, "cleaned up chunk directory"),
        Ok(failures) => warn!(
            result_id = %result_id,
            path = %dir.display(),
            failures,
            "chunk directory cleanup left entries behind"
        ),
        Err(err) => warn!(
            result_id = %result_id,
            path = %dir.display(),
            error = %err,
            "chunk directory cleanup task failed"
        ),
    }
}
