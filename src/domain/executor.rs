//! Bounded fan-out of a per-host probe across many hostnames
//!
//! Results always come back in request order, whatever order the probes finish in.
//! A probe that fails or panics only marks its own slot as failed.

use std::{
    any::Any,
    collections::VecDeque,
    fmt::Display,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::domain::aggregate::{AggregateResult, HostEntry};

/// How long finished workers get to wind down before they are aborted.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

const INCOMPLETE_TASK_ERROR: &str = "probe task did not complete";

enum Slot<T> {
    Pending(String),
    Done(HostEntry<T>),
}

/// Runs `per_host_task` for every non-null hostname on at most `pool_size` workers.
///
/// `None` slots are answered by `null_hostname` without invoking the task. With a
/// pool size of one (or zero) the hosts are probed sequentially on the caller's task.
pub async fn execute_for_hosts<T, E, F, Fut, N>(
    hostnames: Vec<Option<String>>,
    per_host_task: F,
    null_hostname: N,
    pool_size: usize,
) -> AggregateResult<T>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    N: Fn() -> HostEntry<T>,
{
    let pool_size = pool_size.max(1);

    if pool_size == 1 {
        let mut hosts = Vec::with_capacity(hostnames.len());
        for hostname in hostnames {
            let entry = match hostname {
                Some(hostname) => run_guarded(&per_host_task, hostname).await,
                None => null_hostname(),
            };
            hosts.push(entry);
        }
        return AggregateResult::from_hosts(hosts);
    }

    let mut slots = Vec::with_capacity(hostnames.len());
    let mut queue = VecDeque::new();
    for (index, hostname) in hostnames.into_iter().enumerate() {
        match hostname {
            Some(hostname) => {
                slots.push(Slot::Pending(hostname.clone()));
                queue.push_back((index, hostname));
            }
            None => slots.push(Slot::Done(null_hostname())),
        }
    }

    if !queue.is_empty() {
        let worker_count = pool_size.min(queue.len());
        debug!(
            hosts = queue.len(),
            workers = worker_count,
            "dispatching per-host probes"
        );

        let queue = Arc::new(Mutex::new(queue));
        let task = Arc::new(per_host_task);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool {
            handles: Vec::with_capacity(worker_count),
        };

        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let task = Arc::clone(&task);
            let tx = tx.clone();
            pool.handles.push(tokio::spawn(async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some((index, hostname)) = next else {
                        break;
                    };

                    let entry = run_guarded(task.as_ref(), hostname).await;
                    if tx.send((index, entry)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        // The channel closes once every worker has drained the queue and exited.
        while let Some((index, entry)) = rx.recv().await {
            slots[index] = Slot::Done(entry);
        }

        pool.shutdown(SHUTDOWN_GRACE_PERIOD).await;
    }

    let hosts = slots
        .into_iter()
        .map(|slot| match slot {
            Slot::Done(entry) => entry,
            Slot::Pending(hostname) => HostEntry::failure(Some(hostname), INCOMPLETE_TASK_ERROR),
        })
        .collect();

    AggregateResult::from_hosts(hosts)
}

/// Converts both `Err` results and panics into a failed entry for this host.
async fn run_guarded<T, E, F, Fut>(task: &F, hostname: String) -> HostEntry<T>
where
    E: Display,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let outcome = AssertUnwindSafe(async { task(hostname.clone()).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(payload)) => HostEntry::success(hostname, payload),
        Ok(Err(err)) => HostEntry::failure(Some(hostname), err.to_string()),
        Err(panic) => {
            let reason = panic_reason(panic.as_ref());
            warn!(hostname = %hostname, reason = %reason, "probe panicked");
            HostEntry::failure(Some(hostname), format!("probe panicked: {reason}"))
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

/// Owns the worker tasks; anything still running when the pool is dropped gets aborted.
struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    async fn shutdown(mut self, grace: Duration) {
        let handles = std::mem::take(&mut self.handles);
        let abort_handles = handles
            .iter()
            .map(JoinHandle::abort_handle)
            .collect::<Vec<_>>();

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        warn!(error = %err, "probe worker terminated abnormally");
                    }
                }
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "probe workers did not terminate within grace period, aborting"
                );
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
