//! Splits an oversized telemetry aggregate into byte-bounded pages on disk
//!
//! Pages are produced per host, in request order. A host's monitors are packed
//! greedily: the current slice grows one monitor at a time and is re-serialized
//! after each step, so the size check always runs against the exact bytes that
//! will be stored. Every page except the oversized-monitor error page fits the limit.

use std::{fs, io, path::PathBuf};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunking::{
    page::{HostView, PageView, TelemetryView},
    storage::{atomic_write, page_path, remove_tree, result_dir},
    ChunkError,
};
use crate::domain::aggregate::{AggregateResult, HostEntry, MonitorRecord, TelemetryPayload};

pub const OVERSIZED_MONITOR_ERROR: &str =
    "One monitor entry exceeds the allowed tool output page size";

/// Manifest of a freshly written chunked result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkCreationResult {
    pub result_id: String,
    pub page_count: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkWriter {
    base_dir: PathBuf,
}

impl ChunkWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Writes `aggregate` as pages of at most `byte_limit` bytes under a new result id.
    ///
    /// Blocks on file-system I/O. The manifest is only returned once every page,
    /// including the rewritten final page, is in place.
    pub fn create_chunks(
        &self,
        aggregate: &AggregateResult<TelemetryPayload>,
        byte_limit: u64,
    ) -> Result<ChunkCreationResult, ChunkError> {
        let result_id = Uuid::new_v4().to_string();
        let dir = result_dir(&self.base_dir, &result_id);
        fs::create_dir_all(&dir).map_err(|source| ChunkError::Storage {
            path: dir.clone(),
            source,
        })?;

        let mut job = Job {
            result_id,
            dir,
            limit: byte_limit,
            sources: aggregate.hosts.iter().map(HostSource::from_entry).collect(),
            written: 0,
            last: None,
        };

        job.run().inspect_err(|err| {
            let failures = remove_tree(&job.dir);
            warn!(
                result_id = %job.result_id,
                error = %err,
                failures,
                "chunking failed, discarded partial result"
            );
        })
    }
}

/// Borrowed, flattened view of one host entry.
struct HostSource<'a> {
    hostname: &'a str,
    total: u64,
    monitors: &'a [MonitorRecord],
    error_message: Option<&'a str>,
}

impl<'a> HostSource<'a> {
    fn from_entry(entry: &'a HostEntry<TelemetryPayload>) -> Self {
        let payload = entry.payload.as_ref();
        let telemetry = payload.and_then(|payload| payload.telemetry.as_ref());

        Self {
            hostname: entry.hostname.as_deref().unwrap_or(""),
            total: telemetry.map(|telemetry| telemetry.total).unwrap_or(0),
            monitors: telemetry
                .map(|telemetry| telemetry.monitors.as_slice())
                .unwrap_or(&[]),
            error_message: payload
                .and_then(|payload| payload.error_message.as_deref())
                .or(entry.error.as_deref()),
        }
    }

    fn view(&self, start: usize, end: usize) -> HostView<'a> {
        HostView {
            hostname: self.hostname,
            telemetry: TelemetryView {
                total: self.total,
                monitors: &self.monitors[start..end],
            },
            error_message: self.error_message,
        }
    }
}

/// What a page holds, kept so the last page can be re-rendered with its final trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Draft {
    Host {
        source: usize,
        start: usize,
        end: usize,
    },
    Empty,
}

struct Job<'a> {
    result_id: String,
    dir: PathBuf,
    limit: u64,
    sources: Vec<HostSource<'a>>,
    written: usize,
    last: Option<Draft>,
}

impl Job<'_> {
    fn run(&mut self) -> Result<ChunkCreationResult, ChunkError> {
        if let Some(oversized) = self.pack()? {
            return self.abort_with_oversized_monitor(oversized);
        }

        if self.written == 0 {
            let bytes = self.render(&Draft::Empty, 0, true)?;
            self.ensure_within_limit(&bytes, "empty result page")?;
            self.write_page(Draft::Empty, &bytes)?;
        }

        self.finalize()?;

        debug!(
            result_id = %self.result_id,
            page_count = self.written,
            "chunked result written"
        );

        Ok(ChunkCreationResult {
            result_id: self.result_id.clone(),
            page_count: self.written,
        })
    }

    /// Packs every host. Returns the index of the host whose single monitor
    /// cannot fit a page, in which case packing stopped there.
    fn pack(&mut self) -> Result<Option<usize>, ChunkError> {
        for source in 0..self.sources.len() {
            let count = self.sources[source].monitors.len();

            if count == 0 {
                let draft = Draft::Host {
                    source,
                    start: 0,
                    end: 0,
                };
                let bytes = self.render(&draft, self.written, false)?;
                self.ensure_within_limit(&bytes, "empty monitors page")?;
                let closing = self.render(&draft, self.written, true)?;
                self.ensure_within_limit(&closing, "empty monitors page")?;
                self.write_page(draft, &bytes)?;
                continue;
            }

            let mut start = 0;
            while start < count {
                let single = Draft::Host {
                    source,
                    start,
                    end: start + 1,
                };
                // Measured with both trailers so the page still fits if it ends up last.
                let mut best = self.render(&single, self.written, false)?;
                let closing = self.render(&single, self.written, true)?;
                let monitor_bytes = best.len().max(closing.len());
                if monitor_bytes as u64 > self.limit {
                    warn!(
                        limit = self.limit,
                        monitor_bytes,
                        hostname = %self.sources[source].hostname,
                        "cannot chunk telemetry output, one monitor entry exceeds page limit"
                    );
                    return Ok(Some(source));
                }

                let mut end = start + 1;
                while end < count {
                    let candidate = Draft::Host {
                        source,
                        start,
                        end: end + 1,
                    };
                    let bytes = self.render(&candidate, self.written, false)?;
                    if bytes.len() as u64 > self.limit {
                        break;
                    }
                    best = bytes;
                    end += 1;
                }

                self.write_page(Draft::Host { source, start, end }, &best)?;
                start = end;
            }
        }

        Ok(None)
    }

    /// Rewrites the last page with `has_more=false` and `next_result=null`.
    ///
    /// The final trailer is a few bytes longer than a continuation trailer. When that
    /// pushes a packed page over the limit, its trailing monitor moves to a new last page.
    fn finalize(&mut self) -> Result<(), ChunkError> {
        while let Some(draft) = self.last {
            let index = self.written - 1;
            let bytes = self.render(&draft, index, true)?;
            if bytes.len() as u64 <= self.limit {
                return atomic_write(&page_path(&self.dir, index), &bytes);
            }

            let Draft::Host { source, start, end } = draft else {
                return self.ensure_within_limit(&bytes, "final page after rewrite");
            };
            if end - start < 2 {
                return self.ensure_within_limit(&bytes, "final page after rewrite");
            }

            let kept = Draft::Host {
                source,
                start,
                end: end - 1,
            };
            let kept_bytes = self.render(&kept, index, false)?;
            atomic_write(&page_path(&self.dir, index), &kept_bytes)?;

            let moved = Draft::Host {
                source,
                start: end - 1,
                end,
            };
            let moved_bytes = self.render(&moved, index + 1, false)?;
            self.ensure_within_limit(&moved_bytes, "relocated trailing monitor")?;
            self.write_page(moved, &moved_bytes)?;
        }

        Ok(())
    }

    /// Replaces whatever was written with a single terminal error page.
    fn abort_with_oversized_monitor(
        &mut self,
        source: usize,
    ) -> Result<ChunkCreationResult, ChunkError> {
        for index in 0..self.written {
            let path = page_path(&self.dir, index);
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(ChunkError::Storage { path, source: err });
                }
            }
        }

        let host = &self.sources[source];
        let hosts = [HostView {
            hostname: host.hostname,
            telemetry: TelemetryView {
                total: host.total,
                monitors: &[],
            },
            error_message: Some(OVERSIZED_MONITOR_ERROR),
        }];
        let bytes = serde_json::to_vec(&PageView::last(&self.result_id, &hosts))?;
        atomic_write(&page_path(&self.dir, 0), &bytes)?;

        Ok(ChunkCreationResult {
            result_id: self.result_id.clone(),
            page_count: 1,
        })
    }

    fn render(&self, draft: &Draft, index: usize, last: bool) -> Result<Vec<u8>, ChunkError> {
        let single;
        let hosts: &[HostView<'_>] = match *draft {
            Draft::Host { source, start, end } => {
                single = [self.sources[source].view(start, end)];
                &single
            }
            Draft::Empty => &[],
        };

        let page = if last {
            PageView::last(&self.result_id, hosts)
        } else {
            PageView::continued(&self.result_id, hosts, index)
        };
        Ok(serde_json::to_vec(&page)?)
    }

    fn write_page(&mut self, draft: Draft, bytes: &[u8]) -> Result<(), ChunkError> {
        let path = page_path(&self.dir, self.written);
        atomic_write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote chunk page");

        self.written += 1;
        self.last = Some(draft);
        Ok(())
    }

    fn ensure_within_limit(&self, bytes: &[u8], context: &'static str) -> Result<(), ChunkError> {
        if bytes.len() as u64 > self.limit {
            return Err(ChunkError::PageTooLarge {
                context,
                size: bytes.len(),
                limit: self.limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::chunking::page::{ChunkPage, PageHost, PageTelemetry};

    fn monitor(id: usize, pad: usize) -> MonitorRecord {
        MonitorRecord(json!({ "id": format!("m{id:02}"), "pad": "x".repeat(pad) }))
    }

    fn telemetry_host(hostname: &str, monitors: Vec<MonitorRecord>) -> HostEntry<TelemetryPayload> {
        HostEntry::success(hostname, TelemetryPayload::with_monitors(monitors))
    }

    fn read_pages(base: &TempDir, created: &ChunkCreationResult) -> Vec<(usize, ChunkPage)> {
        (0..created.page_count)
            .map(|index| {
                let path = page_path(&result_dir(base.path(), &created.result_id), index);
                let bytes = fs::read(&path).expect("page exists");
                let page = serde_json::from_slice(&bytes).expect("page parses");
                (bytes.len(), page)
            })
            .collect()
    }

    fn page_len(monitors: &[MonitorRecord], index: usize) -> usize {
        let page = ChunkPage {
            result_id: Uuid::nil().to_string(),
            hosts: vec![PageHost {
                hostname: "h1".to_string(),
                telemetry: PageTelemetry {
                    total: 5,
                    monitors: monitors.to_vec(),
                },
                error_message: None,
            }],
            next_result: Some(index + 1),
            has_more: true,
            error_message: None,
        };
        serde_json::to_vec(&page).expect("serialize").len()
    }

    fn assert_pagination_contract(pages: &[(usize, ChunkPage)], result_id: &str) {
        let last = pages.len() - 1;
        for (index, (_, page)) in pages.iter().enumerate() {
            assert_eq!(page.result_id, result_id);
            if index == last {
                assert!(!page.has_more);
                assert_eq!(page.next_result, None);
            } else {
                assert!(page.has_more);
                assert_eq!(page.next_result, Some(index + 1));
            }
        }
    }

    #[test]
    fn packs_two_monitors_per_page_when_three_do_not_fit() {
        let base = TempDir::new().expect("temp dir");
        let monitors = (0..5).map(|id| monitor(id, 20)).collect::<Vec<_>>();
        let limit = page_len(&monitors[..2], 0) as u64 + 4;
        assert!(page_len(&monitors[..3], 0) as u64 > limit);

        let aggregate = AggregateResult::from_hosts(vec![telemetry_host("h1", monitors.clone())]);
        let created = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, limit)
            .expect("chunking succeeds");

        assert_eq!(created.page_count, 3);
        let pages = read_pages(&base, &created);
        let sizes = pages
            .iter()
            .map(|(_, page)| page.hosts[0].telemetry.monitors.len())
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_pagination_contract(&pages, &created.result_id);
        assert!(pages.iter().all(|(bytes, _)| *bytes as u64 <= limit));
    }

    #[test]
    fn concatenated_pages_reproduce_every_host_in_order() {
        let base = TempDir::new().expect("temp dir");
        let alpha = (0..17).map(|id| monitor(id, 10 + id * 3)).collect::<Vec<_>>();
        let beta = (0..9).map(|id| monitor(id, 40)).collect::<Vec<_>>();
        let aggregate = AggregateResult::from_hosts(vec![
            telemetry_host("alpha", alpha.clone()),
            HostEntry::failure(Some("down".to_string()), "connection refused"),
            telemetry_host("beta", beta.clone()),
        ]);
        let limit = 400;

        let created = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, limit)
            .expect("chunking succeeds");
        let pages = read_pages(&base, &created);

        assert!(created.page_count > 3);
        assert_pagination_contract(&pages, &created.result_id);
        assert!(pages.iter().all(|(bytes, _)| *bytes as u64 <= limit));

        let collect = |hostname: &str| {
            pages
                .iter()
                .flat_map(|(_, page)| page.hosts.iter())
                .filter(|host| host.hostname == hostname)
                .flat_map(|host| host.telemetry.monitors.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(collect("alpha"), alpha);
        assert_eq!(collect("beta"), beta);

        let down = pages
            .iter()
            .flat_map(|(_, page)| page.hosts.iter())
            .filter(|host| host.hostname == "down")
            .collect::<Vec<_>>();
        assert_eq!(down.len(), 1);
        assert!(down[0].telemetry.monitors.is_empty());
        assert_eq!(down[0].error_message.as_deref(), Some("connection refused"));

        let order = pages
            .iter()
            .map(|(_, page)| page.hosts[0].hostname.clone())
            .collect::<Vec<_>>();
        let first_beta = order.iter().position(|name| name == "beta").expect("beta page");
        assert!(order[..first_beta].iter().all(|name| name != "beta"));
        assert!(order[first_beta..].iter().all(|name| name == "beta"));
    }

    #[test]
    fn empty_aggregate_writes_single_empty_page() {
        let base = TempDir::new().expect("temp dir");
        let aggregate: AggregateResult<TelemetryPayload> = AggregateResult::from_hosts(vec![]);

        let created = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, 1_000)
            .expect("chunking succeeds");
        let pages = read_pages(&base, &created);

        assert_eq!(created.page_count, 1);
        assert!(pages[0].1.hosts.is_empty());
        assert!(!pages[0].1.has_more);
        assert_eq!(pages[0].1.next_result, None);
    }

    #[test]
    fn host_without_monitors_keeps_its_page_and_error() {
        let base = TempDir::new().expect("temp dir");
        let aggregate = AggregateResult::from_hosts(vec![
            HostEntry::success("idle", TelemetryPayload::with_error("host is not monitored")),
            HostEntry::null_hostname(),
        ]);

        let created = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, 1_000)
            .expect("chunking succeeds");
        let pages = read_pages(&base, &created);

        assert_eq!(created.page_count, 2);
        assert_eq!(pages[0].1.hosts[0].hostname, "idle");
        assert_eq!(pages[0].1.hosts[0].telemetry.total, 0);
        assert_eq!(
            pages[0].1.hosts[0].error_message.as_deref(),
            Some("host is not monitored")
        );
        assert_eq!(pages[1].1.hosts[0].hostname, "");
        assert_eq!(
            pages[1].1.hosts[0].error_message.as_deref(),
            Some("Hostname must not be null")
        );
        assert_pagination_contract(&pages, &created.result_id);
    }

    #[test]
    fn oversized_monitor_aborts_with_single_terminal_page() {
        let base = TempDir::new().expect("temp dir");
        let small = (0..6).map(|id| monitor(id, 30)).collect::<Vec<_>>();
        let aggregate = AggregateResult::from_hosts(vec![
            telemetry_host("first", small),
            telemetry_host("second", vec![monitor(0, 10), monitor(1, 5_000)]),
            telemetry_host("never-reached", vec![monitor(0, 1)]),
        ]);

        let created = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, 300)
            .expect("chunking returns terminal page");
        let pages = read_pages(&base, &created);

        assert_eq!(created.page_count, 1);
        let page = &pages[0].1;
        assert!(!page.has_more);
        assert_eq!(page.next_result, None);
        assert_eq!(page.hosts.len(), 1);
        assert_eq!(page.hosts[0].hostname, "second");
        assert_eq!(page.hosts[0].telemetry.total, 2);
        assert!(page.hosts[0].telemetry.monitors.is_empty());
        assert_eq!(
            page.hosts[0].error_message.as_deref(),
            Some(OVERSIZED_MONITOR_ERROR)
        );

        let files = fs::read_dir(result_dir(base.path(), &created.result_id))
            .expect("result dir")
            .count();
        assert_eq!(files, 1);
    }

    #[test]
    fn final_trailer_growth_moves_trailing_monitor_to_new_page() {
        let base = TempDir::new().expect("temp dir");
        let monitors = vec![monitor(0, 20), monitor(1, 20)];
        let limit = page_len(&monitors, 0) as u64;

        let aggregate = AggregateResult::from_hosts(vec![telemetry_host("h1", monitors.clone())]);
        let created = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, limit)
            .expect("chunking succeeds");
        let pages = read_pages(&base, &created);

        assert_eq!(created.page_count, 2);
        assert_eq!(pages[0].1.hosts[0].telemetry.monitors, monitors[..1].to_vec());
        assert_eq!(pages[1].1.hosts[0].telemetry.monitors, monitors[1..].to_vec());
        assert_pagination_contract(&pages, &created.result_id);
        assert!(pages.iter().all(|(bytes, _)| *bytes as u64 <= limit));
    }

    #[test]
    fn page_that_cannot_hold_minimal_content_is_chunking_failure() {
        let base = TempDir::new().expect("temp dir");
        let aggregate = AggregateResult::from_hosts(vec![HostEntry::success(
            "host-with-a-rather-long-name.example.com",
            TelemetryPayload::default(),
        )]);

        let err = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, 40)
            .expect_err("page cannot fit");
        assert!(matches!(
            err,
            ChunkError::PageTooLarge {
                context: "empty monitors page",
                ..
            }
        ));
        assert_eq!(fs::read_dir(base.path()).expect("base dir").count(), 0);
    }

    #[test]
    fn failed_run_removes_pages_already_written() {
        let base = TempDir::new().expect("temp dir");
        let aggregate = AggregateResult::from_hosts(vec![
            telemetry_host("h1", vec![monitor(0, 5), monitor(1, 5)]),
            HostEntry::success("h".repeat(300), TelemetryPayload::default()),
        ]);

        let err = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, 250)
            .expect_err("second host cannot fit");

        assert!(matches!(err, ChunkError::PageTooLarge { .. }));
        assert_eq!(fs::read_dir(base.path()).expect("base dir").count(), 0);
    }

    #[test]
    fn monitor_fitting_only_a_continued_page_gets_terminal_page() {
        let base = TempDir::new().expect("temp dir");
        let only = monitor(0, 40);
        let continued = ChunkPage {
            result_id: Uuid::nil().to_string(),
            hosts: vec![PageHost {
                hostname: "h1".to_string(),
                telemetry: PageTelemetry {
                    total: 1,
                    monitors: vec![only.clone()],
                },
                error_message: None,
            }],
            next_result: Some(1),
            has_more: true,
            error_message: None,
        };
        let limit = serde_json::to_vec(&continued).expect("serialize").len() as u64;

        let aggregate = AggregateResult::from_hosts(vec![telemetry_host("h1", vec![only])]);
        let created = ChunkWriter::new(base.path())
            .create_chunks(&aggregate, limit)
            .expect("terminal page instead of failure");
        let pages = read_pages(&base, &created);

        assert_eq!(created.page_count, 1);
        assert!(pages[0].1.hosts[0].telemetry.monitors.is_empty());
        assert_eq!(
            pages[0].1.hosts[0].error_message.as_deref(),
            Some(OVERSIZED_MONITOR_ERROR)
        );
    }

    #[test]
    fn unusable_base_dir_is_storage_failure() {
        let base = TempDir::new().expect("temp dir");
        let blocker = base.path().join("not-a-dir");
        fs::write(&blocker, b"file").expect("write blocker");

        let aggregate: AggregateResult<TelemetryPayload> = AggregateResult::from_hosts(vec![]);
        let err = ChunkWriter::new(&blocker)
            .create_chunks(&aggregate, 1_000)
            .expect_err("directory cannot be created");
        assert!(matches!(err, ChunkError::Storage { .. }));
    }

    #[test]
    fn every_call_gets_a_fresh_result_id() {
        let base = TempDir::new().expect("temp dir");
        let aggregate: AggregateResult<TelemetryPayload> = AggregateResult::from_hosts(vec![]);
        let writer = ChunkWriter::new(base.path());

        let first = writer.create_chunks(&aggregate, 1_000).expect("first");
        let second = writer.create_chunks(&aggregate, 1_000).expect("second");

        assert_ne!(first.result_id, second.result_id);
        assert!(Uuid::parse_str(&first.result_id).is_ok());
    }
}
