use std::{collections::HashMap, fs, path::Path, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{net::TcpStream, time::Instant};

use crate::{
    domain::aggregate::{MonitorRecord, TelemetryPayload},
    errors::AppError,
};

pub const HOSTNAME_NOT_MONITORED: &str =
    "is not currently monitored, configure it as a resource to begin monitoring";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReachabilityReport {
    pub hostname: String,
    pub port: u16,
    pub reachable: bool,
    pub response_time_ms: Option<u64>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// Source of monitor records for a host.
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    async fn host_telemetry(&self, hostname: &str) -> Result<TelemetryPayload, AppError>;
}

/// Checks whether a host answers on a port. Implementations must honour `timeout`.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(
        &self,
        hostname: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ReachabilityReport, AppError>;
}

#[derive(Debug, Default)]
pub struct TcpReachabilityProbe;

impl TcpReachabilityProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReachabilityProbe for TcpReachabilityProbe {
    async fn check(
        &self,
        hostname: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ReachabilityReport, AppError> {
        let started_at = Instant::now();
        let outcome = tokio::time::timeout(timeout, TcpStream::connect((hostname, port))).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        let (reachable, response_time_ms, error_message) = match outcome {
            Ok(Ok(_stream)) => (true, Some(elapsed_ms), None),
            Ok(Err(err)) => (false, None, Some(format!("connection failed: {err}"))),
            Err(_) => (
                false,
                None,
                Some(format!("no answer within {}s", timeout.as_secs_f64())),
            ),
        };

        Ok(ReachabilityReport {
            hostname: hostname.to_string(),
            port,
            reachable,
            response_time_ms,
            error_message,
        })
    }
}

/// Serves monitors from a JSON snapshot mapping hostnames to monitor arrays.
#[derive(Debug, Default)]
pub struct SnapshotTelemetryProvider {
    hosts: HashMap<String, Vec<MonitorRecord>>,
}

impl SnapshotTelemetryProvider {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read(path).map_err(|err| {
            AppError::internal(format!(
                "failed to read monitor snapshot {}: {err}",
                path.display()
            ))
        })?;
        let hosts: HashMap<String, Vec<MonitorRecord>> =
            serde_json::from_slice(&raw).map_err(|err| {
                AppError::internal(format!(
                    "monitor snapshot {} is not a hostname to monitors map: {err}",
                    path.display()
                ))
            })?;

        Ok(Self::from_hosts(hosts))
    }

    pub fn from_hosts(hosts: HashMap<String, Vec<MonitorRecord>>) -> Self {
        Self {
            hosts: hosts
                .into_iter()
                .map(|(hostname, monitors)| (hostname.to_ascii_lowercase(), monitors))
                .collect(),
        }
    }
}

#[async_trait]
impl TelemetryProvider for SnapshotTelemetryProvider {
    async fn host_telemetry(&self, hostname: &str) -> Result<TelemetryPayload, AppError> {
        Ok(match self.hosts.get(&hostname.to_ascii_lowercase()) {
            Some(monitors) => TelemetryPayload::with_monitors(monitors.clone()),
            None => TelemetryPayload::with_error(format!(
                "The hostname {hostname} {HOSTNAME_NOT_MONITORED}"
            )),
        })
    }
}
