//! Multi-host result types shared by the executor, the tools and the chunk writer

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error reported for a request slot whose hostname was null or blank.
pub const NULL_HOSTNAME_ERROR: &str = "Hostname must not be null";

/// Outcome of one probe for one requested hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEntry<T> {
    pub hostname: Option<String>,
    pub payload: Option<T>,
    pub error: Option<String>,
}

impl<T> HostEntry<T> {
    pub fn success(hostname: impl Into<String>, payload: T) -> Self {
        Self {
            hostname: Some(hostname.into()),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(hostname: Option<String>, error: impl Into<String>) -> Self {
        Self {
            hostname,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Placeholder keeping positional alignment for a null hostname slot.
    pub fn null_hostname() -> Self {
        Self::failure(None, NULL_HOSTNAME_ERROR)
    }
}

/// Ordered per-host results of one tool invocation.
///
/// `hosts` lines up with the requested hostnames unless `error` is set, in which
/// case the batch never started and `hosts` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult<T> {
    pub hosts: Vec<HostEntry<T>>,
    #[serde(rename = "topLevelError")]
    pub error: Option<String>,
}

impl<T> AggregateResult<T> {
    pub fn from_hosts(hosts: Vec<HostEntry<T>>) -> Self {
        Self { hosts, error: None }
    }

    pub fn batch_error(message: impl Into<String>) -> Self {
        Self {
            hosts: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// One monitored entity. Chunking treats it as indivisible and never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorRecord(pub Value);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub total: u64,
    pub monitors: Vec<MonitorRecord>,
}

impl TelemetrySnapshot {
    pub fn from_monitors(monitors: Vec<MonitorRecord>) -> Self {
        Self {
            total: monitors.len() as u64,
            monitors,
        }
    }
}

/// Per-host payload of the telemetry tools, the only payload the chunk writer slices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub telemetry: Option<TelemetrySnapshot>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

impl TelemetryPayload {
    pub fn with_monitors(monitors: Vec<MonitorRecord>) -> Self {
        Self {
            telemetry: Some(TelemetrySnapshot::from_monitors(monitors)),
            error_message: None,
        }
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            telemetry: None,
            error_message: Some(message.into()),
        }
    }
}
