//! Argument normalisation shared by the multi-host tools

use std::time::Duration;

use crate::errors::AppError;

pub const MAX_HOSTNAMES: usize = 1_000;
pub const DEFAULT_REACHABILITY_POOL_SIZE: usize = 60;
pub const DEFAULT_REACHABILITY_PORT: u16 = 22;
pub const DEFAULT_REACHABILITY_TIMEOUT_SECS: u64 = 4;
pub const MAX_REACHABILITY_TIMEOUT_SECS: u64 = 60;

/// A positive request wins over the tool default; the result is never below one.
pub fn resolve_pool_size(requested: Option<u32>, default_pool_size: usize) -> usize {
    requested
        .filter(|size| *size > 0)
        .map(|size| size as usize)
        .unwrap_or(default_pool_size)
        .max(1)
}

/// Trims hostnames and turns blank entries into null slots, keeping positions intact.
pub fn normalize_hostnames(
    hostnames: Vec<Option<String>>,
) -> Result<Vec<Option<String>>, AppError> {
    if hostnames.is_empty() {
        return Err(AppError::bad_request(
            "missing_hostname",
            "hostname must list at least one host",
        ));
    }

    if hostnames.len() > MAX_HOSTNAMES {
        return Err(AppError::bad_request(
            "too_many_hostnames",
            format!("hostname must not list more than {MAX_HOSTNAMES} hosts"),
        ));
    }

    hostnames
        .into_iter()
        .map(|hostname| {
            let Some(value) = hostname else {
                return Ok(None);
            };

            let normalized = value.trim();
            if normalized.is_empty() {
                return Ok(None);
            }

            if !normalized.chars().all(|character| {
                character.is_ascii_alphanumeric()
                    || character == '-'
                    || character == '_'
                    || character == '.'
                    || character == ':'
                    || character == '['
                    || character == ']'
            }) {
                return Err(AppError::bad_request(
                    "invalid_hostname",
                    "hostname must contain only alphanumeric characters, dashes, underscores, dots, colons and brackets",
                ));
            }

            Ok(Some(normalized.to_string()))
        })
        .collect()
}

pub fn normalize_timeout(timeout_secs: Option<u64>) -> Result<Duration, AppError> {
    let seconds = timeout_secs.unwrap_or(DEFAULT_REACHABILITY_TIMEOUT_SECS);
    if seconds == 0 || seconds > MAX_REACHABILITY_TIMEOUT_SECS {
        return Err(AppError::bad_request(
            "invalid_timeout",
            format!("timeout_secs must be between 1 and {MAX_REACHABILITY_TIMEOUT_SECS}"),
        ));
    }
    Ok(Duration::from_secs(seconds))
}

pub fn normalize_port(port: Option<u16>) -> Result<u16, AppError> {
    match port.unwrap_or(DEFAULT_REACHABILITY_PORT) {
        0 => Err(AppError::bad_request(
            "invalid_port",
            "port must be between 1 and 65535",
        )),
        port => Ok(port),
    }
}
