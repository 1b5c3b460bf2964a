//! Swaps oversized tool results for a manifest pointing at stored pages

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::chunking::ChunkWriter;
use crate::domain::aggregate::{AggregateResult, TelemetryPayload};
use crate::errors::AppError;

pub const FETCH_CHUNK_TOOL: &str = "fetch_response_chunk";

const MANIFEST_DESCRIPTION: &str = "Tool output was chunked. Call fetch_response_chunk(result_id, result_number) starting at 0. \
Continue calling it with next_result while has_more is true. Stop when has_more is false.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseManifest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub result_id: String,
    pub tool: &'static str,
    pub first_result_number: usize,
    pub page_count: usize,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Inline(Value),
    Chunked(ResponseManifest),
}

/// Returns the aggregate as-is when its encoding fits `byte_limit`, otherwise pages it
/// to disk and returns the manifest. Page writing runs on the blocking pool.
pub async fn adapt_telemetry_output(
    writer: &ChunkWriter,
    byte_limit: u64,
    tool_name: &str,
    aggregate: AggregateResult<TelemetryPayload>,
) -> Result<ToolOutput, AppError> {
    let encoded = serde_json::to_vec(&aggregate)
        .map_err(|err| AppError::internal(format!("failed to encode tool output: {err}")))?;
    if encoded.len() as u64 <= byte_limit {
        let value = serde_json::from_slice(&encoded)
            .map_err(|err| AppError::internal(format!("failed to re-read tool output: {err}")))?;
        return Ok(ToolOutput::Inline(value));
    }

    let writer = writer.clone();
    let created = tokio::task::spawn_blocking(move || writer.create_chunks(&aggregate, byte_limit))
        .await
        .map_err(|err| AppError::internal(format!("chunk writer task failed: {err}")))??;

    info!(
        tool = %tool_name,
        size_bytes = encoded.len(),
        authorized_limit_bytes = byte_limit,
        result_id = %created.result_id,
        page_count = created.page_count,
        "tool output is oversized, chunked into pages"
    );

    Ok(ToolOutput::Chunked(ResponseManifest {
        kind: "response_manifest",
        result_id: created.result_id,
        tool: FETCH_CHUNK_TOOL,
        first_result_number: 0,
        page_count: created.page_count,
        description: MANIFEST_DESCRIPTION,
    }))
}
