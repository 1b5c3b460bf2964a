//! Multi-host tools exposed via Model Context Protocol
//!
//! Every host-facing tool fans out through the bounded executor. Telemetry results
//! that outgrow the output budget are paged to disk and replaced by a manifest,
//! which `fetch_response_chunk` then walks.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rust_mcp_sdk::{
    macros,
    schema::{CallToolRequestParams, CallToolResult, ContentBlock, TextContent, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::domain::{
    aggregate::{AggregateResult, HostEntry},
    executor::execute_for_hosts,
    output::{adapt_telemetry_output, ToolOutput, FETCH_CHUNK_TOOL},
    utils::{
        normalize_hostnames, normalize_port, normalize_timeout, resolve_pool_size,
        DEFAULT_REACHABILITY_POOL_SIZE,
    },
};
use crate::mcp::rpc::{
    app_error_to_json_rpc, json_rpc_error, json_rpc_error_with_data, json_rpc_result,
};
use crate::{errors::AppError, AppState};

pub const CHECK_REACHABILITY_TOOL: &str = "check_host_reachability";
pub const HOST_TELEMETRY_TOOL: &str = "get_host_telemetry";

const TELEMETRY_NOT_CONFIGURED: &str =
    "No telemetry source is configured. Set MONITOR_SNAPSHOT_PATH to enable get_host_telemetry.";

#[macros::mcp_tool(
    name = "check_host_reachability",
    description = "Check whether each listed host accepts TCP connections on a port"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CheckHostReachabilityTool {
    /// Null entries are reported back as per-host errors.
    pub hostname: Vec<Option<String>>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub pool_size: Option<u32>,
}

#[macros::mcp_tool(
    name = "get_host_telemetry",
    description = "Collect monitor telemetry for each listed host. Large results return a response_manifest to page through with fetch_response_chunk"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetHostTelemetryTool {
    pub hostname: Vec<Option<String>>,
    pub pool_size: Option<u32>,
}

#[macros::mcp_tool(
    name = "fetch_response_chunk",
    description = "Fetch one page of a chunked tool result by result_id and result_number, starting at 0"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct FetchResponseChunkTool {
    pub result_id: String,
    pub result_number: Option<i64>,
}

pub fn build_tools_list() -> Vec<Tool> {
    vec![
        CheckHostReachabilityTool::tool(),
        GetHostTelemetryTool::tool(),
        FetchResponseChunkTool::tool(),
    ]
}

pub async fn handle_tools_call(
    state: &AppState,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };
    let arguments = json!(tool_call.arguments.unwrap_or_default());

    match tool_call.name.as_str() {
        CHECK_REACHABILITY_TOOL => {
            let Ok(params) = serde_json::from_value::<CheckHostReachabilityTool>(arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            match check_reachability(state, params).await {
                Ok(result) => json_rpc_result(id, result),
                Err(err) => app_error_to_json_rpc(id, err),
            }
        }
        HOST_TELEMETRY_TOOL => {
            let Ok(params) = serde_json::from_value::<GetHostTelemetryTool>(arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            match host_telemetry(state, params).await {
                Ok(result) => json_rpc_result(id, result),
                Err(err @ AppError::Internal { .. }) => json_rpc_result(id, tool_failure(&err)),
                Err(err) => app_error_to_json_rpc(id, err),
            }
        }
        FETCH_CHUNK_TOOL => {
            let Ok(params) = serde_json::from_value::<FetchResponseChunkTool>(arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            match fetch_chunk(state, params).await {
                Ok(result) => json_rpc_result(id, result),
                Err(err) => json_rpc_result(id, tool_failure(&err)),
            }
        }
        _ => json_rpc_error_with_data(
            id,
            -32601,
            "Method not found",
            Some(json!({
                "code": "tool_not_found",
                "message": "unknown tool name",
                "details": {
                    "name": tool_call.name,
                },
            })),
        ),
    }
}

async fn check_reachability(state: &AppState, params: CheckHostReachabilityTool) -> Result<Value, AppError> {
    let hostnames = normalize_hostnames(params.hostname)?;
    let port = normalize_port(params.port)?;
    let timeout = normalize_timeout(params.timeout_secs)?;
    let pool_size = resolve_pool_size(params.pool_size, DEFAULT_REACHABILITY_POOL_SIZE);

    let probe = Arc::clone(&state.reachability_probe);
    let aggregate = execute_for_hosts(
        hostnames,
        move |hostname: String| {
            let probe = Arc::clone(&probe);
            async move {
                probe
                    .check(&hostname, port, timeout)
                    .await
                    .map_err(|err| err.message().to_string())
            }
        },
        HostEntry::null_hostname,
        pool_size,
    )
    .await;

    let total = aggregate.hosts.len();
    let reachable = aggregate
        .hosts
        .iter()
        .filter(|entry| entry.payload.as_ref().is_some_and(|report| report.reachable))
        .count();

    tool_result(
        format!("Checked {total} hosts on port {port}, {reachable} reachable"),
        &aggregate,
    )
}

async fn host_telemetry(state: &AppState, params: GetHostTelemetryTool) -> Result<Value, AppError> {
    let hostnames = normalize_hostnames(params.hostname)?;

    let Some(provider) = state.telemetry_provider.clone() else {
        warn!(tool = HOST_TELEMETRY_TOOL, "telemetry requested without a configured source");
        let aggregate = AggregateResult::<Value>::batch_error(TELEMETRY_NOT_CONFIGURED);
        return tool_result(TELEMETRY_NOT_CONFIGURED.to_string(), &aggregate);
    };

    let pool_size = resolve_pool_size(params.pool_size, state.default_pool_size);
    let aggregate = execute_for_hosts(
        hostnames,
        move |hostname: String| {
            let provider = Arc::clone(&provider);
            async move {
                provider
                    .host_telemetry(&hostname)
                    .await
                    .map_err(|err| err.message().to_string())
            }
        },
        HostEntry::null_hostname,
        pool_size,
    )
    .await;
    let total = aggregate.hosts.len();

    match adapt_telemetry_output(
        &state.chunk_writer,
        state.output_byte_limit,
        HOST_TELEMETRY_TOOL,
        aggregate,
    )
    .await?
    {
        ToolOutput::Inline(value) => {
            tool_result(format!("Collected telemetry for {total} hosts"), &value)
        }
        ToolOutput::Chunked(manifest) => tool_result(
            format!(
                "Telemetry for {total} hosts was split into {} pages under result_id {}. {}",
                manifest.page_count, manifest.result_id, manifest.description
            ),
            &manifest,
        ),
    }
}

async fn fetch_chunk(state: &AppState, params: FetchResponseChunkTool) -> Result<Value, AppError> {
    let reader = Arc::clone(&state.chunk_reader);
    let page = tokio::task::spawn_blocking(move || {
        reader.fetch(params.result_id.trim(), params.result_number)
    })
    .await
    .map_err(|err| AppError::internal(format!("chunk reader task failed: {err}")))??;

    let summary = match (&page.error_message, page.next_result) {
        (Some(message), _) => message.clone(),
        (None, Some(next)) => format!(
            "Returned {} hosts, call fetch_response_chunk with result_number {next} for more",
            page.hosts.len()
        ),
        (None, None) => format!("Returned {} hosts, this is the last page", page.hosts.len()),
    };

    tool_result(summary, &page)
}

fn tool_result(summary: String, content: &impl Serialize) -> Result<Value, AppError> {
    let mut structured = match serde_json::to_value(content) {
        Ok(Value::Object(map)) => map,
        Ok(other) => Map::from_iter([("result".to_string(), other)]),
        Err(err) => {
            return Err(AppError::internal(format!(
                "failed to encode tool result: {err}"
            )))
        }
    };
    structured.insert(
        "generated_at_utc".to_string(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    serde_json::to_value(CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(summary, None, None))],
        is_error: None,
        meta: None,
        structured_content: Some(structured),
    })
    .map_err(|err| AppError::internal(format!("failed to encode tool result: {err}")))
}

/// Failures past argument validation are reported inside the tool result.
fn tool_failure(err: &AppError) -> Value {
    error!(code = err.code(), error = %err.message(), "tool call failed");

    serde_json::to_value(CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(
            format!("{}: {}", err.code(), err.message()),
            None,
            None,
        ))],
        is_error: Some(true),
        meta: None,
        structured_content: Some(Map::from_iter([
            ("code".to_string(), json!(err.code())),
            ("message".to_string(), json!(err.message())),
        ])),
    })
    .unwrap_or_else(|_| json!({ "isError": true, "content": [] }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_list_names_every_tool() {
        let names = build_tools_list()
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>();

        assert_eq!(
            names,
            vec![CHECK_REACHABILITY_TOOL, HOST_TELEMETRY_TOOL, FETCH_CHUNK_TOOL]
        );
    }

    #[test]
    fn reachability_params_accept_null_hostnames() {
        let params: CheckHostReachabilityTool = serde_json::from_value(json!({
            "hostname": ["web-01", null, ""],
            "pool_size": 2
        }))
        .expect("params parse");

        assert_eq!(
            params.hostname,
            vec![Some("web-01".to_string()), None, Some(String::new())]
        );
        assert_eq!(params.port, None);
    }

    #[test]
    fn reachability_schema_matches_accepted_arguments() {
        let tool = serde_json::to_value(CheckHostReachabilityTool::tool()).expect("tool json");
        let properties = &tool["inputSchema"]["properties"];

        assert_eq!(properties["hostname"]["type"], "array");
        assert_eq!(properties["hostname"]["items"]["type"], "string");
        assert_eq!(properties["hostname"]["items"]["nullable"], true);
        assert_eq!(properties["port"]["type"], "integer");
        assert_eq!(properties["timeout_secs"]["type"], "integer");

        let out_of_range = serde_json::from_value::<CheckHostReachabilityTool>(json!({
            "hostname": ["web-01"],
            "port": 70000
        }));
        assert!(out_of_range.is_err());
    }

    #[test]
    fn telemetry_arguments_accept_null_hostnames() {
        let params: GetHostTelemetryTool = serde_json::from_value(json!({
            "hostname": [null, "db-01"]
        }))
        .expect("params parse");

        assert_eq!(params.hostname, vec![None, Some("db-01".to_string())]);
        assert_eq!(params.pool_size, None);
    }

    #[test]
    fn tool_result_appends_generation_time() {
        let value = tool_result("ok".to_string(), &json!({ "hosts": [] })).expect("result");

        assert_eq!(value["content"][0]["text"], "ok");
        assert!(value["structuredContent"]["generated_at_utc"].is_string());
        assert_eq!(value["structuredContent"]["hosts"], json!([]));
    }

    #[test]
    fn tool_failure_is_flagged_as_error() {
        let value = tool_failure(&AppError::internal("disk full"));

        assert_eq!(value["isError"], true);
        assert_eq!(value["structuredContent"]["code"], "internal_error");
        assert_eq!(value["content"][0]["text"], "internal_error: disk full");
    }
}
