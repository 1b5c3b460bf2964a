//! Axum handlers for health, discovery and the MCP endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::domain::tools::build_tools_list;
use crate::mcp::rpc::json_rpc_error;
use crate::mcp::server::handle_json_rpc_value;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
    pub tools: Vec<String>,
    pub max_tool_output_bytes: u64,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: "/mcp",
        tools: build_tools_list()
            .into_iter()
            .map(|tool| tool.name)
            .collect(),
        max_tool_output_bytes: state.output_byte_limit,
    })
}

pub async fn mcp_endpoint(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json_rpc_error(None, -32700, "Parse error")),
            )
                .into_response()
        }
    };

    let Value::Array(batch) = payload else {
        return match handle_json_rpc_value(&state, payload).await {
            Some(response) => (StatusCode::OK, Json(response)).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        };
    };

    if batch.is_empty() {
        return (
            StatusCode::OK,
            Json(vec![json_rpc_error(None, -32600, "Invalid Request")]),
        )
            .into_response();
    }

    // Batch members run concurrently; responses keep request order.
    let responses = join_all(
        batch
            .into_iter()
            .map(|item| handle_json_rpc_value(&state, item)),
    )
    .await
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    if responses.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    (StatusCode::OK, Json(Value::Array(responses))).into_response()
}
