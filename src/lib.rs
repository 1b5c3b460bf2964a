use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod chunking;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod probes;

use chunking::{ChunkReader, ChunkWriter};
use config::ChunkingConfig;
use probes::{ReachabilityProbe, TelemetryProvider};

#[derive(Clone)]
pub struct AppState {
    pub api_token: Arc<str>,
    pub default_pool_size: usize,
    /// Serialized tool output above this many bytes is chunked.
    pub output_byte_limit: u64,
    pub reachability_probe: Arc<dyn ReachabilityProbe>,
    pub telemetry_provider: Option<Arc<dyn TelemetryProvider>>,
    pub chunk_writer: ChunkWriter,
    pub chunk_reader: Arc<ChunkReader>,
}

impl AppState {
    pub fn new(
        api_token: String,
        default_pool_size: usize,
        chunking: &ChunkingConfig,
        reachability_probe: Arc<dyn ReachabilityProbe>,
        telemetry_provider: Option<Arc<dyn TelemetryProvider>>,
        chunk_reader: Arc<ChunkReader>,
    ) -> Self {
        Self {
            api_token: Arc::<str>::from(api_token),
            default_pool_size,
            output_byte_limit: chunking.byte_limit(),
            reachability_probe,
            telemetry_provider,
            chunk_writer: ChunkWriter::new(chunking.base_dir.clone()),
            chunk_reader,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/mcp", post(http::handlers::mcp_endpoint))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
