use std::{fs, sync::Arc};

use multihost_probe_mcp::{
    build_app,
    chunking::ChunkReader,
    config::Config,
    logging,
    probes::{SnapshotTelemetryProvider, TcpReachabilityProbe, TelemetryProvider},
    AppState,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    fs::create_dir_all(&config.chunking.base_dir)?;

    let telemetry_provider: Option<Arc<dyn TelemetryProvider>> =
        match config.monitor_snapshot_path.as_deref() {
            Some(path) => {
                info!(path = %path.display(), "loading monitor snapshot");
                Some(Arc::new(SnapshotTelemetryProvider::from_file(path)?))
            }
            None => {
                warn!("MONITOR_SNAPSHOT_PATH is not set, get_host_telemetry is unavailable");
                None
            }
        };

    let (chunk_reader, _cleanup_task) =
        ChunkReader::spawn(config.chunking.base_dir.clone(), config.chunking.cleanup_delay);
    let bind_socket = config.bind_socket()?;
    let state = AppState::new(
        config.api_token.clone(),
        config.default_pool_size,
        &config.chunking,
        Arc::new(TcpReachabilityProbe::new()),
        telemetry_provider,
        Arc::new(chunk_reader),
    );
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        chunk_dir = %config.chunking.base_dir.display(),
        output_byte_limit = config.chunking.byte_limit(),
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
