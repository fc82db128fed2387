use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use fanout_auth::{CredentialVerifier, JwtVerifier};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod cli;
mod config;
mod handlers;
mod metrics;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::config::{
    AuthConfig, FileConfig, HubConfig, Profile, PumpConfig, ServerConfig, load_config,
};
use crate::metrics::ServerMetrics;
use crate::ws::{Hub, HubHandle};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "fanout")]
#[command(about = "Authenticated WebSocket broadcast hub")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = "fanout.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub server in the foreground
    Server(ServerArgs),

    /// Mint a bearer token for a user
    Token(TokenArgs),

    /// Connect to a hub and print everything it broadcasts
    Listen(ListenArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Configuration profile
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct TokenArgs {
    /// User the token identifies
    username: String,
}

#[derive(Parser)]
struct ListenArgs {
    /// WebSocket URL, e.g. ws://127.0.0.1:8000/ws
    url: String,

    /// Bearer token sent as the first frame
    #[arg(long)]
    token: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Handle to the hub actor
    pub hub: HubHandle,
    /// Verifies bearer credentials for WebSocket and HTTP callers
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Per-connection limits and deadlines
    pub pump_config: Arc<PumpConfig>,
    /// Listener configuration
    pub server_config: Arc<ServerConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args, &cli.config).await,
        Commands::Token(args) => cli::token_command(&cli.config, &args.username),
        Commands::Listen(args) => cli::listen_command(&args.url, &args.token).await,
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    let ws_path = state.server_config.ws_path.clone();
    Router::new()
        .route(&ws_path, get(handlers::websocket_handler))
        .route("/api/broadcast", post(handlers::broadcast_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServerArgs, config_path: &std::path::Path) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "fanout=debug,tower_http=debug,info"
    } else {
        "fanout=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting fanout hub");

    let mut file_config: FileConfig = load_config(config_path, args.profile.as_ref())
        .extract()
        .context("Failed to load configuration")?;
    if let Some(host) = args.host {
        file_config.server.host = Some(host);
    }
    if let Some(port) = args.port {
        file_config.server.port = Some(port);
    }

    let server_config = Arc::new(ServerConfig::from_file(&file_config.server)?);
    let pump_config = Arc::new(PumpConfig::from_file(&file_config.websocket)?);
    let hub_config = HubConfig::from_file(&file_config.hub)?;
    let auth_config = AuthConfig::from_file(&file_config.auth)?;

    info!(
        "Pump config: heartbeat={}s, read_timeout={}s, write_timeout={}s, auth_timeout={}s, queue={}, max_frame={}B",
        pump_config.heartbeat_interval.as_secs(),
        pump_config.read_timeout.as_secs(),
        pump_config.write_timeout.as_secs(),
        pump_config.auth_timeout.as_secs(),
        pump_config.outbound_queue_capacity,
        pump_config.max_frame_bytes
    );

    let verifier = JwtVerifier::new(auth_config.signing_key.as_bytes(), auth_config.leeway_secs)
        .context("Failed to build credential verifier")?;

    // Initialize metrics
    let metrics = Arc::new(ServerMetrics::new());
    let hub = Hub::spawn(hub_config, metrics.clone());

    let app_state = AppState {
        hub,
        verifier: Arc::new(verifier),
        pump_config,
        server_config: server_config.clone(),
        metrics,
    };
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(server_config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.addr))?;
    let actual_addr = listener.local_addr()?;

    info!("fanout listening on http://{}", actual_addr);
    info!("Endpoints:");
    info!("  GET    {}               - WebSocket (first frame: bearer token)", server_config.ws_path);
    info!("  POST   /api/broadcast    - Broadcast request body to all clients");
    info!("  GET    /health           - Health status");
    info!("  GET    /metrics          - Metrics snapshot");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, closing connections...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Shutdown complete");
    server_result
}
