use std::sync::Arc;

use axum::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use agent_hub::config::HubConfig;
use agent_hub::connections::{ConnectionRegistry, HubState, MessageSink, hub_routes, spawn_message_pump};
use agent_hub::dispatch::{LoopbackExecutor, TaskDispatcher};

#[tokio::main]
async fn main() -> agent_hub::error::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = HubConfig::from_env()?;

    eprintln!("🛰  Agent Hub v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   WebSocket: ws://0.0.0.0:{}/ws/{{client_id}}", config.port);
    eprintln!("   Connections: http://0.0.0.0:{}/api/connections", config.port);
    eprintln!("   Files root: {}", config.files_root.display());

    tokio::fs::create_dir_all(&config.files_root).await?;

    // ── Registry + message pump ─────────────────────────────────────────
    let registry = ConnectionRegistry::new();
    let (sink, queue) = MessageSink::channel();
    let _pump_handle = spawn_message_pump(Arc::clone(&registry), queue);

    // ── Dispatcher ──────────────────────────────────────────────────────
    let dispatcher = Arc::new(TaskDispatcher::new(
        Arc::new(LoopbackExecutor),
        sink,
        config.files_root.clone(),
    ));

    let shutdown = CancellationToken::new();
    let state = HubState {
        registry: Arc::clone(&registry),
        dispatcher,
        files_root: config.files_root.clone(),
        shutdown: shutdown.clone(),
    };

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let app = hub_routes(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Hub server started");

    // Sockets are closed before the server drains, so upgraded connections
    // never hold up shutdown.
    let closing = Arc::clone(&registry);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
            shutdown.cancel();
            closing.disconnect_all().await;
        })
        .await?;

    tracing::info!("Hub server stopped");

    Ok(())
}
