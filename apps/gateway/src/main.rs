use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_gateway::backend::{ChatBackend, HttpBackend};
use chat_gateway::config::Config;
use chat_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(%e, "invalid configuration");
            std::process::exit(1);
        }
    };
    let port = config.port;

    let backend: Arc<dyn ChatBackend> = match HttpBackend::from_config(&config) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::error!(%e, "failed to build backend client");
            std::process::exit(1);
        }
    };

    tracing::info!(
        backend_url = %config.backend_url,
        ping_period = ?config.ping_period,
        pong_wait = ?config.pong_wait,
        "chat-gateway configured"
    );

    let app = chat_gateway::app(AppState::new(config, backend));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("chat-gateway stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(%e, "failed to listen for shutdown signal");
    }
}
