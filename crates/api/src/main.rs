//! `promptdeck-api` -- HTTP front end over the generation pipeline.
//!
//! Configuration comes from the environment; see `ServerConfig::from_env`.

use std::net::SocketAddr;
use std::sync::Arc;

use promptdeck_comfyui::transport::{ComfyUITransport, Transport};
use promptdeck_core::template::TemplateStore;
use promptdeck_pipeline::Orchestrator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promptdeck_api::app::build_app;
use promptdeck_api::config::ServerConfig;
use promptdeck_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "promptdeck_api=debug,promptdeck_pipeline=info,promptdeck_comfyui=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("Invalid server configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        backend = %config.backend.server_address,
        workflow = %config.backend.workflow_path.display(),
        "Loaded server configuration",
    );

    let templates = TemplateStore::open(
        config.backend.workflow_path.clone(),
        config.backend.template_reload,
    )
    .expect("Failed to load workflow template");

    // One transport for the whole process; its socket is shared by every request.
    let transport = Arc::new(ComfyUITransport::from_config(&config.backend));
    let backend: Arc<dyn Transport> = transport.clone();
    let orchestrator = Orchestrator::new(backend, templates)
        .with_default_timeout(config.backend.generation_timeout);
    tracing::info!(session_id = %orchestrator.session_id(), "Orchestrator ready");

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let state = AppState {
        config: Arc::new(config),
        orchestrator: Arc::new(orchestrator),
    };
    let app = build_app(state).expect("Invalid HTTP configuration");

    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    transport.shutdown().await;
    tracing::info!("Server stopped");
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.expect("Failed to install Ctrl-C handler");
                tracing::info!("SIGINT received, draining connections");
            }
            _ = term.recv() => tracing::info!("SIGTERM received, draining connections"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to install Ctrl-C handler");
        tracing::info!("Ctrl-C received, draining connections");
    }
}
