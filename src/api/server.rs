use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::{services, state::AppState};
use crate::config::Config;
use crate::queue::JobBroker;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How long shutdown waits for the dispatcher to finish its current job
const DISPATCHER_GRACE: Duration = Duration::from_secs(5);

/// Build the application router with all routes and middleware
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_payload_bytes.as_usize();
    let cors_permissive = state.config.server.cors_permissive;

    let router = Router::new()
        .route("/health", get(services::health))
        .route("/api/thumbnail", post(services::thumbnail))
        .route("/api/preview", post(services::preview))
        .route("/api/preview/stream", get(services::preview_stream))
        .route("/api/download", post(services::download))
        .route("/api/queue/add", post(services::queue_add))
        .route("/api/queue", get(services::queue))
        .route(
            "/api/jobs/{id}",
            get(services::get_job).delete(services::cancel_job),
        )
        .route("/api/jobs/{id}/file", get(services::job_file))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        // Any origin, method and header; credentials stay disallowed
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);
    info!(
        output_dir = %config.downloads.output_dir.display(),
        binary = %config.ytdlp.binary,
        "Initializing services"
    );

    let state = AppState::from_config(config)
        .map_err(|e| format!("Failed to initialize HTTP client: {e}"))?;
    let broker = Arc::clone(&state.broker);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "vidqueue API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&broker)))
        .await?;

    if tokio::time::timeout(DISPATCHER_GRACE, broker.join()).await.is_err() {
        warn!("Dispatcher still busy, exiting without waiting");
    }

    Ok(())
}

async fn shutdown_signal(broker: Arc<JobBroker>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    broker.shutdown();
}
