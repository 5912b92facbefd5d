//! Application startup and lifecycle management.

use crate::config::GenerationConfig;
use crate::handlers::generate::generate;
use crate::handlers::health::{healthz, heathz};
use crate::services::providers::replicate::ReplicateClientFactory;
use crate::services::providers::ModelClientFactory;
use crate::services::ArtifactFetcher;
use axum::body::Body;
use axum::http::HeaderValue;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::{
    make_request_span, request_id_middleware, security_headers_middleware,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GenerationConfig>,
    /// `None` when no model provider is wired into this deployment.
    pub models: Option<Arc<dyn ModelClientFactory>>,
    pub fetcher: ArtifactFetcher,
}

impl AppState {
    pub fn new(
        config: GenerationConfig,
        models: Option<Arc<dyn ModelClientFactory>>,
    ) -> Result<Self, AppError> {
        let fetcher = ArtifactFetcher::new(config.fetch_timeout())?;
        Ok(Self {
            config: Arc::new(config),
            models,
            fetcher,
        })
    }
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let cors = cors_layer(state.config.cors_origin.as_deref())?;

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/heathz", get(heathz))
        .route("/", post(generate))
        .route("/api/generate", post(generate))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
        .layer(from_fn(request_id_middleware))
        .with_state(state))
}

/// CORS for browser clients. `None` or `*` allows any origin.
fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, AppError> {
    let allow_origin = match origin.map(str::trim) {
        None | Some("") | Some("*") => AllowOrigin::any(),
        Some(origin) => {
            let value = origin.parse::<HeaderValue>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", origin, e))
            })?;
            AllowOrigin::exact(value)
        }
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: GenerationConfig) -> Result<Self, AppError> {
        let factory: Arc<dyn ModelClientFactory> =
            Arc::new(ReplicateClientFactory::new(config.replicate.clone()));

        if config.replicate.api_token.is_none() {
            tracing::warn!("REPLICATE_API_TOKEN is not set; generation requests will fail");
        }

        let address = config.common.address();
        let state = AppState::new(config, Some(factory))?;
        let router = build_router(state)?;

        // Port 0 binds a random port for testing
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Generation service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
