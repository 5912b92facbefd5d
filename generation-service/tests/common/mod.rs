//! Shared setup for generation-service integration tests.

#![allow(dead_code)]

use axum::{routing::get, Router};
use generation_service::config::GenerationConfig;
use generation_service::services::providers::mock::{MockModelClient, MockModelClientFactory};
use generation_service::services::providers::ModelClientFactory;
use generation_service::{build_router, AppState};
use secrecy::Secret;
use service_core::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const BASE_MODEL: &str = "google/nano-banana";
pub const UPSCALER_MODEL: &str = "recraft-ai/recraft-crisp-upscale";

/// 1x1 transparent PNG.
pub const TINY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub const GENERATED_BYTES: &[u8] = b"\x89PNG\r\n\x1a\ngenerated";

pub fn test_config() -> GenerationConfig {
    let mut config = GenerationConfig::default();
    config.common.host = "127.0.0.1".to_string();
    config.common.port = 0;
    config.replicate.api_token = Some(Secret::new("test-token".to_string()));
    config.retry = RetryPolicy {
        delays: vec![Duration::from_millis(1); 4],
        ..Default::default()
    };
    config
}

/// Serve the generated image at `/final.png`; returns the server base URL.
pub async fn spawn_artifact_server() -> String {
    let app = Router::new()
        .route("/final.png", get(|| async { GENERATED_BYTES.to_vec() }))
        .route(
            "/gone.png",
            get(|| async { axum::http::StatusCode::GONE }),
        );

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind artifact server");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}", addr)
}

pub struct TestApp {
    pub router: Router,
    pub client: Arc<MockModelClient>,
    pub factory: Arc<MockModelClientFactory>,
}

impl TestApp {
    pub fn new(config: GenerationConfig, client: MockModelClient) -> Self {
        let client = Arc::new(client);
        let factory = Arc::new(MockModelClientFactory::new(client.clone()));
        let models: Arc<dyn ModelClientFactory> = factory.clone();
        let state = AppState::new(config, Some(models)).expect("Failed to build state");
        let router = build_router(state).expect("Failed to build router");

        Self {
            router,
            client,
            factory,
        }
    }

    /// Router whose model factory never produces a client.
    pub fn with_unavailable_models(config: GenerationConfig) -> Router {
        let models: Arc<dyn ModelClientFactory> = Arc::new(MockModelClientFactory::unavailable());
        let state = AppState::new(config, Some(models)).expect("Failed to build state");
        build_router(state).expect("Failed to build router")
    }

    pub fn without_models(config: GenerationConfig) -> Router {
        let state = AppState::new(config, None).expect("Failed to build state");
        build_router(state).expect("Failed to build router")
    }
}
