//! Download of the final generated image.

use axum::body::Bytes;
use reqwest::{Client, StatusCode};
use service_core::error::AppError;
use std::time::Duration;

/// Fetches generated artifacts over HTTP.
#[derive(Clone)]
pub struct ArtifactFetcher {
    client: Client,
}

impl ArtifactFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self { client })
    }

    /// GET `url` and return the body. Anything but `200 OK` is an upstream
    /// failure.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("replicate image fetch failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(AppError::BadGateway(format!(
                "failed to download replicate image: {}",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::BadGateway(format!("replicate image fetch failed: {}", e)))?;

        tracing::info!(url = %url, size = bytes.len(), "Downloaded generated image");

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::{routing::get, Router};
    use tokio::net::TcpListener;

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/ok.png", get(|| async { vec![0x89u8, b'P', b'N', b'G'] }))
            .route("/missing.png", get(|| async { AxumStatus::NOT_FOUND }))
            .route("/created.png", get(|| async { AxumStatus::CREATED }))
            .route(
                "/slow.png",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn returns_body_on_200() {
        let base = spawn_server().await;
        let fetcher = ArtifactFetcher::new(Duration::from_secs(5)).unwrap();

        let bytes = fetcher.fetch(&format!("{}/ok.png", base)).await.unwrap();
        assert_eq!(bytes.as_ref(), &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn non_200_is_bad_gateway() {
        let base = spawn_server().await;
        let fetcher = ArtifactFetcher::new(Duration::from_secs(5)).unwrap();

        let err = fetcher
            .fetch(&format!("{}/missing.png", base))
            .await
            .unwrap_err();
        assert_eq!(err.detail(), "failed to download replicate image: 404");

        let err = fetcher
            .fetch(&format!("{}/created.png", base))
            .await
            .unwrap_err();
        assert_eq!(err.detail(), "failed to download replicate image: 201");
    }

    #[tokio::test]
    async fn timeout_is_bad_gateway() {
        let base = spawn_server().await;
        let fetcher = ArtifactFetcher::new(Duration::from_millis(100)).unwrap();

        let err = fetcher
            .fetch(&format!("{}/slow.png", base))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadGateway(_)));
        assert!(err.detail().starts_with("replicate image fetch failed"));
    }

    #[tokio::test]
    async fn transport_failure_is_bad_gateway() {
        let fetcher = ArtifactFetcher::new(Duration::from_secs(1)).unwrap();

        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, AppError::BadGateway(_)));
    }
}
