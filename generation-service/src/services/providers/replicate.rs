//! Replicate provider implementation.
//!
//! Runs models through the Replicate HTTP API: image inputs are uploaded via
//! the files endpoint, a prediction is created, then polled until it reaches
//! a terminal state.

use super::{InputValue, ModelClient, ModelClientFactory, ModelInput, PipelineOutput, ProviderError};
use crate::config::ReplicateConfig;
use crate::services::image::ImageFile;
use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use service_core::observability::trace_headers;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Builds a [`ReplicateClient`] per request so the caller's user agent is
/// applied to every upstream call.
#[derive(Debug, Clone)]
pub struct ReplicateClientFactory {
    config: ReplicateConfig,
}

impl ReplicateClientFactory {
    pub fn new(config: ReplicateConfig) -> Self {
        Self { config }
    }
}

impl ModelClientFactory for ReplicateClientFactory {
    fn connect(
        &self,
        api_token: &Secret<String>,
        user_agent: &str,
    ) -> Result<Arc<dyn ModelClient>, ProviderError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::NotConfigured(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Arc::new(ReplicateClient {
            http,
            api_base: self.config.api_base.trim_end_matches('/').to_string(),
            api_token: api_token.clone(),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
            prediction_timeout: Duration::from_secs(self.config.prediction_timeout_secs),
        }))
    }
}

/// Replicate API client.
pub struct ReplicateClient {
    http: Client,
    api_base: String,
    api_token: Secret<String>,
    poll_interval: Duration,
    prediction_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    urls: UploadedFileUrls,
}

#[derive(Debug, Deserialize)]
struct UploadedFileUrls {
    get: String,
}

impl ReplicateClient {
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.api_token.expose_secret())
            .headers(trace_headers())
    }

    /// Upload an image and return the URL models can read it from.
    async fn upload_file(&self, file: &ImageFile) -> Result<String, ProviderError> {
        let part = multipart::Part::bytes(file.data.to_vec())
            .file_name(file.filename.clone())
            .mime_str(file.content_type())
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid content type: {}", e)))?;

        let form = multipart::Form::new()
            .text("filename", file.filename.clone())
            .text("content_type", file.content_type().to_string())
            .part("content", part);

        tracing::debug!(
            filename = %file.filename,
            size = file.len(),
            "Uploading input file to Replicate"
        );

        let response = self
            .authorized(self.http.post(format!("{}/files", self.api_base)))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let uploaded: UploadedFile = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("file upload response: {}", e)))?;

        Ok(uploaded.urls.get)
    }

    /// Turn model inputs into the JSON payload, uploading files on the way.
    async fn resolve_input(&self, input: &ModelInput) -> Result<Value, ProviderError> {
        let mut payload = Map::new();

        for (key, value) in input.iter() {
            let resolved = match value {
                InputValue::Text(text) => Value::String(text.clone()),
                InputValue::Images(files) => {
                    let mut urls = Vec::with_capacity(files.len());
                    for file in files {
                        urls.push(Value::String(self.upload_file(file).await?));
                    }
                    Value::Array(urls)
                }
            };
            payload.insert(key.to_string(), resolved);
        }

        Ok(Value::Object(payload))
    }

    async fn create_prediction(
        &self,
        model: &str,
        input: Value,
    ) -> Result<Prediction, ProviderError> {
        let (url, body) = match model.split_once(':') {
            Some((_, version)) if !version.is_empty() => (
                format!("{}/predictions", self.api_base),
                json!({ "version": version, "input": input }),
            ),
            None if model.split('/').count() == 2 && !model.starts_with('/') => (
                format!("{}/models/{}/predictions", self.api_base, model),
                json!({ "input": input }),
            ),
            _ => return Err(ProviderError::InvalidModel(model.to_string())),
        };

        let response = self
            .authorized(self.http.post(url))
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        parse_prediction(check_status(response).await?).await
    }

    async fn fetch_prediction(&self, prediction: &Prediction) -> Result<Prediction, ProviderError> {
        let url = prediction
            .urls
            .as_ref()
            .and_then(|urls| urls.get.clone())
            .unwrap_or_else(|| format!("{}/predictions/{}", self.api_base, prediction.id));

        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        parse_prediction(check_status(response).await?).await
    }

    /// Poll until the prediction settles or the deadline passes.
    async fn wait(&self, mut prediction: Prediction) -> Result<Prediction, ProviderError> {
        let deadline = Instant::now() + self.prediction_timeout;

        while !prediction.status.is_terminal() {
            if Instant::now() >= deadline {
                return Err(ProviderError::Timeout(format!(
                    "prediction {} still {:?} after {}s",
                    prediction.id,
                    prediction.status,
                    self.prediction_timeout.as_secs()
                )));
            }
            sleep(self.poll_interval).await;
            prediction = self.fetch_prediction(&prediction).await?;
        }

        Ok(prediction)
    }
}

#[async_trait]
impl ModelClient for ReplicateClient {
    async fn run(&self, model: &str, input: &ModelInput) -> Result<PipelineOutput, ProviderError> {
        let payload = self.resolve_input(input).await?;
        let created = self.create_prediction(model, payload).await?;

        tracing::debug!(
            model = %model,
            prediction_id = %created.id,
            status = ?created.status,
            "Created Replicate prediction"
        );

        let prediction = self.wait(created).await?;

        match prediction.status {
            PredictionStatus::Succeeded => Ok(PipelineOutput::from(prediction.output)),
            PredictionStatus::Canceled => Err(ProviderError::PredictionCanceled(prediction.id)),
            _ => Err(ProviderError::PredictionFailed(error_message(prediction.error))),
        }
    }
}

fn error_message(error: Option<Value>) -> String {
    match error {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => "unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(ProviderError::ServerError {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(ProviderError::ApiError {
            status: status.as_u16(),
            body,
        })
    }
}

async fn parse_prediction(response: Response) -> Result<Prediction, ProviderError> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(format!("prediction response: {}", e)))
}
