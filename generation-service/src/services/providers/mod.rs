//! Image model provider abstractions.
//!
//! A provider runs a named model against a set of inputs and returns the raw
//! model output. The output shape differs per model (a URL, a list of URLs,
//! an object with nested URLs, a file handle), so it is carried as
//! [`PipelineOutput`] and reduced to a single URL by [`extract_url`].

pub mod mock;
pub mod replicate;

use crate::services::image::ImageFile;
use async_trait::async_trait;
use secrecy::Secret;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Error type for provider operations.
///
/// Display strings matter: the pipeline's retry policy matches on them.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("invalid model identifier: {0}")]
    InvalidModel(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("prediction failed: {0}")]
    PredictionFailed(String),

    #[error("prediction canceled: {0}")]
    PredictionCanceled(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A single named model input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Text(String),
    Images(Vec<ImageFile>),
}

/// Ordered model inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInput {
    entries: Vec<(String, InputValue)>,
}

impl ModelInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: InputValue) -> Self {
        self.entries.push((key.into(), value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&InputValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A file produced by a model, exposed through its URL.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutput {
    pub url: String,
}

/// Raw model output.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    Null,
    Text(String),
    Mapping(Map<String, Value>),
    Sequence(Vec<PipelineOutput>),
    Asset(FileOutput),
    /// Numbers and booleans; never carry a URL.
    Other(Value),
}

impl From<Value> for PipelineOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PipelineOutput::Null,
            Value::String(s) => PipelineOutput::Text(s),
            Value::Object(map) => PipelineOutput::Mapping(map),
            Value::Array(items) => {
                PipelineOutput::Sequence(items.into_iter().map(PipelineOutput::from).collect())
            }
            other => PipelineOutput::Other(other),
        }
    }
}

/// Mapping keys that may hold the output URL, in lookup order.
const URL_KEYS: [&str; 4] = ["url", "urls", "image", "output"];

/// Reduce a model output to a URL, if it carries one.
pub fn extract_url(output: &PipelineOutput) -> Option<String> {
    match output {
        PipelineOutput::Null | PipelineOutput::Other(_) => None,
        PipelineOutput::Text(s) => Some(s.clone()),
        PipelineOutput::Mapping(map) => URL_KEYS.iter().find_map(|key| match map.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(nested)) => nested
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }),
        PipelineOutput::Sequence(items) => items.first().and_then(extract_url),
        PipelineOutput::Asset(file) => Some(file.url.clone()),
    }
}

/// Client for running hosted image models.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run `model` to completion and return its output.
    async fn run(&self, model: &str, input: &ModelInput) -> Result<PipelineOutput, ProviderError>;
}

/// Builds per-request clients. Failing to build one means the provider is
/// unavailable in this deployment.
pub trait ModelClientFactory: Send + Sync {
    fn connect(
        &self,
        api_token: &Secret<String>,
        user_agent: &str,
    ) -> Result<Arc<dyn ModelClient>, ProviderError>;
}
