//! Mock provider implementations for testing.

use super::{ModelClient, ModelClientFactory, ModelInput, PipelineOutput, ProviderError};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A call received by [`MockModelClient`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub input: ModelInput,
}

/// Mock model client with scripted replies per model.
///
/// Queued replies are consumed in order; once a model's queue is empty the
/// model's fixed output is returned, if any.
#[derive(Default)]
pub struct MockModelClient {
    queued: Mutex<HashMap<String, VecDeque<Result<PipelineOutput, ProviderError>>>>,
    fixed: Mutex<HashMap<String, PipelineOutput>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `model` with `output` once queued replies run out.
    pub fn with_output(self, model: &str, output: PipelineOutput) -> Self {
        self.fixed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(model.to_string(), output);
        self
    }

    /// Queue a single reply for `model`.
    pub fn with_reply(self, model: &str, reply: Result<PipelineOutput, ProviderError>) -> Self {
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.model == model)
            .count()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn run(&self, model: &str, input: &ModelInput) -> Result<PipelineOutput, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                model: model.to_string(),
                input: input.clone(),
            });

        let queued = self
            .queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }

        self.fixed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(model)
            .cloned()
            .ok_or_else(|| ProviderError::ApiError {
                status: 404,
                body: format!("mock has no reply for model {}", model),
            })
    }
}

/// Factory handing out a shared [`MockModelClient`].
pub struct MockModelClientFactory {
    client: Arc<MockModelClient>,
    available: bool,
    connections: Mutex<Vec<(String, String)>>,
}

impl MockModelClientFactory {
    pub fn new(client: Arc<MockModelClient>) -> Self {
        Self {
            client,
            available: true,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// A factory whose clients can never be built.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Arc::new(MockModelClient::new()))
        }
    }

    /// `(api_token, user_agent)` pairs passed to `connect`.
    pub fn connections(&self) -> Vec<(String, String)> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ModelClientFactory for MockModelClientFactory {
    fn connect(
        &self,
        api_token: &Secret<String>,
        user_agent: &str,
    ) -> Result<Arc<dyn ModelClient>, ProviderError> {
        if !self.available {
            return Err(ProviderError::NotConfigured(
                "Mock model client not available".to_string(),
            ));
        }

        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((api_token.expose_secret().clone(), user_agent.to_string()));

        Ok(self.client.clone())
    }
}
