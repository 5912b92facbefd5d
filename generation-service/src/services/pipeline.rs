//! Two-stage generation pipeline: base model, then upscaler.

use crate::models::NormalizedParams;
use crate::services::image::ImageFile;
use crate::services::providers::{
    extract_url, InputValue, ModelClient, ModelInput, PipelineOutput,
};
use service_core::error::AppError;
use service_core::retry::{retry_call, RetryPolicy};
use std::sync::Arc;

/// Instruction prepended to every generation prompt.
pub const PROMPT_PREAMBLE: &str = "Transform this panoramic image into a photorealistic scene. \
Maintain the original perspective, geometry and layout. \
Ensure consistent lighting and seamless transitions. \
Here is the regeneration prompt:";

pub fn build_prompt(params: &NormalizedParams) -> String {
    format!("{}{}", PROMPT_PREAMBLE, params.prompt_suffix())
}

/// Pipeline stage, used in logs and error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BaseModel,
    Upscaler,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::BaseModel => "base model",
            Stage::Upscaler => "upscaler",
        }
    }
}

pub struct GenerationPipeline {
    client: Arc<dyn ModelClient>,
    retry: RetryPolicy,
    base_model: String,
    upscaler_model: String,
}

impl GenerationPipeline {
    pub fn new(
        client: Arc<dyn ModelClient>,
        retry: RetryPolicy,
        base_model: impl Into<String>,
        upscaler_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            base_model: base_model.into(),
            upscaler_model: upscaler_model.into(),
        }
    }

    /// Run both stages and return the URL of the final image.
    ///
    /// The upscaler output falls back to the base image URL when it carries
    /// no URL of its own.
    pub async fn run(&self, prompt: &str, image: ImageFile) -> Result<String, AppError> {
        let base_input = ModelInput::new()
            .with("prompt", InputValue::Text(prompt.to_string()))
            .with("image_input", InputValue::Images(vec![image]));

        let base_output = self
            .run_stage(Stage::BaseModel, &self.base_model, &base_input)
            .await?;
        let base_url = extract_url(&base_output).ok_or_else(|| {
            AppError::BadGateway("replicate base model returned no URL".to_string())
        })?;

        tracing::info!(model = %self.base_model, url = %base_url, "Base model completed");

        let upscale_input = ModelInput::new().with("image", InputValue::Text(base_url.clone()));
        let upscale_output = self
            .run_stage(Stage::Upscaler, &self.upscaler_model, &upscale_input)
            .await?;

        let final_url = match extract_url(&upscale_output) {
            Some(url) => url,
            None => {
                tracing::warn!(
                    model = %self.upscaler_model,
                    "Upscaler returned no URL, using base model output"
                );
                base_url
            }
        };

        tracing::info!(model = %self.upscaler_model, url = %final_url, "Upscaler completed");

        Ok(final_url)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        model: &str,
        input: &ModelInput,
    ) -> Result<PipelineOutput, AppError> {
        tracing::info!(stage = stage.as_str(), model = %model, "Running pipeline stage");

        retry_call(&self.retry, stage.as_str(), || self.client.run(model, input))
            .await
            .map_err(|e| {
                AppError::BadGateway(format!("replicate {} failed: {}", stage.as_str(), e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::normalize;
    use crate::services::providers::mock::MockModelClient;
    use crate::services::providers::ProviderError;
    use serde_json::json;
    use std::time::Duration;

    const BASE: &str = "google/nano-banana";
    const UPSCALER: &str = "recraft-ai/recraft-crisp-upscale";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            delays: vec![Duration::from_millis(1); 4],
            ..Default::default()
        }
    }

    fn image() -> ImageFile {
        ImageFile::new("image.png", b"png".to_vec())
    }

    fn pipeline(client: Arc<MockModelClient>) -> GenerationPipeline {
        GenerationPipeline::new(client, fast_retry(), BASE, UPSCALER)
    }

    fn output(value: serde_json::Value) -> PipelineOutput {
        PipelineOutput::from(value)
    }

    #[test]
    fn prompt_appends_text_to_preamble() {
        let prompt = build_prompt(&normalize(&json!({ "text": "sunset" })));
        assert!(prompt.starts_with("Transform this panoramic image"));
        assert!(prompt.ends_with("Here is the regeneration prompt:sunset"));
    }

    #[tokio::test]
    async fn runs_base_then_upscaler_with_expected_inputs() {
        let client = Arc::new(
            MockModelClient::new()
                .with_output(BASE, output(json!({ "url": "http://base" })))
                .with_output(UPSCALER, output(json!(["http://final"]))),
        );

        let url = pipeline(client.clone()).run("prompt", image()).await.unwrap();
        assert_eq!(url, "http://final");

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].model, BASE);
        assert_eq!(
            calls[0].input.get("prompt"),
            Some(&InputValue::Text("prompt".into()))
        );
        assert_eq!(
            calls[0].input.get("image_input"),
            Some(&InputValue::Images(vec![image()]))
        );
        assert_eq!(calls[1].model, UPSCALER);
        assert_eq!(
            calls[1].input.get("image"),
            Some(&InputValue::Text("http://base".into()))
        );
    }

    #[tokio::test]
    async fn upscaler_without_url_falls_back_to_base() {
        let client = Arc::new(
            MockModelClient::new()
                .with_output(BASE, output(json!("http://base")))
                .with_output(UPSCALER, output(json!({}))),
        );

        let url = pipeline(client).run("prompt", image()).await.unwrap();
        assert_eq!(url, "http://base");
    }

    #[tokio::test]
    async fn base_without_url_is_bad_gateway() {
        let client = Arc::new(MockModelClient::new().with_output(BASE, PipelineOutput::Null));

        let err = pipeline(client.clone())
            .run("prompt", image())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadGateway(_)));
        assert_eq!(err.detail(), "replicate base model returned no URL");
        assert_eq!(client.calls_for(UPSCALER), 0);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let mut mock = MockModelClient::new();
        for _ in 0..4 {
            mock = mock.with_reply(BASE, Err(ProviderError::Timeout("slow".into())));
        }
        let client = Arc::new(
            mock.with_output(BASE, output(json!("http://base")))
                .with_output(UPSCALER, output(json!("http://final"))),
        );

        let url = pipeline(client.clone()).run("prompt", image()).await.unwrap();

        assert_eq!(url, "http://final");
        assert_eq!(client.calls_for(BASE), 5);
    }

    #[tokio::test]
    async fn permanent_error_fails_stage_immediately() {
        let client = Arc::new(
            MockModelClient::new()
                .with_reply(
                    UPSCALER,
                    Err(ProviderError::ApiError {
                        status: 422,
                        body: "invalid image".into(),
                    }),
                )
                .with_output(BASE, output(json!("http://base"))),
        );

        let err = pipeline(client.clone())
            .run("prompt", image())
            .await
            .unwrap_err();

        assert_eq!(
            err.detail(),
            "replicate upscaler failed: API error 422: invalid image"
        );
        assert_eq!(client.calls_for(UPSCALER), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_error() {
        let mut mock = MockModelClient::new();
        for attempt in 1..=5 {
            mock = mock.with_reply(
                BASE,
                Err(ProviderError::PredictionFailed(format!(
                    "Director error attempt {}",
                    attempt
                ))),
            );
        }
        let client = Arc::new(mock);

        let err = pipeline(client.clone())
            .run("prompt", image())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadGateway(_)));
        assert_eq!(
            err.detail(),
            "replicate base model failed: prediction failed: Director error attempt 5"
        );
        assert_eq!(client.calls_for(BASE), 5);
    }
}
