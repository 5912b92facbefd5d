//! Image generation endpoint.

use crate::models::{normalize, GenerateRequest};
use crate::services::{build_prompt, decode_source_image, GenerationPipeline};
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

const SUPPORTED_PROVIDER: &str = "replicate";

/// `POST /` and `POST /api/generate`.
///
/// The body is parsed as JSON regardless of its `Content-Type`.
pub async fn generate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: GenerateRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidInput(format!("invalid request body: {}", e)))?;

    let image = generate_impl(&state, request).await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], image).into_response())
}

/// Run a generation request end to end and return the final image bytes.
#[tracing::instrument(
    skip(state, request),
    fields(provider = %request.provider())
)]
pub async fn generate_impl(state: &AppState, request: GenerateRequest) -> Result<Bytes, AppError> {
    if request.provider() != SUPPORTED_PROVIDER {
        return Err(AppError::UnsupportedProvider(
            "unsupported provider".to_string(),
        ));
    }

    let factory = state.models.as_ref().ok_or_else(|| {
        AppError::ConfigError(anyhow::anyhow!(
            "replicate client not available; ensure dependency installed"
        ))
    })?;

    let replicate = &state.config.replicate;
    let token = replicate.api_token.as_ref().ok_or_else(|| {
        AppError::ConfigError(anyhow::anyhow!("missing REPLICATE_API_TOKEN env var"))
    })?;

    let params = normalize(&request.params);
    let prompt = build_prompt(&params);

    let user_agent = request.user_agent(&replicate.user_agent);
    if HeaderValue::from_str(user_agent).is_err() {
        return Err(AppError::InvalidInput(
            "user_agent must be a valid header value".to_string(),
        ));
    }

    let client = factory
        .connect(token, user_agent)
        .map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("replicate client not available: {}", e))
        })?;

    let image = decode_source_image(request.source_image_b64.as_ref())?;

    let base_model = request.base_model(&replicate.base_model);
    let upscaler_model = request.upscaler_model(&replicate.upscaler_model);
    tracing::info!(
        base_model = %base_model,
        upscaler_model = %upscaler_model,
        image_size = image.len(),
        "Starting generation"
    );

    let pipeline = GenerationPipeline::new(
        client,
        state.config.retry.clone(),
        base_model,
        upscaler_model,
    );
    let final_url = pipeline.run(&prompt, image).await?;

    state.fetcher.fetch(&final_url).await
}
