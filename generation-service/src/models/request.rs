use serde::Deserialize;
use serde_json::Value;

/// Body of `POST /api/generate`.
///
/// `params` and `source_image_b64` stay untyped so that malformed values
/// degrade to defaults or to a precise validation message instead of a
/// generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub source_image_b64: Option<Value>,
    #[serde(default)]
    pub replicate_model: Option<String>,
    #[serde(default)]
    pub replicate_upscaler: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl GenerateRequest {
    /// Lowercased provider name, `replicate` when absent or empty.
    pub fn provider(&self) -> String {
        non_empty(&self.provider)
            .unwrap_or("replicate")
            .to_lowercase()
    }

    pub fn base_model<'a>(&'a self, default: &'a str) -> &'a str {
        non_empty(&self.replicate_model).unwrap_or(default)
    }

    pub fn upscaler_model<'a>(&'a self, default: &'a str) -> &'a str {
        non_empty(&self.replicate_upscaler).unwrap_or(default)
    }

    pub fn user_agent<'a>(&'a self, default: &'a str) -> &'a str {
        non_empty(&self.user_agent).unwrap_or(default)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
