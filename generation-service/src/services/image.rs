//! Source image decoding.

use axum::body::Bytes;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use service_core::error::AppError;

/// Filename attached to uploaded images so the upstream can infer the type.
pub const SOURCE_IMAGE_FILENAME: &str = "image.png";

/// An in-memory image with the filename used for content-type inference.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFile {
    pub filename: String,
    pub data: Bytes,
}

impl ImageFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// MIME type derived from the filename extension.
    pub fn content_type(&self) -> &'static str {
        let extension = self
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => "application/octet-stream",
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decode `source_image_b64`, given either as a data URL or raw base64.
pub fn decode_source_image(value: Option<&Value>) -> Result<ImageFile, AppError> {
    let encoded = match value {
        Some(Value::String(s)) if !s.is_empty() => s.as_str(),
        _ => {
            return Err(AppError::InvalidInput(
                "provide source_image_b64 as a data URL or raw base64 string".to_string(),
            ))
        }
    };

    let payload = if encoded.starts_with("data:") {
        encoded
            .split_once(',')
            .map(|(_, rest)| rest)
            .ok_or_else(|| {
                AppError::InvalidInput("invalid data URL in source_image_b64".to_string())
            })?
    } else {
        encoded
    };

    // Data URLs copied from browsers or emails are often line-wrapped.
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let data = STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| AppError::InvalidInput("invalid base64 in source_image_b64".to_string()))?;

    Ok(ImageFile::new(SOURCE_IMAGE_FILENAME, data))
}
