//! Generation provider seam
//!
//! The gateway only sees [`GenerationProvider`]: a call goes in, and an
//! artifact, text, a safety block, an empty result or an error comes back.

pub mod gemini;
#[cfg(test)]
pub mod scripted;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;

use pointgate_billing::{OperationKind, OperationRequest, Quote};

use crate::error::{ApiError, ApiResult};

pub use gemini::GeminiProvider;

/// Inline image attached to an edit request, base64 as received
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

/// Validated provider input for one operation kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderInput {
    ImageGenerate { prompt: String },
    ImageEdit { prompt: String, image: InlineImage },
    TextToSpeech { text: String, voice: Option<String> },
    TextRewrite { text: String, instruction: Option<String> },
    ShortText { prompt: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub model: String,
    pub input: ProviderInput,
}

impl ProviderCall {
    /// Build the provider call for a quoted request.
    ///
    /// Runs before any ledger mutation, so every parameter problem surfaces
    /// as a validation error with nothing charged.
    pub fn from_request(request: &OperationRequest, quote: &Quote) -> ApiResult<Self> {
        let input = match quote.kind {
            OperationKind::ImageGenerate => ProviderInput::ImageGenerate {
                prompt: required_text(request, "prompt")?,
            },
            OperationKind::ImageEdit => ProviderInput::ImageEdit {
                prompt: required_text(request, "prompt")?,
                image: inline_image(request)?,
            },
            OperationKind::TextToSpeech => ProviderInput::TextToSpeech {
                text: required_text(request, "text")?,
                voice: optional_text(request, "voice"),
            },
            OperationKind::TextRewrite => ProviderInput::TextRewrite {
                text: required_text(request, "text")?,
                instruction: optional_text(request, "instruction"),
            },
            OperationKind::ShortText => ProviderInput::ShortText {
                prompt: required_text(request, "prompt")?,
            },
        };

        Ok(Self {
            model: quote.model.clone(),
            input,
        })
    }

    pub fn kind(&self) -> OperationKind {
        match self.input {
            ProviderInput::ImageGenerate { .. } => OperationKind::ImageGenerate,
            ProviderInput::ImageEdit { .. } => OperationKind::ImageEdit,
            ProviderInput::TextToSpeech { .. } => OperationKind::TextToSpeech,
            ProviderInput::TextRewrite { .. } => OperationKind::TextRewrite,
            ProviderInput::ShortText { .. } => OperationKind::ShortText,
        }
    }
}

fn required_text(request: &OperationRequest, key: &str) -> ApiResult<String> {
    match request.param_str(key).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ApiError::Validation(format!(
            "'{key}' is required for {}",
            request.kind
        ))),
    }
}

fn optional_text(request: &OperationRequest, key: &str) -> Option<String> {
    request
        .param_str(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn inline_image(request: &OperationRequest) -> ApiResult<InlineImage> {
    let value = request
        .params
        .get("image")
        .cloned()
        .ok_or_else(|| ApiError::Validation("'image' is required for image-edit".to_string()))?;
    let image: InlineImage = serde_json::from_value(value)
        .map_err(|e| ApiError::Validation(format!("'image' is malformed: {e}")))?;

    if !image.mime_type.starts_with("image/") {
        return Err(ApiError::Validation(format!(
            "unsupported image type '{}'",
            image.mime_type
        )));
    }
    if image.data.is_empty() || STANDARD.decode(&image.data).is_err() {
        return Err(ApiError::Validation(
            "'image.data' must be non-empty base64".to_string(),
        ));
    }

    Ok(image)
}

/// What the provider produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutput {
    /// Image or audio bytes
    Binary { mime_type: String, data: Vec<u8> },
    Text(String),
    /// Refused on safety or policy grounds
    Blocked { reason: String },
    /// Success status but nothing usable
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Transport(String),
    #[error("Provider returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Could not decode provider response: {0}")]
    Decode(String),
    #[error("Provider misconfigured: {0}")]
    Config(String),
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, call: &ProviderCall) -> Result<ProviderOutput, ProviderError>;
}
