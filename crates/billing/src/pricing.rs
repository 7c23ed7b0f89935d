//! Cost resolution for metered operations
//!
//! Prices come from the `costs` section of the configuration document:
//!
//! - fixed-price kinds read one integer key; for image kinds the
//!   `removeWatermark` flag switches to the `...NoWatermark` key
//! - speech synthesis is billed per started block of 100 characters
//!
//! Resolution is a pure function of the request and the document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use pointgate_shared::{ModelCatalog, SettingsDocument};

use crate::error::{BillingError, BillingResult};

/// Characters covered by one unit of speech pricing
pub const SPEECH_BLOCK_CHARS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ImageGenerate,
    ImageEdit,
    TextToSpeech,
    TextRewrite,
    ShortText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Image,
    Text,
    Speech,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ImageGenerate => "image-generate",
            OperationKind::ImageEdit => "image-edit",
            OperationKind::TextToSpeech => "text-to-speech",
            OperationKind::TextRewrite => "text-rewrite",
            OperationKind::ShortText => "short-text",
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            OperationKind::ImageGenerate | OperationKind::ImageEdit => ModelFamily::Image,
            OperationKind::TextRewrite | OperationKind::ShortText => ModelFamily::Text,
            OperationKind::TextToSpeech => ModelFamily::Speech,
        }
    }

    /// Cost key for a fixed-price kind, honouring the watermark modifier
    fn fixed_cost_key(&self, remove_watermark: bool) -> Option<&'static str> {
        match (self, remove_watermark) {
            (OperationKind::ImageGenerate, false) => Some("imageGenerate"),
            (OperationKind::ImageGenerate, true) => Some("imageGenerateNoWatermark"),
            (OperationKind::ImageEdit, false) => Some("imageEdit"),
            (OperationKind::ImageEdit, true) => Some("imageEditNoWatermark"),
            // text has no watermark to remove
            (OperationKind::TextRewrite, _) => Some("textRewrite"),
            (OperationKind::ShortText, _) => Some("shortText"),
            (OperationKind::TextToSpeech, _) => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image-generate" => Ok(OperationKind::ImageGenerate),
            "image-edit" => Ok(OperationKind::ImageEdit),
            "text-to-speech" => Ok(OperationKind::TextToSpeech),
            "text-rewrite" => Ok(OperationKind::TextRewrite),
            "short-text" => Ok(OperationKind::ShortText),
            other => Err(BillingError::InvalidOperation(format!(
                "unsupported operation kind '{other}'"
            ))),
        }
    }
}

/// A metered operation as submitted by a client.
///
/// Provider parameters (`prompt`, `text`, `image`, ...) stay untyped here; the
/// gateway validates them when it builds the provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub kind: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub remove_watermark: bool,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl OperationRequest {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            model: None,
            remove_watermark: false,
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn without_watermark(mut self) -> Self {
        self.remove_watermark = true;
        self
    }

    pub fn operation_kind(&self) -> BillingResult<OperationKind> {
        self.kind.parse()
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Resolved price and model for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub kind: OperationKind,
    pub model: String,
    pub price: i64,
}

/// Price of `request` under `document`
pub fn resolve(request: &OperationRequest, document: &SettingsDocument) -> BillingResult<i64> {
    quote(request, document).map(|q| q.price)
}

/// Resolve kind, model and price, rejecting anything unknown
pub fn quote(request: &OperationRequest, document: &SettingsDocument) -> BillingResult<Quote> {
    let kind = request.operation_kind()?;
    let model = resolve_model(kind, request.model.as_deref(), document)?;

    let price = match kind.fixed_cost_key(request.remove_watermark) {
        Some(key) => cost_value(document, key)?,
        None => {
            let unit = cost_value(document, "textToSpeech")?;
            let chars = request.param_str("text").unwrap_or_default().chars().count();
            speech_price(chars, unit)?
        }
    };

    Ok(Quote { kind, model, price })
}

/// `ceil(chars / 100) * unit`, with 0 characters costing nothing
pub fn speech_price(chars: usize, unit: i64) -> BillingResult<i64> {
    let blocks = (chars as u64).div_ceil(SPEECH_BLOCK_CHARS);
    i64::try_from(blocks)
        .ok()
        .and_then(|blocks| blocks.checked_mul(unit))
        .ok_or_else(|| {
            BillingError::PriceMisconfigured(format!(
                "speech price overflow for {chars} characters at unit {unit}"
            ))
        })
}

fn cost_value(document: &SettingsDocument, key: &str) -> BillingResult<i64> {
    let costs = document
        .costs()
        .map_err(|e| BillingError::PriceMisconfigured(e.to_string()))?;
    let value = costs
        .get(key)
        .ok_or_else(|| BillingError::PriceMisconfigured(format!("missing cost '{key}'")))?;

    match value.as_i64() {
        Some(price) if price >= 0 => Ok(price),
        _ => Err(BillingError::PriceMisconfigured(format!(
            "cost '{key}' must be a non-negative integer, got {value}"
        ))),
    }
}

fn resolve_model(
    kind: OperationKind,
    requested: Option<&str>,
    document: &SettingsDocument,
) -> BillingResult<String> {
    let catalog: ModelCatalog = document
        .models()
        .map_err(|e| BillingError::InvalidOperation(e.to_string()))?;
    let allowed = match kind.family() {
        ModelFamily::Image => &catalog.image,
        ModelFamily::Text => &catalog.text,
        ModelFamily::Speech => &catalog.speech,
    };

    match requested {
        Some(model) if allowed.iter().any(|m| m == model) => Ok(model.to_string()),
        Some(model) => Err(BillingError::InvalidOperation(format!(
            "model '{model}' is not available for {kind}"
        ))),
        None => allowed.first().cloned().ok_or_else(|| {
            BillingError::InvalidOperation(format!("no model configured for {kind}"))
        }),
    }
}
