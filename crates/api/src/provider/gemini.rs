//! Gemini `generateContent` adapter
//!
//! One endpoint serves every operation kind; the request body selects the
//! output modality. Speech comes back as raw 16-bit PCM and is wrapped into
//! a WAV container before it leaves this module.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use pointgate_billing::OperationKind;

use super::{GenerationProvider, ProviderCall, ProviderError, ProviderInput, ProviderOutput};

const DEFAULT_VOICE: &str = "Kore";
const DEFAULT_REWRITE_INSTRUCTION: &str =
    "Rewrite the user's text to be clearer and more engaging. Keep the language and meaning. \
     Reply with the rewritten text only.";
const DEFAULT_PCM_SAMPLE_RATE: u32 = 24_000;

/// Finish reasons that mean the output was withheld on policy grounds
const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
    "RECITATION",
];

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| ProviderError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    async fn generate(&self, call: &ProviderCall) -> Result<ProviderOutput, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(&call.model))
            .json(&request_body(&call.input))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        tracing::debug!(status = %status, model = %call.model, kind = %call.kind(), "Gemini response received");

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("invalid response JSON: {e}")))?;

        interpret(parsed, call.kind())
    }
}

fn request_body(input: &ProviderInput) -> Value {
    match input {
        ProviderInput::ImageGenerate { prompt } => json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["IMAGE"] }
        }),
        ProviderInput::ImageEdit { prompt, image } => json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inlineData": { "mimeType": image.mime_type, "data": image.data } }
                ]
            }],
            "generationConfig": { "responseModalities": ["IMAGE"] }
        }),
        ProviderInput::TextToSpeech { text, voice } => json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": {
                            "voiceName": voice.as_deref().unwrap_or(DEFAULT_VOICE)
                        }
                    }
                }
            }
        }),
        ProviderInput::TextRewrite { text, instruction } => json!({
            "systemInstruction": {
                "parts": [{
                    "text": instruction.as_deref().unwrap_or(DEFAULT_REWRITE_INSTRUCTION)
                }]
            },
            "contents": [{ "parts": [{ "text": text }] }]
        }),
        ProviderInput::ShortText { prompt } => json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect())
}

fn interpret(
    response: GenerateContentResponse,
    kind: OperationKind,
) -> Result<ProviderOutput, ProviderError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Ok(ProviderOutput::Blocked { reason });
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(ProviderOutput::Empty);
    };

    if let Some(reason) = candidate
        .finish_reason
        .filter(|r| SAFETY_FINISH_REASONS.contains(&r.as_str()))
    {
        return Ok(ProviderOutput::Blocked { reason });
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    match kind {
        OperationKind::TextRewrite | OperationKind::ShortText => {
            let text: String = parts.into_iter().filter_map(|p| p.text).collect();
            let text = text.trim();
            if text.is_empty() {
                Ok(ProviderOutput::Empty)
            } else {
                Ok(ProviderOutput::Text(text.to_string()))
            }
        }
        OperationKind::ImageGenerate | OperationKind::ImageEdit | OperationKind::TextToSpeech => {
            let Some(inline) = parts.into_iter().find_map(|p| p.inline_data) else {
                return Ok(ProviderOutput::Empty);
            };
            let data = STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| ProviderError::Decode(format!("inline data is not base64: {e}")))?;
            if data.is_empty() {
                return Ok(ProviderOutput::Empty);
            }

            if is_raw_pcm(&inline.mime_type) {
                let rate = pcm_sample_rate(&inline.mime_type);
                Ok(ProviderOutput::Binary {
                    mime_type: "audio/wav".to_string(),
                    data: wav_from_pcm(&data, rate),
                })
            } else {
                Ok(ProviderOutput::Binary {
                    mime_type: inline.mime_type,
                    data,
                })
            }
        }
    }
}

fn is_raw_pcm(mime_type: &str) -> bool {
    let lower = mime_type.to_ascii_lowercase();
    lower.starts_with("audio/l16") || lower.contains("codec=pcm")
}

/// `rate=` parameter of an `audio/L16` MIME type
fn pcm_sample_rate(mime_type: &str) -> u32 {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
        .unwrap_or(DEFAULT_PCM_SAMPLE_RATE)
}

/// Mono 16-bit little-endian PCM in a RIFF/WAVE container
fn wav_from_pcm(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX - 36);

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
