use std::error::Error as StdError;
use std::io::Cursor;

use anyhow::{Context, Result};
use image::ImageReader;
use meddx_contracts::prompts::{diagnostic_instruction, DOCTOR_DISCLAIMER, INDETERMINATE_NOTICE};
use meddx_contracts::results::{DiagnosticResult, InsightResult};
use meddx_contracts::upload::{data_url, ImageFormat};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::GatewayConfig;
use crate::error::InferenceError;

const ERROR_BODY_MAX_CHARS: usize = 512;

/// The two provider calls the session needs. Implementations hold no
/// per-call state: no caching, no retry, no batching.
pub trait InferenceGateway {
    fn name(&self) -> &str;

    fn describe_image(
        &self,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<DiagnosticResult, InferenceError>;

    fn ask(&self, prompt: &str) -> Result<InsightResult, InferenceError>;
}

impl<G: InferenceGateway + ?Sized> InferenceGateway for Box<G> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn describe_image(
        &self,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<DiagnosticResult, InferenceError> {
        (**self).describe_image(bytes, format)
    }

    fn ask(&self, prompt: &str) -> Result<InsightResult, InferenceError> {
        (**self).ask(prompt)
    }
}

/// Gateway for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiGateway {
    config: GatewayConfig,
    http: HttpClient,
}

impl OpenAiGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    fn post_chat(&self, payload: &Value) -> Result<String, InferenceError> {
        let endpoint = self.config.chat_completions_endpoint();
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .map_err(|err| {
                InferenceError::Transport(format!("{endpoint}: {}", error_chain_text(&err)))
            })?;
        let status = response.status();
        let body = response.text().map_err(|err| {
            InferenceError::Transport(format!(
                "response body read failed: {}",
                error_chain_text(&err)
            ))
        })?;
        if !status.is_success() {
            return Err(InferenceError::Provider {
                status: status.as_u16(),
                message: provider_error_message(&body),
            });
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            InferenceError::MalformedResponse(format!("invalid JSON payload: {err}"))
        })?;
        extract_completion_text(&parsed)
    }
}

impl InferenceGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    fn describe_image(
        &self,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<DiagnosticResult, InferenceError> {
        let payload = vision_payload(&self.config, bytes, format);
        self.post_chat(&payload).map(DiagnosticResult::new)
    }

    fn ask(&self, prompt: &str) -> Result<InsightResult, InferenceError> {
        let payload = text_payload(&self.config, prompt);
        self.post_chat(&payload).map(InsightResult::new)
    }
}

/// One user message: the fixed instruction plus the image as a high-detail
/// data URI.
pub fn vision_payload(config: &GatewayConfig, bytes: &[u8], format: ImageFormat) -> Value {
    json!({
        "model": config.vision_model,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": diagnostic_instruction()},
                {
                    "type": "image_url",
                    "image_url": {
                        "url": data_url(bytes, format),
                        "detail": "high",
                    },
                },
            ],
        }],
        "max_tokens": config.vision_max_tokens,
    })
}

pub fn text_payload(config: &GatewayConfig, prompt: &str) -> Value {
    json!({
        "model": config.text_model,
        "messages": [{
            "role": "user",
            "content": prompt,
        }],
        "max_tokens": config.text_max_tokens,
    })
}

/// Returns the first choice's message content without trimming or rewriting.
pub fn extract_completion_text(response: &Value) -> Result<String, InferenceError> {
    let Some(message) = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
    else {
        return Err(InferenceError::MalformedResponse(
            "response has no choices".to_string(),
        ));
    };

    match message.get("content") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Array(parts)) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|part| {
                    matches!(
                        part.get("type").and_then(Value::as_str),
                        Some("text" | "output_text")
                    )
                })
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                return Err(InferenceError::MalformedResponse(
                    "first choice has no text content".to_string(),
                ));
            }
            Ok(texts.concat())
        }
        _ => {
            let refusal = message
                .get("refusal")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty());
            Err(InferenceError::MalformedResponse(match refusal {
                Some(reason) => format!("model refused: {reason}"),
                None => "first choice has no text content".to_string(),
            }))
        }
    }
}

/// Prefers the provider's `error.message`, falling back to the raw body.
fn provider_error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        let message = parsed
            .get("error")
            .and_then(|error| {
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| error.as_str())
            })
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(message) = message {
            return truncate_text(message, ERROR_BODY_MAX_CHARS);
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    truncate_text(trimmed, ERROR_BODY_MAX_CHARS)
}

fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), ERROR_BODY_MAX_CHARS)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Offline gateway with deterministic answers. Never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunGateway;

impl InferenceGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn describe_image(
        &self,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<DiagnosticResult, InferenceError> {
        let findings = match image_dimensions(bytes, format) {
            Some((width, height)) => format!(
                "- Received a {width}x{height} {} image ({} bytes).\n- No clinical interpretation was performed in dryrun mode.",
                format.extension().to_ascii_uppercase(),
                bytes.len()
            ),
            None => format!("- {INDETERMINATE_NOTICE}"),
        };
        Ok(DiagnosticResult::new(format!(
            "Findings:\n{findings}\n\nRecommended next steps:\n- Re-run without --dryrun to obtain a provider report.\n\nRecommendations:\n- {INDETERMINATE_NOTICE}\n\n{DOCTOR_DISCLAIMER}"
        )))
    }

    fn ask(&self, prompt: &str) -> Result<InsightResult, InferenceError> {
        let instruction = prompt.lines().next().unwrap_or_default().trim();
        Ok(InsightResult::new(format!(
            "Dryrun answer ({} prompt chars) to: {instruction}",
            prompt.chars().count()
        )))
    }
}

fn image_dimensions(bytes: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
    let codec = match format {
        ImageFormat::Jpg | ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Png => image::ImageFormat::Png,
    };
    ImageReader::with_format(Cursor::new(bytes), codec)
        .into_dimensions()
        .ok()
}
