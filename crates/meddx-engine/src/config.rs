use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEXT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_VISION_MAX_TOKENS: u64 = 1500;
pub const DEFAULT_TEXT_MAX_TOKENS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Provider settings, read once at startup and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub api_key: String,
    pub api_base: String,
    pub vision_model: String,
    pub text_model: String,
    pub vision_max_tokens: u64,
    pub text_max_tokens: u64,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_max_tokens: DEFAULT_VISION_MAX_TOKENS,
            text_max_tokens: DEFAULT_TEXT_MAX_TOKENS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source. A missing or blank
    /// `OPENAI_API_KEY` is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(api_key) = first_non_empty(&lookup, &["OPENAI_API_KEY"]) else {
            bail!("OPENAI_API_KEY not set");
        };
        let mut config = Self::new(api_key);
        if let Some(base) = first_non_empty(&lookup, &["OPENAI_API_BASE", "OPENAI_BASE_URL"]) {
            config.api_base = normalize_api_base(&base);
        }
        if let Some(model) = first_non_empty(&lookup, &["MEDDX_VISION_MODEL"]) {
            config.vision_model = model;
        }
        if let Some(model) = first_non_empty(&lookup, &["MEDDX_TEXT_MODEL"]) {
            config.text_model = model;
        }
        if let Some(raw) = first_non_empty(&lookup, &["MEDDX_REQUEST_TIMEOUT_SECS"]) {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("MEDDX_REQUEST_TIMEOUT_SECS is not a number: {raw}"))?;
            if secs == 0 {
                bail!("MEDDX_REQUEST_TIMEOUT_SECS must be at least 1");
            }
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn chat_completions_endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("vision_model", &self.vision_model)
            .field("text_model", &self.text_model)
            .field("vision_max_tokens", &self.vision_max_tokens)
            .field("text_max_tokens", &self.text_max_tokens)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn first_non_empty<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base
}
