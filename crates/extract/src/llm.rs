use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::prompt::{self, PromptStyle};
use crate::schema::ParsedResult;

/// Per-call knobs handed to a [`Generator`]. Part of the response cache key,
/// so every field must serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
    /// Input beyond this many characters is cut before prompting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_chars: Option<usize>,
    #[serde(default)]
    pub prompt_style: PromptStyle,
    /// Provider-specific options, passed through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
}

impl GenerationConfig {
    pub fn with_prompt_style(mut self, style: PromptStyle) -> Self {
        self.prompt_style = style;
        self
    }

    /// Scale every token/length limit by `ratio`. Limits that were unset are
    /// derived from `content_chars` so the next call is strictly smaller.
    pub fn reduced(&self, ratio: f64, content_chars: usize) -> Self {
        let scale = |n: f64| ((n * ratio).floor() as u64).max(1);
        let mut next = self.clone();
        next.max_tokens = self.max_tokens.map(|n| scale(n as f64) as u32);
        next.context_window = self.context_window.map(|n| scale(n as f64) as u32);
        let current = self.max_input_chars.unwrap_or(content_chars);
        next.max_input_chars = Some(scale(current as f64) as usize);
        next
    }

    /// Entities-only request with no provider extras.
    pub fn simplified(&self) -> Self {
        Self {
            model: self.model.clone(),
            temperature: Some(0.0),
            max_tokens: self.max_tokens,
            context_window: self.context_window,
            max_input_chars: self.max_input_chars,
            prompt_style: PromptStyle::Simplified,
            options: BTreeMap::new(),
        }
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// The language-model call being made resilient.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, content: &str, config: &GenerationConfig) -> Result<String>;
}

/// Pattern-table extraction used when the model cannot be relied on.
#[async_trait]
pub trait RegexFallback: Send + Sync {
    async fn extract(&self, content: &str) -> Result<ParsedResult>;
}

/// NLP-model extraction, optionally combined with model output.
#[async_trait]
pub trait HybridExtractor: Send + Sync {
    async fn extract(&self, content: &str, config: &GenerationConfig) -> Result<ParsedResult>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    options: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
        )
    }

    fn build_request(&self, content: &str, config: &GenerationConfig) -> OllamaRequest {
        let text = match config.max_input_chars {
            Some(limit) => truncate_chars(content, limit),
            None => content,
        };

        let mut options: serde_json::Map<String, Value> = config
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(temperature) = config.temperature {
            options.insert("temperature".to_string(), Value::from(temperature));
        }
        if let Some(max_tokens) = config.max_tokens {
            options.insert("num_predict".to_string(), Value::from(max_tokens));
        }
        if let Some(context_window) = config.context_window {
            options.insert("num_ctx".to_string(), Value::from(context_window));
        }

        OllamaRequest {
            model: config.model.clone().unwrap_or_else(|| self.model.clone()),
            prompt: prompt::build_prompt(config.prompt_style, text),
            stream: false,
            format: "json".to_string(), // Force JSON output
            options,
        }
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, content: &str, config: &GenerationConfig) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = self.build_request(content, config);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }
}
