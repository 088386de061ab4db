//! Artifact generation via the Claude Messages API.
//!
//! The pipeline only sees the [`Generator`] trait; [`LlmClient`] is the
//! production implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are an expert web developer. Always output one complete, \
working HTML file with embedded CSS and JavaScript. Never include explanations or markdown \
code blocks.";

/// Turns a prompt into single-page application source.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate source for `prompt`. `revision_hint` marks a revision round.
    async fn generate(
        &self,
        prompt: &str,
        revision_hint: Option<&str>,
    ) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Claude API client.
pub struct LlmClient {
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Single-turn text completion.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let messages = [Message {
            role: "user",
            content: prompt,
        }];
        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": messages,
        });

        let resp = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = resp.json::<ApiResponse>().await?;
        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                model = %self.model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Generation finished"
            );
        }
        Ok(parsed
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        revision_hint: Option<&str>,
    ) -> Result<String, GenerationError> {
        let system = match revision_hint {
            Some(hint) => format!("{SYSTEM_PROMPT}\n\n{hint}"),
            None => SYSTEM_PROMPT.to_string(),
        };
        let raw = self.complete(&system, prompt).await?;
        let html = strip_code_fences(&raw);
        if html.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(html)
    }
}

/// Remove a markdown code fence the model wrapped its answer in.
pub fn strip_code_fences(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```html") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}
