//! LLM-backed HTML translation.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config;
use crate::model::{Post, TranslatedFields};

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a professional translator engine for WordPress. \
Preserve all HTML tags, classes, and IDs. Do not translate URLs.";

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("valid fence regex"));

#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Translate an HTML fragment, keeping markup intact.
    async fn translate(&self, html: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Translate title, content and excerpt concurrently. Empty fields never
/// reach the service. Fails if any field fails.
pub async fn translate_post(
    service: &dyn TranslationService,
    post: &Post,
    source_lang: &str,
    target_lang: &str,
) -> Result<TranslatedFields> {
    let field = |html: &str| {
        let html = html.to_string();
        async move {
            if html.trim().is_empty() {
                return Ok(String::new());
            }
            service.translate(&html, source_lang, target_lang).await
        }
    };
    let (title, content, excerpt) = futures::try_join!(
        field(&post.title.rendered),
        field(&post.content.rendered),
        field(&post.excerpt.rendered),
    )?;
    Ok(TranslatedFields {
        title,
        content,
        excerpt,
    })
}

/// Fixed rule set sent with every field.
pub fn build_prompt(html: &str, source_lang: &str, target_lang: &str) -> String {
    format!(
        "Translate the following HTML content from {source} to {target}.\n\
         \n\
         STRICT RULES:\n\
         1. Preserve ALL HTML tags, attributes (class, id, style), and structure exactly.\n\
         2. Do not translate URLs within href or src attributes.\n\
         3. Preserve WordPress shortcodes (e.g., [gallery ids=\"1,2\"]).\n\
         4. Only translate the human-readable text inside the tags.\n\
         5. Output ONLY the translated HTML, no preamble or markdown code blocks.\n\
         \n\
         Content to translate:\n\
         {html}",
        source = source_lang,
        target = target_lang,
        html = html
    )
}

/// Remove a Markdown code fence wrapped around the whole reply.
pub fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

/// Endpoint settings for the Generative Language API.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl From<&config::Llm> for LlmOptions {
    fn from(cfg: &config::Llm) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    system_instruction: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(api_key: String, system_instruction: Option<String>, options: &LlmOptions) -> Result<Self> {
        let mut base = options.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("invalid LLM base URL {}", base))?;
        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model: options.model.clone(),
            system_instruction: system_instruction
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
        })
    }

    pub fn build_request(&self, prompt: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .context("invalid LLM endpoint")?;
        let body = json!({
            "systemInstruction": { "parts": [ { "text": self.system_instruction } ] },
            "contents": [ { "role": "user", "parts": [ { "text": prompt } ] } ],
        });
        self.http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .build()
            .context("failed to build LLM request")
    }
}

#[async_trait]
impl TranslationService for GeminiClient {
    async fn translate(&self, html: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        if html.is_empty() {
            return Ok(String::new());
        }
        let request = self.build_request(&build_prompt(html, source_lang, target_lang))?;
        debug!(url=%request.url(), chars = html.len(), source_lang, target_lang, "sending translation request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach LLM API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "LLM API error");
            return Err(anyhow!("llm error {}: {}", status, body));
        }
        let payload: GenerateContentResponse =
            res.json().await.context("invalid LLM response")?;
        let text = payload.text();
        if text.is_empty() {
            return Err(anyhow!("llm returned no text (finish reason: {})", payload.finish_reason()));
        }
        Ok(strip_code_fence(&text).to_string())
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Value>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> &str {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .unwrap_or("none")
    }
}
