use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config;
use crate::model::{Post, Settings, TranslatedFields};
use crate::wordpress::model::{CreatedPost, WpErrorBody};

pub mod model;

/// Slug of the multilingual plugin the console relies on.
pub const LANGUAGE_PLUGIN_SLUG: &str = "polylang";
const LANGUAGE_PLUGIN_FILE: &str = "polylang/polylang";

/// HTTP tuning shared by every WordPress client built from settings.
#[derive(Debug, Clone)]
pub struct WordPressOptions {
    pub page_size: u32,
    pub timeout: Duration,
    pub user_agent: String,
}

impl From<&config::WordPress> for WordPressOptions {
    fn from(cfg: &config::WordPress) -> Self {
        Self {
            page_size: cfg.page_size,
            timeout: Duration::from_secs(cfg.request_timeout_secs),
            user_agent: cfg.user_agent.clone(),
        }
    }
}

impl Default for WordPressOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            timeout: Duration::from_secs(30),
            user_agent: "wp-translator/0.1".to_string(),
        }
    }
}

/// Failure while writing a translation back to WordPress.
#[derive(Debug, Error)]
pub enum TranslationWriteError {
    #[error("{0:#}")]
    Create(anyhow::Error),
    /// The draft exists but the link map on one side was not written.
    #[error("draft #{draft_id} created but linking post #{post_id} failed: {cause:#}")]
    PartialLink {
        draft_id: i64,
        post_id: i64,
        cause: anyhow::Error,
    },
}

#[async_trait]
pub trait ContentService: Send + Sync {
    /// List posts of `post_type`, optionally filtered by language. An
    /// unconfigured site yields an empty list.
    async fn fetch_posts(&self, post_type: &str, lang: Option<&str>) -> Result<Vec<Post>>;

    /// Fetch one post; `None` when WordPress answers 404.
    async fn fetch_post(&self, post_type: &str, id: i64) -> Result<Option<Post>>;

    /// Create a draft in `target_lang` carrying the translated fields.
    async fn create_draft(
        &self,
        original: &Post,
        fields: &TranslatedFields,
        target_lang: &str,
    ) -> Result<i64>;

    /// Overwrite the Polylang translation map of one post.
    async fn update_translations(
        &self,
        post_type: &str,
        id: i64,
        translations: &BTreeMap<String, i64>,
    ) -> Result<()>;

    /// Heuristic: a language-filtered query succeeding means the plugin is present.
    async fn check_language_plugin_active(&self) -> bool;

    async fn install_language_plugin(&self) -> Result<bool>;

    async fn validate_connection(&self) -> bool;

    /// Create the draft, then point the original and the draft at each other.
    /// `original.lang` must be set (the caller fills it with the source language).
    async fn create_translation(
        &self,
        original: &Post,
        fields: &TranslatedFields,
        target_lang: &str,
    ) -> Result<i64, TranslationWriteError> {
        let draft_id = self
            .create_draft(original, fields, target_lang)
            .await
            .map_err(TranslationWriteError::Create)?;

        let translations = linked_translations(original, target_lang, draft_id);
        for post_id in [original.id, draft_id] {
            self.update_translations(&original.post_type, post_id, &translations)
                .await
                .map_err(|cause| TranslationWriteError::PartialLink {
                    draft_id,
                    post_id,
                    cause,
                })?;
        }
        Ok(draft_id)
    }
}

/// WordPress REST client bound to one site and one application password.
#[derive(Clone)]
pub struct WordPressClient {
    http: Client,
    base_url: Option<String>,
    username: String,
    app_password: String,
    probe_lang: String,
    page_size: u32,
}

impl fmt::Debug for WordPressClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordPressClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl WordPressClient {
    pub fn new(settings: &Settings, options: &WordPressOptions) -> Result<Self> {
        let http = Client::builder()
            .user_agent(options.user_agent.as_str())
            .timeout(options.timeout)
            .build()
            .context("failed to build WordPress HTTP client")?;
        let base = settings.wp_url.trim().trim_end_matches('/');
        Ok(Self {
            http,
            base_url: (!base.is_empty()).then(|| base.to_string()),
            username: settings.wp_user.clone(),
            app_password: settings.wp_app_password.clone(),
            probe_lang: settings.source_lang.clone(),
            page_size: options.page_size,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("WordPress URL is not configured"))?;
        let raw = format!("{}/wp-json/wp/v2/{}", base, path.trim_start_matches('/'));
        Url::parse(&raw).with_context(|| format!("invalid WordPress URL {}", raw))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.app_password))
    }

    pub fn build_list_request(&self, post_type: &str, lang: Option<&str>) -> Result<reqwest::Request> {
        let mut url = self.endpoint(rest_base(post_type))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(lang) = lang.filter(|l| !l.is_empty()) {
                query.append_pair("lang", lang);
            }
            query.append_pair("per_page", &self.page_size.to_string());
        }
        self.authed(self.http.get(url))
            .build()
            .context("failed to build WordPress request")
    }

    pub fn build_post_request(&self, post_type: &str, id: i64, body: &Value) -> Result<reqwest::Request> {
        let url = self.endpoint(&format!("{}/{}", rest_base(post_type), id))?;
        self.authed(self.http.post(url))
            .json(body)
            .build()
            .context("failed to build WordPress request")
    }

    async fn execute_json(&self, request: reqwest::Request, what: &str) -> Result<reqwest::Response> {
        debug!(method=%request.method(), url=%request.url(), "sending wordpress request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach WordPress ({})", what))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, what, "WordPress API error");
            return Err(anyhow!("failed to {}: {} {}", what, status, body));
        }
        Ok(res)
    }

    async fn activate_language_plugin(&self) -> Result<bool> {
        let url = self.endpoint(&format!("plugins/{}", LANGUAGE_PLUGIN_FILE))?;
        let res = self
            .authed(self.http.post(url))
            .json(&json!({ "status": "active" }))
            .send()
            .await
            .context("failed to reach WordPress (activate plugin)")?;
        Ok(res.status().is_success())
    }
}

#[async_trait]
impl ContentService for WordPressClient {
    async fn fetch_posts(&self, post_type: &str, lang: Option<&str>) -> Result<Vec<Post>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }
        let request = self.build_list_request(post_type, lang)?;
        let res = self.execute_json(request, "fetch posts").await?;
        res.json::<Vec<Post>>()
            .await
            .context("invalid WordPress posts response")
    }

    async fn fetch_post(&self, post_type: &str, id: i64) -> Result<Option<Post>> {
        let url = self.endpoint(&format!("{}/{}", rest_base(post_type), id))?;
        let res = self
            .authed(self.http.get(url))
            .send()
            .await
            .context("failed to reach WordPress (fetch post)")?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("failed to fetch post #{}: {} {}", id, status, body));
        }
        let post = res.json::<Post>().await.context("invalid WordPress post response")?;
        Ok(Some(post))
    }

    async fn create_draft(
        &self,
        original: &Post,
        fields: &TranslatedFields,
        target_lang: &str,
    ) -> Result<i64> {
        let url = self.endpoint(rest_base(&original.post_type))?;
        let body = build_draft_request(fields, target_lang);
        let request = self
            .authed(self.http.post(url))
            .json(&body)
            .build()
            .context("failed to build WordPress request")?;
        let res = self.execute_json(request, "create translation").await?;
        let created: CreatedPost = res
            .json()
            .await
            .context("invalid WordPress create response")?;
        info!(original = original.id, draft = created.id, target_lang, "created translated draft");
        Ok(created.id)
    }

    async fn update_translations(
        &self,
        post_type: &str,
        id: i64,
        translations: &BTreeMap<String, i64>,
    ) -> Result<()> {
        let request = self.build_post_request(post_type, id, &json!({ "translations": translations }))?;
        self.execute_json(request, &format!("link translations of post #{}", id))
            .await?;
        Ok(())
    }

    async fn check_language_plugin_active(&self) -> bool {
        let request = match self.build_list_request("post", Some(&self.probe_lang)) {
            Ok(req) => req,
            Err(_) => return false,
        };
        match self.http.execute(request).await {
            Ok(res) => res.status().is_success(),
            Err(err) => {
                debug!(?err, "language plugin probe failed");
                false
            }
        }
    }

    async fn install_language_plugin(&self) -> Result<bool> {
        if !self.is_configured() {
            return Ok(false);
        }
        let url = self.endpoint("plugins")?;
        info!(base_url = ?self.base_url, "installing language plugin");
        let res = self
            .authed(self.http.post(url))
            .json(&json!({ "slug": LANGUAGE_PLUGIN_SLUG, "status": "active" }))
            .send()
            .await
            .context("failed to reach WordPress (install plugin)")?;
        if res.status().is_success() {
            return Ok(true);
        }

        let status = res.status();
        let body: WpErrorBody = res.json().await.unwrap_or_default();
        if body.code == "folder_exists" {
            debug!("language plugin already installed; activating");
            return self.activate_language_plugin().await;
        }
        warn!(%status, code = %body.code, message = %body.message, "language plugin install failed");
        Ok(false)
    }

    async fn validate_connection(&self) -> bool {
        let Ok(url) = self.endpoint("users/me") else {
            return false;
        };
        match self.authed(self.http.get(url)).send().await {
            Ok(res) => res.status().is_success(),
            Err(err) => {
                debug!(?err, "WordPress connection check failed");
                false
            }
        }
    }
}

/// REST route segment for a content type.
pub fn rest_base(post_type: &str) -> &str {
    match post_type {
        "post" => "posts",
        "page" => "pages",
        "attachment" => "media",
        other => other,
    }
}

pub fn build_draft_request(fields: &TranslatedFields, target_lang: &str) -> Value {
    json!({
        "title": fields.title,
        "content": fields.content,
        "excerpt": fields.excerpt,
        "status": "draft",
        "lang": target_lang,
    })
}

/// Translation map written to both sides: the original's existing links plus
/// the new draft and the original itself.
pub fn linked_translations(original: &Post, target_lang: &str, draft_id: i64) -> BTreeMap<String, i64> {
    let mut map = original.translations.clone();
    map.insert(target_lang.to_string(), draft_id);
    let source_lang = original.lang.as_deref().unwrap_or("en");
    map.insert(source_lang.to_string(), original.id);
    map
}
