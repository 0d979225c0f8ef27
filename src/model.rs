use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Operator-editable settings. Singleton; saved wholesale.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub wp_url: String,
    #[serde(default)]
    pub wp_user: String,
    #[serde(default)]
    pub wp_app_password: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default)]
    pub target_langs: Vec<String>,
    #[serde(default = "default_post_types")]
    pub post_types: Vec<String>,
    #[serde(default, alias = "geminiApiKey")]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
}

fn default_source_lang() -> String {
    "en".to_string()
}

fn default_post_types() -> Vec<String> {
    vec!["post".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wp_url: String::new(),
            wp_user: String::new(),
            wp_app_password: String::new(),
            source_lang: default_source_lang(),
            target_langs: Vec::new(),
            post_types: default_post_types(),
            llm_api_key: None,
            system_instruction: None,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("wp_url", &self.wp_url)
            .field("wp_user", &self.wp_user)
            .field("source_lang", &self.source_lang)
            .field("target_langs", &self.target_langs)
            .field("post_types", &self.post_types)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Canonical form stored on save: trimmed URL without trailing slash,
    /// lower-case language codes, no duplicate targets, at least one content type.
    pub fn normalized(mut self) -> Self {
        self.wp_url = self.wp_url.trim().trim_end_matches('/').to_string();
        self.wp_user = self.wp_user.trim().to_string();
        self.source_lang = normalize_lang(&self.source_lang);
        if self.source_lang.is_empty() {
            self.source_lang = default_source_lang();
        }

        let mut langs: Vec<String> = Vec::with_capacity(self.target_langs.len());
        for lang in self.target_langs.iter().map(|l| normalize_lang(l)) {
            if !lang.is_empty() && !langs.contains(&lang) {
                langs.push(lang);
            }
        }
        self.target_langs = langs;

        let mut types: Vec<String> = Vec::with_capacity(self.post_types.len());
        for t in self.post_types.iter().map(|t| t.trim().to_string()) {
            if !t.is_empty() && !types.contains(&t) {
                types.push(t);
            }
        }
        if types.is_empty() {
            types = default_post_types();
        }
        self.post_types = types;

        self.llm_api_key = self
            .llm_api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.system_instruction = self
            .system_instruction
            .filter(|s| !s.trim().is_empty());
        self
    }

    pub fn wp_configured(&self) -> bool {
        !self.wp_url.trim().is_empty()
    }

    pub fn llm_api_key(&self) -> Option<&str> {
        self.llm_api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

pub fn normalize_lang(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}

/// A WordPress `{ "rendered": "..." }` field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

impl Rendered {
    pub fn new(s: impl Into<String>) -> Self {
        Self { rendered: s.into() }
    }
}

/// A post as returned by the WordPress REST API (plus Polylang fields).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    #[serde(default)]
    pub title: Rendered,
    #[serde(default)]
    pub content: Rendered,
    #[serde(default)]
    pub excerpt: Rendered,
    #[serde(default)]
    pub slug: String,
    #[serde(rename = "type", default = "default_post_type")]
    pub post_type: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default, deserialize_with = "deserialize_translations")]
    pub translations: BTreeMap<String, i64>,
    #[serde(default)]
    pub link: String,
}

fn default_post_type() -> String {
    "post".to_string()
}

/// PHP serialises an empty associative array as `[]`, so the translation map
/// may arrive as an object, an empty array, or null.
fn deserialize_translations<'de, D>(deserializer: D) -> Result<BTreeMap<String, i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Map(BTreeMap<String, i64>),
        List(Vec<serde_json::Value>),
        Null,
    }

    match Raw::deserialize(deserializer)? {
        Raw::Map(map) => Ok(map),
        Raw::List(_) | Raw::Null => Ok(BTreeMap::new()),
    }
}

/// Output of the translation step for one post.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslatedFields {
    pub title: String,
    pub content: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "PROCESSING" => Some(JobStatus::Processing),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only lifecycle: PENDING -> PROCESSING -> COMPLETED | FAILED.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State changes the pipeline may request for a job. Each one names the
/// status it must start from; the store applies it only if the row is still
/// in that status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTransition {
    Start,
    Progress(u8),
    Complete { translated_post_id: i64 },
    Fail(String),
}

impl JobTransition {
    /// Progress recorded when a job is picked up.
    pub const START_PROGRESS: u8 = 10;

    pub fn from_status(&self) -> JobStatus {
        match self {
            JobTransition::Start => JobStatus::Pending,
            _ => JobStatus::Processing,
        }
    }

    pub fn to_status(&self) -> JobStatus {
        match self {
            JobTransition::Start | JobTransition::Progress(_) => JobStatus::Processing,
            JobTransition::Complete { .. } => JobStatus::Completed,
            JobTransition::Fail(_) => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranslationJob {
    pub id: String,
    pub post_id: i64,
    pub post_type: String,
    pub source_lang: String,
    pub target_lang: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_post_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobLog {
    pub job_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
