//! Configuration loader and validator for the translation console backend.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub admin: Admin,
    pub wordpress: WordPress,
    pub llm: Llm,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub listen_port: u16,
    pub session_ttl_hours: u64,
}

/// Seed credentials for the console operator.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Admin {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Admin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admin")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// WordPress REST client tuning. Site URL and credentials live in the
/// operator-editable settings record, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordPress {
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

/// LLM endpoint settings. The API key is operator-editable and stored with
/// the rest of the settings record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Llm {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Database location, honouring `DATABASE_URL` when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/translator.db", self.app.data_dir))
    }

    /// Apply `PORT`, `ADMIN_USERNAME` and `ADMIN_PASSWORD` overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse().ok()) {
            self.app.listen_port = port;
        }
        if let Some(user) = lookup("ADMIN_USERNAME").filter(|u| !u.trim().is_empty()) {
            self.admin.username = user;
        }
        if let Some(pass) = lookup("ADMIN_PASSWORD").filter(|p| !p.is_empty()) {
            self.admin.password = pass;
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, the built-in example configuration is used.
/// - Environment overrides are applied before validation.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg: Config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => serde_yaml::from_str(example())?,
    };
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

/// One year.
pub const MAX_SESSION_TTL_HOURS: u64 = 24 * 365;

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.listen_port == 0 {
        return Err(ConfigError::Invalid("app.listen_port must be > 0"));
    }
    if cfg.app.session_ttl_hours == 0 || cfg.app.session_ttl_hours > MAX_SESSION_TTL_HOURS {
        return Err(ConfigError::Invalid("app.session_ttl_hours must be within 1..=8760"));
    }

    if cfg.admin.username.trim().is_empty() {
        return Err(ConfigError::Invalid("admin.username must be non-empty"));
    }
    if cfg.admin.password.is_empty() {
        return Err(ConfigError::Invalid("admin.password must be non-empty"));
    }

    // WordPress caps per_page at 100.
    if cfg.wordpress.page_size == 0 || cfg.wordpress.page_size > 100 {
        return Err(ConfigError::Invalid("wordpress.page_size must be within 1..=100"));
    }
    if cfg.wordpress.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("wordpress.request_timeout_secs must be > 0"));
    }

    if cfg.llm.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.base_url must be non-empty"));
    }
    if cfg.llm.model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.model must be non-empty"));
    }
    if cfg.llm.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("llm.request_timeout_secs must be > 0"));
    }

    Ok(())
}

/// Example configuration, also used as the built-in default.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  listen_port: 3001
  session_ttl_hours: 24

admin:
  username: "admin"
  password: "admin"

wordpress:
  page_size: 20
  request_timeout_secs: 30
  user_agent: "wp-translator/0.1"

llm:
  base_url: "https://generativelanguage.googleapis.com/"
  model: "gemini-2.5-flash"
  request_timeout_secs: 120
"#
}
