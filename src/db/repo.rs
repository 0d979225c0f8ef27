use super::model::{job_from_row, log_from_row, AdminCredentials, NewJob};
use crate::model::{JobLog, JobStatus, JobTransition, Settings, TranslationJob};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

const JOB_COLUMNS: &str = "id, post_id, post_type, source_lang, target_lang, status, progress, \
     created_at, completed_at, error, title, translated_post_id";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// --- settings ---

/// Load the singleton settings record, or defaults if nothing was saved yet.
#[instrument(skip_all)]
pub async fn load_settings(pool: &Pool) -> Result<Settings> {
    let row = sqlx::query(
        "SELECT wp_url, wp_user, wp_app_password, source_lang, target_langs, post_types, \
         llm_api_key, system_instruction FROM settings WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(Settings::default());
    };

    let target_langs: String = row.try_get("target_langs")?;
    let post_types: String = row.try_get("post_types")?;
    Ok(Settings {
        wp_url: row.try_get("wp_url")?,
        wp_user: row.try_get("wp_user")?,
        wp_app_password: row.try_get("wp_app_password")?,
        source_lang: row.try_get("source_lang")?,
        target_langs: serde_json::from_str(&target_langs)
            .context("settings.target_langs is not a JSON array")?,
        post_types: serde_json::from_str(&post_types)
            .context("settings.post_types is not a JSON array")?,
        llm_api_key: row.try_get("llm_api_key")?,
        system_instruction: row.try_get("system_instruction")?,
    })
}

/// Overwrite the singleton settings record wholesale.
#[instrument(skip_all)]
pub async fn save_settings(pool: &Pool, settings: &Settings) -> Result<()> {
    let target_langs = serde_json::to_string(&settings.target_langs)?;
    let post_types = serde_json::to_string(&settings.post_types)?;
    sqlx::query(
        "INSERT INTO settings (id, wp_url, wp_user, wp_app_password, source_lang, target_langs, \
         post_types, llm_api_key, system_instruction, updated_at) \
         VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(id) DO UPDATE SET \
           wp_url = excluded.wp_url, \
           wp_user = excluded.wp_user, \
           wp_app_password = excluded.wp_app_password, \
           source_lang = excluded.source_lang, \
           target_langs = excluded.target_langs, \
           post_types = excluded.post_types, \
           llm_api_key = excluded.llm_api_key, \
           system_instruction = excluded.system_instruction, \
           updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&settings.wp_url)
    .bind(&settings.wp_user)
    .bind(&settings.wp_app_password)
    .bind(&settings.source_lang)
    .bind(target_langs)
    .bind(post_types)
    .bind(&settings.llm_api_key)
    .bind(&settings.system_instruction)
    .execute(pool)
    .await?;
    Ok(())
}

// --- translation jobs ---

/// Insert a PENDING job with progress 0 and return it.
pub async fn insert_job(pool: &Pool, job: &NewJob) -> Result<TranslationJob> {
    let mut created = insert_jobs(pool, std::slice::from_ref(job)).await?;
    created
        .pop()
        .context("job insert returned no row")
}

/// Insert PENDING jobs in one transaction: either every job is admitted or none is.
#[instrument(skip_all, fields(jobs = jobs.len()))]
pub async fn insert_jobs(pool: &Pool, jobs: &[NewJob]) -> Result<Vec<TranslationJob>> {
    let mut tx = pool.begin().await?;
    let mut created = Vec::with_capacity(jobs.len());
    for job in jobs {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO translation_jobs (id, post_id, post_type, source_lang, target_lang, status, \
             progress, created_at, title) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(job.post_id)
        .bind(&job.post_type)
        .bind(&job.source_lang)
        .bind(&job.target_lang)
        .bind(JobStatus::Pending.as_str())
        .bind(created_at)
        .bind(&job.title)
        .execute(&mut *tx)
        .await?;

        created.push(TranslationJob {
            id,
            post_id: job.post_id,
            post_type: job.post_type.clone(),
            source_lang: job.source_lang.clone(),
            target_lang: job.target_lang.clone(),
            status: JobStatus::Pending,
            progress: 0,
            created_at,
            completed_at: None,
            error: None,
            title: job.title.clone(),
            translated_post_id: None,
        });
    }
    tx.commit().await?;
    Ok(created)
}

#[instrument(skip_all)]
pub async fn get_job(pool: &Pool, job_id: &str) -> Result<Option<TranslationJob>> {
    let sql = format!("SELECT {} FROM translation_jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql).bind(job_id).fetch_optional(pool).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Most recent jobs first, capped at `limit`.
#[instrument(skip_all)]
pub async fn list_recent_jobs(pool: &Pool, limit: i64) -> Result<Vec<TranslationJob>> {
    let sql = format!(
        "SELECT {} FROM translation_jobs ORDER BY seq DESC LIMIT ?",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    rows.iter().map(job_from_row).collect()
}

/// Ids of PENDING jobs in admission order.
#[instrument(skip_all)]
pub async fn pending_job_ids(pool: &Pool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT id FROM translation_jobs WHERE status = ? ORDER BY seq ASC",
    )
    .bind(JobStatus::Pending.as_str())
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Fail jobs a previous process left PROCESSING and record the reason in
/// each job's log. Returns how many were failed.
#[instrument(skip_all)]
pub async fn fail_interrupted_jobs(pool: &Pool, message: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let ids = sqlx::query_scalar::<_, String>("SELECT id FROM translation_jobs WHERE status = ?")
        .bind(JobStatus::Processing.as_str())
        .fetch_all(&mut *tx)
        .await?;
    sqlx::query("UPDATE translation_jobs SET status = ?, error = ? WHERE status = ?")
        .bind(JobStatus::Failed.as_str())
        .bind(message)
        .bind(JobStatus::Processing.as_str())
        .execute(&mut *tx)
        .await?;
    let line = format!("Error: {}", message);
    let now = Utc::now();
    for id in &ids {
        sqlx::query("INSERT INTO job_logs (job_id, message, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(&line)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(ids.len() as u64)
}

/// Apply a lifecycle transition to one job. The update only matches while the
/// job is still in the transition's source status, so a transition out of a
/// terminal status (or a regression) is a no-op. Returns whether it applied.
#[instrument(skip_all, fields(job_id = %job_id, to = %transition.to_status()))]
pub async fn apply_transition(pool: &Pool, job_id: &str, transition: &JobTransition) -> Result<bool> {
    debug_assert!(transition.from_status().can_transition_to(transition.to_status()));
    let from = transition.from_status().as_str();
    let to = transition.to_status().as_str();
    let res = match transition {
        JobTransition::Start => {
            sqlx::query(
                "UPDATE translation_jobs SET status = ?, progress = MAX(progress, ?) \
                 WHERE id = ? AND status = ?",
            )
            .bind(to)
            .bind(i64::from(JobTransition::START_PROGRESS))
            .bind(job_id)
            .bind(from)
            .execute(pool)
            .await?
        }
        JobTransition::Progress(progress) => {
            // 100 is reserved for COMPLETED.
            let progress = i64::from((*progress).min(99));
            sqlx::query(
                "UPDATE translation_jobs SET progress = MAX(progress, ?) \
                 WHERE id = ? AND status = ?",
            )
            .bind(progress)
            .bind(job_id)
            .bind(from)
            .execute(pool)
            .await?
        }
        JobTransition::Complete { translated_post_id } => {
            sqlx::query(
                "UPDATE translation_jobs SET status = ?, progress = 100, completed_at = ?, \
                 translated_post_id = ? WHERE id = ? AND status = ?",
            )
            .bind(to)
            .bind(Utc::now())
            .bind(translated_post_id)
            .bind(job_id)
            .bind(from)
            .execute(pool)
            .await?
        }
        JobTransition::Fail(message) => {
            sqlx::query("UPDATE translation_jobs SET status = ?, error = ? WHERE id = ? AND status = ?")
                .bind(to)
                .bind(message)
                .bind(job_id)
                .bind(from)
                .execute(pool)
                .await?
        }
    };
    Ok(res.rows_affected() == 1)
}

// --- job logs ---

#[instrument(skip_all)]
pub async fn append_job_log(pool: &Pool, job_id: &str, message: &str) -> Result<()> {
    sqlx::query("INSERT INTO job_logs (job_id, message, created_at) VALUES (?, ?, ?)")
        .bind(job_id)
        .bind(message)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

/// Log lines of one job, oldest first.
#[instrument(skip_all)]
pub async fn list_job_logs(pool: &Pool, job_id: &str) -> Result<Vec<JobLog>> {
    let rows = sqlx::query(
        "SELECT job_id, message, created_at FROM job_logs WHERE job_id = ? ORDER BY id ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(log_from_row).collect()
}

// --- admins & sessions ---

/// Create or replace the password material for `username`.
#[instrument(skip_all)]
pub async fn upsert_admin(pool: &Pool, username: &str, creds: &AdminCredentials) -> Result<()> {
    sqlx::query(
        "INSERT INTO admin_users (username, password_salt, password_hash) VALUES (?, ?, ?) \
         ON CONFLICT(username) DO UPDATE SET \
           password_salt = excluded.password_salt, \
           password_hash = excluded.password_hash",
    )
    .bind(username)
    .bind(&creds.salt)
    .bind(&creds.hash)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn admin_credentials(pool: &Pool, username: &str) -> Result<Option<AdminCredentials>> {
    let row = sqlx::query("SELECT password_salt, password_hash FROM admin_users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    row.map(|r| {
        Ok(AdminCredentials {
            salt: r.try_get("password_salt")?,
            hash: r.try_get("password_hash")?,
        })
    })
    .transpose()
}

/// Store a new session token for `username`, valid for `ttl`.
#[instrument(skip_all)]
pub async fn create_session(pool: &Pool, username: &str, ttl: Duration) -> Result<String> {
    let token = Uuid::new_v4().simple().to_string();
    let now = Utc::now();
    sqlx::query("INSERT INTO sessions (token, username, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(username)
        .bind(now)
        .bind(now + ttl)
        .execute(pool)
        .await?;
    Ok(token)
}

/// Whether `token` names an unexpired session. Expired sessions are removed.
#[instrument(skip_all)]
pub async fn session_valid(pool: &Pool, token: &str) -> Result<bool> {
    let expires_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT expires_at FROM sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    match expires_at {
        Some(at) if at > Utc::now() => Ok(true),
        Some(_) => {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(token)
                .execute(pool)
                .await?;
            Ok(false)
        }
        None => Ok(false),
    }
}
