//! Row mappers and view models used by repositories.
//!
//! Keep these structs focused on the data moved in and out of queries.
//! Lifecycle rules live in `crate::model` and `crate::queue`.

use crate::model::{JobLog, JobStatus, TranslationJob};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Values supplied when a job is admitted to the queue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub post_id: i64,
    pub post_type: String,
    pub source_lang: String,
    pub target_lang: String,
    pub title: Option<String>,
}

/// Stored password material for one admin account.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub salt: String,
    pub hash: String,
}

pub(crate) fn job_from_row(row: &SqliteRow) -> Result<TranslationJob> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("unknown job status '{}'", status))?;
    let progress: i64 = row.try_get("progress")?;
    Ok(TranslationJob {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        post_type: row.try_get("post_type")?,
        source_lang: row.try_get("source_lang")?,
        target_lang: row.try_get("target_lang")?,
        status,
        progress: progress.clamp(0, 100) as u8,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        error: row.try_get("error")?,
        title: row.try_get("title")?,
        translated_post_id: row.try_get("translated_post_id")?,
    })
}

pub(crate) fn log_from_row(row: &SqliteRow) -> Result<JobLog> {
    Ok(JobLog {
        job_id: row.try_get("job_id")?,
        message: row.try_get("message")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}
