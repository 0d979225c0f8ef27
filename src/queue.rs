//! Translation job queue: admission, the single consumer, and the per-job pipeline.
//!
//! Jobs are persisted as PENDING rows before their id is handed to the worker
//! over a channel, so the database row is the source of truth and the channel
//! only carries wake-ups. Every status change goes through
//! [`db::apply_transition`], which refuses transitions from the wrong status.
use anyhow::{anyhow, Result};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::db::{self, NewJob, Pool};
use crate::model::{normalize_lang, JobTransition, Settings, TranslationJob};
use crate::translator::{self, GeminiClient, LlmOptions, TranslationService};
use crate::wordpress::{ContentService, TranslationWriteError, WordPressClient, WordPressOptions};

/// Progress checkpoints reported while a job runs.
const PROGRESS_FETCHED: u8 = 30;
const PROGRESS_TRANSLATED: u8 = 70;

const INTERRUPTED_MESSAGE: &str = "Interrupted: the server stopped while this job was running";

/// Builds gateways from the settings in force for one job.
pub trait Gateways: Send + Sync {
    fn content(&self, settings: &Settings) -> Result<Arc<dyn ContentService>>;
    fn translator(&self, settings: &Settings) -> Result<Arc<dyn TranslationService>>;
}

/// Production gateways: WordPress REST and the Generative Language API.
#[derive(Debug, Clone)]
pub struct HttpGateways {
    pub wordpress: WordPressOptions,
    pub llm: LlmOptions,
}

impl Gateways for HttpGateways {
    fn content(&self, settings: &Settings) -> Result<Arc<dyn ContentService>> {
        Ok(Arc::new(WordPressClient::new(settings, &self.wordpress)?))
    }

    fn translator(&self, settings: &Settings) -> Result<Arc<dyn TranslationService>> {
        let api_key = settings
            .llm_api_key()
            .ok_or_else(|| anyhow!("LLM API key is not configured"))?;
        Ok(Arc::new(GeminiClient::new(
            api_key.to_string(),
            settings.system_instruction.clone(),
            &self.llm,
        )?))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing WordPress URL or LLM API key in settings")]
    NotConfigured,
    #[error("Post #{0} not found")]
    PostNotFound(i64),
    #[error("{0:#}")]
    Gateway(anyhow::Error),
    #[error("{0:#}")]
    Content(anyhow::Error),
    #[error("{0:#}")]
    Translation(anyhow::Error),
    #[error("{0}")]
    Write(TranslationWriteError),
}

/// Producer side of the queue. Cheap to clone.
///
/// The channel is unbounded: rows are the backlog, so admission never waits
/// on the worker.
#[derive(Clone)]
pub struct JobQueue {
    pool: Pool,
    sender: mpsc::UnboundedSender<String>,
}

impl JobQueue {
    pub fn new(pool: Pool) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { pool, sender }, receiver)
    }

    /// Admit one job per (post, target language) pair, skipping pairs whose
    /// target is the configured source language. Returns the created job ids
    /// in admission order. Nothing is stored when the worker is gone or any
    /// insert fails.
    #[instrument(skip_all, fields(posts = post_ids.len(), langs = target_langs.len()))]
    pub async fn enqueue(
        &self,
        post_ids: &[i64],
        post_type: &str,
        target_langs: &[String],
    ) -> Result<Vec<String>> {
        if self.sender.is_closed() {
            return Err(anyhow!("translation worker is not running"));
        }
        let settings = db::load_settings(&self.pool).await?;
        let source_lang = normalize_lang(&settings.source_lang);

        let mut langs: Vec<String> = Vec::with_capacity(target_langs.len());
        for lang in target_langs.iter().map(|l| normalize_lang(l)) {
            if lang.is_empty() || lang == source_lang || langs.contains(&lang) {
                continue;
            }
            langs.push(lang);
        }
        let mut posts: Vec<i64> = Vec::with_capacity(post_ids.len());
        for id in post_ids {
            if !posts.contains(id) {
                posts.push(*id);
            }
        }

        let mut new_jobs = Vec::with_capacity(posts.len() * langs.len());
        for post_id in &posts {
            for lang in &langs {
                new_jobs.push(NewJob {
                    post_id: *post_id,
                    post_type: post_type.to_string(),
                    source_lang: source_lang.clone(),
                    target_lang: lang.clone(),
                    title: Some(format!("Post #{} -> {}", post_id, lang.to_uppercase())),
                });
            }
        }
        let created: Vec<String> = db::insert_jobs(&self.pool, &new_jobs)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();

        for id in &created {
            // A worker that stops after the check above picks the rows up on restart.
            if self.sender.send(id.clone()).is_err() {
                warn!(job_id = %id, "worker stopped; job left for recovery");
            }
        }
        info!(jobs = created.len(), "enqueued translation jobs");
        Ok(created)
    }
}

/// What happened when the worker picked up a job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { translated_post_id: i64 },
    Failed(String),
    /// The job was no longer PENDING (already handled).
    Skipped,
}

/// Single consumer draining the queue.
pub struct JobWorker {
    receiver: mpsc::UnboundedReceiver<String>,
    pool: Pool,
    gateways: Arc<dyn Gateways>,
}

impl JobWorker {
    pub fn new(receiver: mpsc::UnboundedReceiver<String>, pool: Pool, gateways: Arc<dyn Gateways>) -> Self {
        Self {
            receiver,
            pool,
            gateways,
        }
    }

    pub async fn run(mut self) {
        info!("translation worker started");
        if let Err(err) = self.recover().await {
            error!(?err, "failed to recover queued jobs");
        }
        while let Some(job_id) = self.receiver.recv().await {
            self.handle(&job_id).await;
        }
        info!("translation worker stopped: channel closed");
    }

    /// Fail jobs cut off by a previous shutdown and run the PENDING backlog.
    async fn recover(&self) -> Result<()> {
        let interrupted = db::fail_interrupted_jobs(&self.pool, INTERRUPTED_MESSAGE).await?;
        if interrupted > 0 {
            warn!(interrupted, "failed jobs interrupted by restart");
        }
        let backlog = db::pending_job_ids(&self.pool).await?;
        if !backlog.is_empty() {
            info!(jobs = backlog.len(), "resuming pending jobs");
        }
        for job_id in backlog {
            self.handle(&job_id).await;
        }
        Ok(())
    }

    async fn handle(&self, job_id: &str) {
        if let Err(err) = process_job(&self.pool, self.gateways.as_ref(), job_id).await {
            error!(?err, job_id, "translation job bookkeeping failed");
        }
    }
}

/// Run one job through the pipeline and record its terminal state.
/// Pipeline failures become a FAILED job; only storage errors are returned,
/// and even then the job is failed on a best-effort basis so it never stays
/// PROCESSING.
pub async fn process_job(pool: &Pool, gateways: &dyn Gateways, job_id: &str) -> Result<JobOutcome> {
    if !db::apply_transition(pool, job_id, &JobTransition::Start).await? {
        return Ok(JobOutcome::Skipped);
    }
    match run_started_job(pool, gateways, job_id).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            let message = format!("Internal error: {:#}", err);
            match db::apply_transition(pool, job_id, &JobTransition::Fail(message.clone())).await {
                Ok(true) => log_line(pool, job_id, &format!("Error: {}", message)).await,
                Ok(false) => {}
                Err(mark_err) => error!(?mark_err, job_id, "failed to mark job as failed"),
            }
            Err(err)
        }
    }
}

async fn run_started_job(pool: &Pool, gateways: &dyn Gateways, job_id: &str) -> Result<JobOutcome> {
    let job = db::get_job(pool, job_id)
        .await?
        .ok_or_else(|| anyhow!("job {} vanished", job_id))?;

    let span = info_span!(
        "translation_job",
        job_id = %job.id,
        post_id = job.post_id,
        target_lang = %job.target_lang,
    );

    async move {
        let result = run_pipeline(pool, gateways, &job).await;
        record_outcome(pool, &job, result).await
    }
    .instrument(span)
    .await
}

/// Write the terminal state of a job exactly once.
async fn record_outcome(
    pool: &Pool,
    job: &TranslationJob,
    result: Result<i64, PipelineError>,
) -> Result<JobOutcome> {
    match result {
        Ok(translated_post_id) => {
            db::apply_transition(pool, &job.id, &JobTransition::Complete { translated_post_id })
                .await?;
            log_line(
                pool,
                &job.id,
                &format!("Created draft #{} ({})", translated_post_id, job.target_lang),
            )
            .await;
            info!(translated_post_id, "translation completed");
            Ok(JobOutcome::Completed { translated_post_id })
        }
        Err(err) => {
            let message = err.to_string();
            warn!(error = %message, "translation failed");
            db::apply_transition(pool, &job.id, &JobTransition::Fail(message.clone())).await?;
            log_line(pool, &job.id, &format!("Error: {}", message)).await;
            Ok(JobOutcome::Failed(message))
        }
    }
}

async fn run_pipeline(
    pool: &Pool,
    gateways: &dyn Gateways,
    job: &TranslationJob,
) -> Result<i64, PipelineError> {
    // Settings are read per job so edits apply to jobs not yet started.
    let settings = db::load_settings(pool).await.map_err(PipelineError::Gateway)?;
    if !settings.wp_configured() || settings.llm_api_key().is_none() {
        return Err(PipelineError::NotConfigured);
    }
    let content = gateways.content(&settings).map_err(PipelineError::Gateway)?;
    let translator = gateways.translator(&settings).map_err(PipelineError::Gateway)?;

    let mut post = content
        .fetch_post(&job.post_type, job.post_id)
        .await
        .map_err(PipelineError::Content)?
        .ok_or(PipelineError::PostNotFound(job.post_id))?;
    if post.lang.as_deref().map_or(true, str::is_empty) {
        post.lang = Some(job.source_lang.clone());
    }
    checkpoint(pool, &job.id, PROGRESS_FETCHED).await;
    log_line(pool, &job.id, &format!("Fetched post #{}. Starting translation...", job.post_id)).await;

    let fields = translator::translate_post(
        translator.as_ref(),
        &post,
        &job.source_lang,
        &job.target_lang,
    )
    .await
    .map_err(PipelineError::Translation)?;
    checkpoint(pool, &job.id, PROGRESS_TRANSLATED).await;

    content
        .create_translation(&post, &fields, &job.target_lang)
        .await
        .map_err(PipelineError::Write)
}

async fn checkpoint(pool: &Pool, job_id: &str, progress: u8) {
    if let Err(err) = db::apply_transition(pool, job_id, &JobTransition::Progress(progress)).await {
        warn!(?err, progress, "failed to record progress");
    }
}

async fn log_line(pool: &Pool, job_id: &str, message: &str) {
    if let Err(err) = db::append_job_log(pool, job_id, message).await {
        warn!(?err, "failed to append job log");
    }
}
