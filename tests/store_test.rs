use chrono::Duration;
use wp_translator::auth;
use wp_translator::db::{self, NewJob};
use wp_translator::model::{JobStatus, JobTransition, Settings};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn new_job(post_id: i64, lang: &str) -> NewJob {
    NewJob {
        post_id,
        post_type: "post".into(),
        source_lang: "en".into(),
        target_lang: lang.into(),
        title: None,
    }
}

#[tokio::test]
async fn settings_default_until_saved_then_round_trip() {
    let pool = setup_pool().await;
    let defaults = db::load_settings(&pool).await.unwrap();
    assert_eq!(defaults, Settings::default());
    assert_eq!(defaults.source_lang, "en");

    let settings = Settings {
        wp_url: "https://example.com".into(),
        wp_user: "editor".into(),
        wp_app_password: "xxxx yyyy".into(),
        source_lang: "en".into(),
        target_langs: vec!["sk".into(), "de".into()],
        post_types: vec!["post".into(), "page".into()],
        llm_api_key: Some("key".into()),
        system_instruction: Some("Be formal.".into()),
    };
    db::save_settings(&pool, &settings).await.unwrap();
    assert_eq!(db::load_settings(&pool).await.unwrap(), settings);

    // Saving again replaces the whole record.
    let cleared = Settings {
        wp_url: "https://other.example.com".into(),
        ..Default::default()
    };
    db::save_settings(&pool, &cleared).await.unwrap();
    assert_eq!(db::load_settings(&pool).await.unwrap(), cleared);
}

#[tokio::test]
async fn recent_jobs_are_newest_first_and_capped() {
    let pool = setup_pool().await;
    let mut ids = Vec::new();
    for post_id in 0..55 {
        ids.push(db::insert_job(&pool, &new_job(post_id, "sk")).await.unwrap().id);
    }

    let jobs = db::list_recent_jobs(&pool, 50).await.unwrap();
    assert_eq!(jobs.len(), 50);
    assert_eq!(jobs[0].id, ids[54]);
    assert_eq!(jobs[49].id, ids[5]);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Pending && j.progress == 0));

    let pending = db::pending_job_ids(&pool).await.unwrap();
    assert_eq!(pending, ids);
}

#[tokio::test]
async fn transitions_are_guarded_by_source_status() {
    let pool = setup_pool().await;
    let id = db::insert_job(&pool, &new_job(105, "sk")).await.unwrap().id;

    // Cannot finish a job that never started.
    let done = JobTransition::Complete { translated_post_id: 7 };
    assert!(!db::apply_transition(&pool, &id, &done).await.unwrap());
    assert!(!db::apply_transition(&pool, &id, &JobTransition::Progress(50)).await.unwrap());

    assert!(db::apply_transition(&pool, &id, &JobTransition::Start).await.unwrap());
    assert!(!db::apply_transition(&pool, &id, &JobTransition::Start).await.unwrap());
    let job = db::get_job(&pool, &id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.progress, 10);

    // Progress never moves backwards and never reaches 100 while running.
    db::apply_transition(&pool, &id, &JobTransition::Progress(70)).await.unwrap();
    db::apply_transition(&pool, &id, &JobTransition::Progress(30)).await.unwrap();
    assert_eq!(db::get_job(&pool, &id).await.unwrap().unwrap().progress, 70);
    db::apply_transition(&pool, &id, &JobTransition::Progress(100)).await.unwrap();
    assert_eq!(db::get_job(&pool, &id).await.unwrap().unwrap().progress, 99);

    assert!(db::apply_transition(&pool, &id, &done).await.unwrap());
    let job = db::get_job(&pool, &id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.translated_post_id, Some(7));
    assert!(job.completed_at.is_some());

    // Terminal jobs stay terminal.
    let fail = JobTransition::Fail("late failure".into());
    assert!(!db::apply_transition(&pool, &id, &fail).await.unwrap());
    let job = db::get_job(&pool, &id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error, None);
}

#[tokio::test]
async fn failed_jobs_keep_progress_and_have_no_completion_time() {
    let pool = setup_pool().await;
    let id = db::insert_job(&pool, &new_job(1, "de")).await.unwrap().id;
    db::apply_transition(&pool, &id, &JobTransition::Start).await.unwrap();
    db::apply_transition(&pool, &id, &JobTransition::Progress(30)).await.unwrap();
    assert!(db::apply_transition(&pool, &id, &JobTransition::Fail("boom".into()))
        .await
        .unwrap());

    let job = db::get_job(&pool, &id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 30);
    assert_eq!(job.error.as_deref(), Some("boom"));
    assert!(job.completed_at.is_none());
}

#[tokio::test]
async fn interrupted_jobs_are_failed_on_recovery() {
    let pool = setup_pool().await;
    let running = db::insert_job(&pool, &new_job(1, "sk")).await.unwrap().id;
    let waiting = db::insert_job(&pool, &new_job(2, "sk")).await.unwrap().id;
    db::apply_transition(&pool, &running, &JobTransition::Start).await.unwrap();

    db::append_job_log(&pool, &running, "Fetched post #1. Starting translation...")
        .await
        .unwrap();

    assert_eq!(db::fail_interrupted_jobs(&pool, "Interrupted").await.unwrap(), 1);
    let job = db::get_job(&pool, &running).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Interrupted"));
    assert_eq!(db::pending_job_ids(&pool).await.unwrap(), vec![waiting.clone()]);

    let logs = db::list_job_logs(&pool, &running).await.unwrap();
    assert_eq!(logs.last().unwrap().message, "Error: Interrupted");
    assert!(db::list_job_logs(&pool, &waiting).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_insert_is_all_or_nothing() {
    let pool = setup_pool().await;
    sqlx::query(
        "CREATE TRIGGER reject_post_13 BEFORE INSERT ON translation_jobs \
         WHEN NEW.post_id = 13 BEGIN SELECT RAISE(ABORT, 'constraint failed'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let batch = vec![new_job(1, "sk"), new_job(2, "sk"), new_job(13, "sk")];
    assert!(db::insert_jobs(&pool, &batch).await.is_err());
    assert!(db::list_recent_jobs(&pool, 50).await.unwrap().is_empty());

    let created = db::insert_jobs(&pool, &batch[..2]).await.unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(db::pending_job_ids(&pool).await.unwrap().len(), 2);
}

#[tokio::test]
async fn job_logs_are_ordered_per_job() {
    let pool = setup_pool().await;
    let a = db::insert_job(&pool, &new_job(1, "sk")).await.unwrap().id;
    let b = db::insert_job(&pool, &new_job(2, "sk")).await.unwrap().id;
    db::append_job_log(&pool, &a, "first").await.unwrap();
    db::append_job_log(&pool, &b, "other").await.unwrap();
    db::append_job_log(&pool, &a, "second").await.unwrap();

    let logs = db::list_job_logs(&pool, &a).await.unwrap();
    let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert!(db::list_job_logs(&pool, "missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_login_and_sessions() {
    let pool = setup_pool().await;
    auth::seed_admin(&pool, "admin", "s3cret").await.unwrap();
    assert!(auth::verify_admin(&pool, "admin", "s3cret").await.unwrap());
    assert!(!auth::verify_admin(&pool, "admin", "wrong").await.unwrap());
    assert!(!auth::verify_admin(&pool, "nobody", "s3cret").await.unwrap());

    // Re-seeding rotates the password.
    auth::seed_admin(&pool, "admin", "n3w").await.unwrap();
    assert!(!auth::verify_admin(&pool, "admin", "s3cret").await.unwrap());
    assert!(auth::verify_admin(&pool, "admin", "n3w").await.unwrap());

    let token = db::create_session(&pool, "admin", Duration::hours(1)).await.unwrap();
    assert!(db::session_valid(&pool, &token).await.unwrap());
    assert!(!db::session_valid(&pool, "forged").await.unwrap());

    let expired = db::create_session(&pool, "admin", Duration::seconds(-1)).await.unwrap();
    assert!(!db::session_valid(&pool, &expired).await.unwrap());
}
