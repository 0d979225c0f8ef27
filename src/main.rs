use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use wp_translator::auth;
use wp_translator::config;
use wp_translator::db;
use wp_translator::queue::{HttpGateways, JobQueue, JobWorker};
use wp_translator::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,wp_translator=debug,tower_http=info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        cfg.app.listen_port = port;
    }
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    auth::seed_admin(&pool, cfg.admin.username.trim(), &cfg.admin.password).await?;

    let gateways = Arc::new(HttpGateways {
        wordpress: (&cfg.wordpress).into(),
        llm: (&cfg.llm).into(),
    });

    // Single consumer; jobs run one at a time.
    let (queue, receiver) = JobQueue::new(pool.clone());
    let worker = JobWorker::new(receiver, pool.clone(), gateways.clone());
    tokio::spawn(worker.run());

    let port = cfg.app.listen_port;
    let state = AppState {
        pool,
        queue,
        gateways,
        config: Arc::new(cfg),
    };
    let router = server::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
