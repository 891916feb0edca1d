use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

use wikifacts::api::{self, AppState};
use wikifacts::broadcast::Broadcaster;
use wikifacts::channels::{DeliveryChannel, Outbound, WhatsAppChannel};
use wikifacts::config::AppConfig;
use wikifacts::content::{ContentSource, WikipediaSource};
use wikifacts::job::DailyJob;
use wikifacts::retry::RetryPolicy;
use wikifacts::scheduler::{self, DAILY_FACTS, DailyFactsTask, RETENTION_CLEANUP, RETENTION_CRON, RetentionTask, Scheduler};
use wikifacts::session::SessionEngine;
use wikifacts::store::{Database, LibSqlBackend, RetryingDatabase};
use wikifacts::summarizer::{OpenRouterSummarizer, Summarizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = wikifacts::logging::init(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.server.environment.as_str(),
        language = %config.content.language,
        "Starting wikifacts"
    );

    // ── Database ─────────────────────────────────────────────────────────
    let backend = LibSqlBackend::new_local(std::path::Path::new(&config.database.path))
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    let db: Arc<dyn Database> = Arc::new(RetryingDatabase::new(
        Arc::new(backend),
        RetryPolicy::database().with_max_attempts(config.database.retry_attempts),
    ));
    db.ping().await.context("Database ping failed")?;
    tracing::info!(path = %config.database.path, "Database ready");

    // ── Services ─────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let channel: Arc<dyn DeliveryChannel> =
        Arc::new(WhatsAppChannel::new(config.twilio.clone()).context("Failed to create WhatsApp channel")?);
    let outbound = Arc::new(Outbound::new(channel, Arc::clone(&db), RetryPolicy::delivery()));
    let broadcaster = Arc::new(
        Broadcaster::new(Arc::clone(&outbound), config.broadcast.clone()).with_shutdown(shutdown_rx.clone()),
    );

    let content: Arc<dyn ContentSource> =
        Arc::new(WikipediaSource::new(&config.content).context("Failed to create content source")?);
    let summarizer: Arc<dyn Summarizer> =
        Arc::new(OpenRouterSummarizer::new(config.summarizer.clone()).context("Failed to create summarizer")?);
    tracing::info!(model = summarizer.model_name(), source = content.name(), "Content pipeline ready");

    let job = Arc::new(DailyJob::new(
        Arc::clone(&db),
        content,
        summarizer,
        Arc::clone(&broadcaster),
        &config.content.language,
    ));

    // ── Scheduler ────────────────────────────────────────────────────────
    let mut jobs = Scheduler::new(config.scheduler.timezone);
    jobs.add_job(
        DAILY_FACTS,
        &config.scheduler.daily_cron(),
        Arc::new(DailyFactsTask(Arc::clone(&job))),
    )?;
    jobs.add_job(RETENTION_CLEANUP, RETENTION_CRON, Arc::new(RetentionTask(Arc::clone(&job))))?;
    let jobs = Arc::new(jobs);
    let ticker = scheduler::spawn_ticker(Arc::clone(&jobs), config.scheduler.tick, shutdown_rx);

    // ── HTTP server ──────────────────────────────────────────────────────
    let state = AppState {
        db: Arc::clone(&db),
        sessions: Arc::new(SessionEngine::new(
            Arc::clone(&db),
            Arc::clone(&outbound),
            &config.content.language,
        )),
        outbound,
        broadcaster,
        job,
        scheduler: jobs,
        inbound: TaskTracker::new(),
        environment: config.server.environment,
        language: config.content.language.clone(),
    };
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "HTTP server started");

    let grace = config.server.shutdown_grace;
    let drained = api::serve(listener, state, shutdown_signal(), shutdown_tx, grace)
        .await
        .context("HTTP server error")?;
    if !drained {
        tracing::warn!(grace_secs = grace.as_secs(), "Requests still in flight after grace period");
    }

    // ── Shutdown ─────────────────────────────────────────────────────────
    match tokio::time::timeout(grace, ticker).await {
        Ok(_) => tracing::info!("Scheduler drained"),
        Err(_) => tracing::warn!(
            grace_secs = grace.as_secs(),
            "Scheduler still busy after grace period, exiting anyway"
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
