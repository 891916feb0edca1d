//! HTTP surface: provider webhooks, admin endpoints and health checks.

pub mod admin;
pub mod webhook;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono_tz::Tz;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broadcast::Broadcaster;
use crate::channels::Outbound;
use crate::config::Environment;
use crate::job::DailyJob;
use crate::scheduler::Scheduler;
use crate::session::SessionEngine;
use crate::store::Database;

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub sessions: Arc<SessionEngine>,
    pub outbound: Arc<Outbound>,
    pub broadcaster: Arc<Broadcaster>,
    pub job: Arc<DailyJob>,
    pub scheduler: Arc<Scheduler>,
    /// Background inbound processing, drained on shutdown.
    pub inbound: TaskTracker,
    pub environment: Environment,
    /// Language used when a request does not name one.
    pub language: String,
}

impl AppState {
    pub fn timezone(&self) -> Tz {
        self.scheduler.timezone()
    }

    /// Today's date in the scheduler's time zone.
    pub fn today(&self) -> chrono::NaiveDate {
        chrono::Utc::now().with_timezone(&self.timezone()).date_naive()
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let production = state.environment.is_production();

    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(webhook::routes())
        .merge(admin::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if !production {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve the router until `signal` resolves.
///
/// On the signal the shutdown flag is raised first, so broadcasts stop at
/// the next batch boundary, then open requests and spawned inbound tasks
/// are drained for at most `grace`. Returns `false` when the grace period
/// ran out before everything finished.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    signal: impl Future<Output = ()>,
    shutdown: watch::Sender<bool>,
    grace: Duration,
) -> std::io::Result<bool> {
    let inbound = state.inbound.clone();
    let mut stopping = shutdown.subscribe();
    let app = router(state);

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stopping.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result.map_err(std::io::Error::other)??;
            return Ok(true);
        }
        _ = signal => {}
    }

    tracing::info!(grace_secs = grace.as_secs(), "Shutdown requested, draining");
    let _ = shutdown.send(true);
    inbound.close();

    let drain = async {
        let served = server.await;
        inbound.wait().await;
        served
    };
    match tokio::time::timeout(grace, drain).await {
        Ok(served) => served.map_err(std::io::Error::other)?.map(|()| true),
        Err(_) => {
            tracing::warn!(pending_inbound = inbound.len(), "Drain timed out");
            Ok(false)
        }
    }
}

async fn root(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.environment.as_str(),
        })),
    )
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "healthy"}))),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "error": e.to_string()})),
            )
        }
    }
}

/// Admin error body.
pub(crate) fn error_response(status: StatusCode, error: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({"status": "error", "error": error.to_string()})))
}
