//! Admin endpoints: stats, manual triggers, broadcasts and scheduler control.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::{AppState, error_response};
use crate::channels::OutboundMessage;
use crate::error::{BroadcastError, ChannelError, JobError};

type ApiResponse = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TestMessageRequest {
    pub address: String,
    pub message: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/health", get(admin_health))
        .route("/admin/stats", get(stats))
        .route("/admin/trigger", post(trigger))
        .route("/admin/broadcast", post(broadcast))
        .route("/admin/test-message", post(test_message))
        .route("/admin/scheduler", get(list_jobs))
        .route("/admin/scheduler/{name}/pause", post(pause_job))
        .route("/admin/scheduler/{name}/resume", post(resume_job))
        .route("/admin/scheduler/{name}/run", post(run_job))
        .route("/admin/recipients/{address}", delete(delete_recipient))
}

fn job_error_status(e: &JobError) -> StatusCode {
    match e {
        JobError::UnknownJob { .. } => StatusCode::NOT_FOUND,
        JobError::AlreadyRunning { .. } => StatusCode::CONFLICT,
        JobError::Broadcast(BroadcastError::EmptyContent) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiResponse> {
    serde_json::from_slice(body).map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))
}

/// GET /admin/health
async fn admin_health(State(state): State<AppState>) -> ApiResponse {
    let database = match state.db.ping().await {
        Ok(()) => json!({"status": "healthy"}),
        Err(e) => json!({"status": "unhealthy", "error": e.to_string()}),
    };
    let jobs = state.scheduler.list().await;
    let scheduler = json!({
        "status": "healthy",
        "jobs": jobs.len(),
        "busy": state.scheduler.is_busy(),
    });

    let (code, overall) = if database["status"] == "healthy" {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        code,
        Json(json!({
            "status": overall,
            "components": {"database": database, "scheduler": scheduler},
        })),
    )
}

/// GET /admin/stats
async fn stats(State(state): State<AppState>) -> ApiResponse {
    let counts = match state.db.count_recipients().await {
        Ok(counts) => counts,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let today = state.today();
    let todays = match state.db.get_artifact(today, &state.language).await {
        Ok(artifact) => artifact,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let recent = match state.db.recent_artifacts(&state.language, 30).await {
        Ok(recent) => recent,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "recipients": counts,
            "today": {
                "date": today,
                "title": todays.map(|a| a.source_title),
            },
            "recent_artifacts": recent.len(),
        })),
    )
}

/// POST /admin/trigger
///
/// Runs the production job for the given date (default today) and waits
/// for the broadcast to finish.
async fn trigger(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        match parse_json::<TriggerRequest>(&body) {
            Ok(request) => request,
            Err(response) => return response,
        }
    };
    let date = request.date.unwrap_or_else(|| state.today());

    tracing::info!(date = %date, "Manual production trigger");
    match state.job.produce_and_send(date).await {
        Ok(summary) => (StatusCode::OK, Json(json!({"status": "success", "summary": summary}))),
        Err(e) => {
            tracing::error!(date = %date, error = %e, "Manual production failed");
            error_response(job_error_status(&e), e)
        }
    }
}

/// POST /admin/broadcast
async fn broadcast(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let request: BroadcastRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let recipients = match state.db.list_subscribed(request.language.as_deref()).await {
        Ok(recipients) => recipients,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let message = OutboundMessage::Custom { body: request.message };

    match state.broadcaster.broadcast(&recipients, &message).await {
        Ok(report) => (StatusCode::OK, Json(json!({"status": "success", "report": report}))),
        Err(e @ BroadcastError::EmptyContent) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

/// POST /admin/test-message
async fn test_message(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let request: TestMessageRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let address = crate::session::canonical_address(&request.address);
    if address.is_empty() || request.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "address and message are required");
    }

    let (language, last_inbound_at) = match state.db.get_recipient(&address).await {
        Ok(Some(recipient)) => (recipient.language, recipient.last_inbound_at),
        Ok(None) => (state.language.clone(), None),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let message = OutboundMessage::Custom { body: request.message };

    match state
        .outbound
        .deliver(&address, &language, last_inbound_at, &message)
        .await
    {
        Ok(receipt) => (
            StatusCode::OK,
            Json(json!({"status": "success", "handle": receipt.handle})),
        ),
        Err(e @ ChannelError::NoDeliveryPath { .. }) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

/// GET /admin/scheduler
async fn list_jobs(State(state): State<AppState>) -> ApiResponse {
    let jobs = state.scheduler.list().await;
    (StatusCode::OK, Json(json!({"status": "success", "jobs": jobs})))
}

async fn pause_job(State(state): State<AppState>, Path(name): Path<String>) -> ApiResponse {
    match state.scheduler.pause(&name).await {
        Ok(job) => (StatusCode::OK, Json(json!({"status": "success", "job": job}))),
        Err(e) => error_response(job_error_status(&e), e),
    }
}

async fn resume_job(State(state): State<AppState>, Path(name): Path<String>) -> ApiResponse {
    match state.scheduler.resume(&name).await {
        Ok(job) => (StatusCode::OK, Json(json!({"status": "success", "job": job}))),
        Err(e) => error_response(job_error_status(&e), e),
    }
}

async fn run_job(State(state): State<AppState>, Path(name): Path<String>) -> ApiResponse {
    match state.scheduler.run_now(&name).await {
        Ok(detail) => (StatusCode::OK, Json(json!({"status": "success", "detail": detail}))),
        Err(e) => error_response(job_error_status(&e), e),
    }
}

/// DELETE /admin/recipients/{address}
async fn delete_recipient(State(state): State<AppState>, Path(address): Path<String>) -> ApiResponse {
    let address = crate::session::canonical_address(&address);
    match state.db.delete_recipient(&address).await {
        Ok(true) => {
            tracing::info!(address = %address, "Recipient deleted by admin");
            (StatusCode::OK, Json(json!({"status": "success", "deleted": address})))
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("recipient {address} not found")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use chrono::Utc;
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::store::NewRecipient;
    use crate::testing::{RecordingChannel, app_state};

    async fn call(state: AppState, method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn trigger_runs_job_for_date() {
        let (state, channel) = app_state(RecordingChannel::new()).await.unwrap();
        state
            .db
            .create_recipient(&NewRecipient::from_inbound("+15551230000", "en", Utc::now()))
            .await
            .unwrap();

        let (status, body) = call(state.clone(), "POST", "/admin/trigger", r#"{"date":"2024-05-01"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["date"], "2024-05-01");
        assert_eq!(body["summary"]["succeeded"], 1);
        assert_eq!(channel.sent().len(), 1);

        let (_, body) = call(state, "POST", "/admin/trigger", r#"{"date":"2024-05-01"}"#).await;
        assert_eq!(body["summary"]["reused_artifact"], true);
    }

    #[tokio::test]
    async fn trigger_accepts_empty_body() {
        let (state, _) = app_state(RecordingChannel::new()).await.unwrap();
        let (status, body) = call(state, "POST", "/admin/trigger", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["attempted"], 0);
    }

    #[tokio::test]
    async fn broadcast_rejects_empty_message() {
        let (state, _) = app_state(RecordingChannel::new()).await.unwrap();
        let (status, body) = call(state, "POST", "/admin/broadcast", r#"{"message":"  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn broadcast_reports_counts() {
        let (state, channel) = app_state(RecordingChannel::new()).await.unwrap();
        for address in ["+1000", "+2000"] {
            state
                .db
                .create_recipient(&NewRecipient::from_inbound(address, "en", Utc::now()))
                .await
                .unwrap();
        }
        let (status, body) = call(state, "POST", "/admin/broadcast", r#"{"message":"Maintenance tonight."}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["sent"], 2);
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn broadcast_without_language_reaches_everyone() {
        let (state, channel) = app_state(RecordingChannel::new()).await.unwrap();
        for (address, language) in [("+1000", "en"), ("+2000", "he")] {
            state
                .db
                .create_recipient(&NewRecipient::from_inbound(address, language, Utc::now()))
                .await
                .unwrap();
        }

        let (status, body) = call(state.clone(), "POST", "/admin/broadcast", r#"{"message":"hello all"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["attempted"], 2);
        assert_eq!(channel.sent_to("+2000").len(), 1);

        let (_, body) = call(state, "POST", "/admin/broadcast", r#"{"message":"shalom","language":"he"}"#).await;
        assert_eq!(body["report"]["attempted"], 1);
        assert_eq!(channel.sent_to("+2000").len(), 2);
        assert_eq!(channel.sent_to("+1000").len(), 1);
    }

    #[tokio::test]
    async fn test_message_without_window_or_template_fails() {
        let (state, _) = app_state(RecordingChannel::new()).await.unwrap();
        let (status, _) = call(
            state,
            "POST",
            "/admin/test-message",
            r#"{"address":"+15551230000","message":"ping"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn scheduler_control() {
        let (state, _) = app_state(RecordingChannel::new()).await.unwrap();

        let (status, body) = call(state.clone(), "GET", "/admin/scheduler", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 2);

        let (status, body) = call(state.clone(), "POST", "/admin/scheduler/daily_facts/pause", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job"]["paused"], true);

        let (status, _) = call(state.clone(), "POST", "/admin/scheduler/retention_cleanup/run", "").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(state, "POST", "/admin/scheduler/nope/resume", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_recipient_by_address() {
        let (state, _) = app_state(RecordingChannel::new()).await.unwrap();
        state
            .db
            .create_recipient(&NewRecipient::from_inbound("+15551230000", "en", Utc::now()))
            .await
            .unwrap();

        let (status, _) = call(state.clone(), "DELETE", "/admin/recipients/+15551230000", "").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(state, "DELETE", "/admin/recipients/+15551230000", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_counts_recipients() {
        let (state, _) = app_state(RecordingChannel::new()).await.unwrap();
        state
            .db
            .create_recipient(&NewRecipient::from_inbound("+15551230000", "en", Utc::now()))
            .await
            .unwrap();
        let (status, body) = call(state, "GET", "/admin/stats", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recipients"]["total"], 1);
        assert_eq!(body["recipients"]["subscribed"], 1);
        assert!(body["today"]["title"].is_null());
    }
}
