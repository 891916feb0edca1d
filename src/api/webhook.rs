//! Twilio WhatsApp webhooks: inbound messages and delivery status callbacks.

use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::session::{InboundEvent, canonical_address};
use crate::store::DeliveryStatus;

/// Inbound message form fields (subset).
#[derive(Debug, Deserialize)]
pub struct InboundForm {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
}

/// Delivery status callback form fields (subset).
#[derive(Debug, Deserialize)]
pub struct StatusForm {
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "MessageStatus")]
    pub message_status: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhook/whatsapp", get(verify).post(inbound))
        .route("/webhook/whatsapp/status", post(status_callback))
}

/// GET /webhook/whatsapp
async fn verify() -> Json<serde_json::Value> {
    Json(json!({"status": "webhook_verified", "service": "twilio"}))
}

/// POST /webhook/whatsapp
///
/// Acknowledges immediately; the message is handled on a background task.
async fn inbound(State(state): State<AppState>, form: Result<Form<InboundForm>, FormRejection>) -> StatusCode {
    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => {
            tracing::error!(error = %e, "Undecodable inbound webhook");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    let Some(from) = form.from.filter(|f| !f.trim().is_empty()) else {
        tracing::warn!(message_sid = ?form.message_sid, "Inbound webhook without sender");
        return StatusCode::BAD_REQUEST;
    };

    let event = InboundEvent {
        address: from,
        body: form.body.unwrap_or_default(),
        provider_message_id: form.message_sid,
        received_at: Utc::now(),
    };
    tracing::info!(
        from = %canonical_address(&event.address),
        to = ?form.to,
        message_sid = ?event.provider_message_id,
        "Inbound message"
    );

    let sessions = state.sessions.clone();
    state.inbound.spawn(async move {
        sessions.handle(event).await;
    });
    StatusCode::OK
}

/// POST /webhook/whatsapp/status
async fn status_callback(
    State(state): State<AppState>,
    form: Result<Form<StatusForm>, FormRejection>,
) -> StatusCode {
    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => {
            tracing::error!(error = %e, "Undecodable status callback");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    tracing::info!(
        message_sid = ?form.message_sid,
        status = ?form.message_status,
        to = ?form.to,
        from = ?form.from,
        error_code = ?form.error_code,
        "Delivery status update"
    );

    let (Some(sid), Some(raw)) = (form.message_sid.as_deref(), form.message_status.as_deref()) else {
        return StatusCode::OK;
    };
    let Some(status) = DeliveryStatus::from_provider(raw) else {
        tracing::debug!(status = raw, "Ignoring unmapped delivery status");
        return StatusCode::OK;
    };

    match state.db.update_outbound_status_by_handle(sid, status).await {
        Ok(true) => {}
        Ok(false) => tracing::debug!(message_sid = sid, "Status for unknown message"),
        Err(e) => tracing::warn!(message_sid = sid, error = %e, "Failed to record delivery status"),
    }
    StatusCode::OK
}
