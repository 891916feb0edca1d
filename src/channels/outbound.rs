//! Outbound dispatcher: picks session or template delivery, retries
//! transient provider failures, and writes the outbound audit log.
//!
//! Both the single-reply path and the broadcaster go through here, so the
//! session-window policy lives in exactly one place.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::channels::{DeliveryChannel, DeliveryReceipt, MessageKind, OutboundMessage};
use crate::error::ChannelError;
use crate::retry::RetryPolicy;
use crate::store::{Database, DeliveryStatus, NewOutboundRecord, Recipient};

/// Length of the provider's free-form session window.
pub fn session_window() -> Duration {
    Duration::hours(24)
}

/// Whether a free-form message may still be sent to someone whose last
/// inbound message arrived at `last_inbound_at`. Never open for `None`.
pub fn session_window_open(last_inbound_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_inbound_at {
        Some(last) => now.signed_duration_since(last) < session_window(),
        None => false,
    }
}

/// How a message will be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    Session,
    Template { template_id: String },
}

pub struct Outbound {
    channel: Arc<dyn DeliveryChannel>,
    db: Arc<dyn Database>,
    retry: RetryPolicy,
}

impl Outbound {
    pub fn new(channel: Arc<dyn DeliveryChannel>, db: Arc<dyn Database>, retry: RetryPolicy) -> Self {
        Self { channel, db, retry }
    }

    pub fn channel(&self) -> &Arc<dyn DeliveryChannel> {
        &self.channel
    }

    /// Session if the window is open and the channel allows free-form
    /// sends, otherwise the kind's template, otherwise an error.
    pub fn select_mode(
        &self,
        address: &str,
        kind: MessageKind,
        last_inbound_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<DeliveryMode, ChannelError> {
        if session_window_open(last_inbound_at, now) && !self.channel.is_sandbox() {
            return Ok(DeliveryMode::Session);
        }
        match self.channel.template_for(kind) {
            Some(template_id) => Ok(DeliveryMode::Template { template_id }),
            None => Err(ChannelError::NoDeliveryPath {
                address: address.to_string(),
                kind: kind.to_string(),
            }),
        }
    }

    /// Deliver `message` to a stored recipient.
    pub async fn deliver_to(
        &self,
        recipient: &Recipient,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        self.deliver(
            &recipient.address,
            &recipient.language,
            recipient.last_inbound_at,
            message,
        )
        .await
    }

    /// Deliver `message` to `address`. Every attempt is written to the
    /// outbound log; a log write failure never blocks the send.
    pub async fn deliver(
        &self,
        address: &str,
        language: &str,
        last_inbound_at: Option<DateTime<Utc>>,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let kind = message.kind();
        let body = message.body(language);

        let mode = match self.select_mode(address, kind, last_inbound_at, Utc::now()) {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!(address = %address, kind = %kind, error = %e, "No delivery path");
                self.record(address, &body, kind, DeliveryStatus::Failed, None, Some(&e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let record_id = self
            .record(address, &body, kind, DeliveryStatus::Pending, None, None)
            .await;

        let variables = message.template_variables(language);
        let result = self
            .retry
            .run("channel_send", ChannelError::is_transient, || match &mode {
                DeliveryMode::Session => self.channel.send_session(address, &body),
                DeliveryMode::Template { template_id } => {
                    self.channel.send_template(address, template_id, &variables)
                }
            })
            .await;

        match &result {
            Ok(receipt) => {
                tracing::info!(
                    address = %address,
                    kind = %kind,
                    mode = ?mode,
                    handle = %receipt.handle,
                    "Message sent"
                );
                if let Some(id) = &record_id {
                    self.update_record(id, receipt.status, Some(&receipt.handle), None).await;
                }
            }
            Err(e) => {
                tracing::warn!(address = %address, kind = %kind, mode = ?mode, error = %e, "Message send failed");
                if let Some(id) = &record_id {
                    self.update_record(id, DeliveryStatus::Failed, None, Some(&e.to_string()))
                        .await;
                }
            }
        }

        result
    }

    async fn record(
        &self,
        address: &str,
        body: &str,
        kind: MessageKind,
        status: DeliveryStatus,
        handle: Option<&str>,
        error: Option<&str>,
    ) -> Option<String> {
        let record = NewOutboundRecord {
            recipient_address: address.to_string(),
            content: body.to_string(),
            kind,
            status,
            external_handle: handle.map(str::to_string),
            error: error.map(str::to_string),
        };
        match self.db.log_outbound(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "Failed to write outbound log");
                None
            }
        }
    }

    async fn update_record(&self, id: &str, status: DeliveryStatus, handle: Option<&str>, error: Option<&str>) {
        if let Err(e) = self.db.update_outbound_status(id, status, handle, error).await {
            tracing::warn!(record_id = %id, error = %e, "Failed to update outbound log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::testing::{RecordingChannel, SentMessage};

    async fn setup(channel: RecordingChannel) -> (Outbound, Arc<RecordingChannel>, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let channel = Arc::new(channel);
        let outbound = Outbound::new(
            channel.clone(),
            Arc::clone(&db),
            RetryPolicy::new(3, std::time::Duration::from_millis(1), std::time::Duration::from_millis(2)),
        );
        (outbound, channel, db)
    }

    #[test]
    fn window_boundaries() {
        let now = Utc::now();
        assert!(session_window_open(Some(now - Duration::minutes(23 * 60 + 59)), now));
        assert!(!session_window_open(Some(now - Duration::minutes(24 * 60 + 1)), now));
        assert!(!session_window_open(Some(now - Duration::hours(24)), now));
        assert!(!session_window_open(None, now));
    }

    #[tokio::test]
    async fn open_window_uses_session() {
        let (outbound, _, _) = setup(RecordingChannel::new().with_template(MessageKind::DailyFact, "HXfact")).await;
        let now = Utc::now();
        let mode = outbound
            .select_mode("+1", MessageKind::DailyFact, Some(now - Duration::minutes(23 * 60 + 59)), now)
            .unwrap();
        assert_eq!(mode, DeliveryMode::Session);
    }

    #[tokio::test]
    async fn closed_window_falls_back_to_template_or_fails() {
        let (with_template, _, _) =
            setup(RecordingChannel::new().with_template(MessageKind::DailyFact, "HXfact")).await;
        let now = Utc::now();
        let stale = Some(now - Duration::minutes(24 * 60 + 1));

        let mode = with_template
            .select_mode("+1", MessageKind::DailyFact, stale, now)
            .unwrap();
        assert_eq!(
            mode,
            DeliveryMode::Template {
                template_id: "HXfact".into()
            }
        );

        let (without_template, _, _) = setup(RecordingChannel::new()).await;
        let err = without_template
            .select_mode("+1", MessageKind::DailyFact, stale, now)
            .unwrap_err();
        assert!(matches!(err, ChannelError::NoDeliveryPath { .. }));

        let err = without_template
            .select_mode("+1", MessageKind::DailyFact, None, now)
            .unwrap_err();
        assert!(matches!(err, ChannelError::NoDeliveryPath { .. }));
    }

    #[tokio::test]
    async fn sandbox_forces_template() {
        let (outbound, _, _) = setup(
            RecordingChannel::new()
                .sandbox()
                .with_template(MessageKind::Menu, "HXmenu"),
        )
        .await;
        let now = Utc::now();
        let mode = outbound
            .select_mode("+1", MessageKind::Menu, Some(now), now)
            .unwrap();
        assert_eq!(
            mode,
            DeliveryMode::Template {
                template_id: "HXmenu".into()
            }
        );
    }

    #[tokio::test]
    async fn deliver_logs_and_sends() {
        let (outbound, channel, db) = setup(RecordingChannel::new()).await;
        let receipt = outbound
            .deliver("+15551230000", "en", Some(Utc::now()), &OutboundMessage::Menu)
            .await
            .unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], SentMessage::Session { to, .. } if to == "+15551230000"));

        let log = db.recent_outbound(Some("+15551230000"), 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, MessageKind::Menu);
        assert_eq!(log[0].status, DeliveryStatus::Sent);
        assert_eq!(log[0].external_handle.as_deref(), Some(receipt.handle.as_str()));
    }

    #[tokio::test]
    async fn template_send_carries_typed_variables() {
        let (outbound, channel, _) =
            setup(RecordingChannel::new().with_template(MessageKind::DailyFact, "HXfact")).await;
        let message = OutboundMessage::DailyFact {
            title: "Example".into(),
            url: "https://en.wikipedia.org/wiki/Example".into(),
            summary: "Example is a thing. It is used widely.".into(),
        };
        outbound.deliver("+1", "en", None, &message).await.unwrap();

        let sent = channel.sent();
        match &sent[0] {
            SentMessage::Template { template_id, variables, .. } => {
                assert_eq!(template_id, "HXfact");
                assert_eq!(variables.values(), ["Example is a thing. It is used widely."]);
            }
            other => panic!("expected template send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (outbound, channel, _) = setup(RecordingChannel::new().with_transient_failures(2)).await;
        outbound
            .deliver("+1", "en", Some(Utc::now()), &OutboundMessage::Help)
            .await
            .unwrap();
        assert_eq!(channel.attempts(), 3);
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn missing_path_is_logged_as_failed() {
        let (outbound, channel, db) = setup(RecordingChannel::new()).await;
        let err = outbound
            .deliver("+1", "en", None, &OutboundMessage::Help)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NoDeliveryPath { .. }));
        assert!(channel.sent().is_empty());

        let log = db.recent_outbound(Some("+1"), 10).await.unwrap();
        assert_eq!(log[0].status, DeliveryStatus::Failed);
        assert!(log[0].error.is_some());
    }
}
