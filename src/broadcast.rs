//! Fan-out broadcaster: sends one message to many recipients in
//! concurrent batches with a pause between batches.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;

use crate::channels::{Outbound, OutboundMessage};
use crate::config::BroadcastConfig;
use crate::error::BroadcastError;
use crate::store::Recipient;

/// Outcome counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct Broadcaster {
    outbound: Arc<Outbound>,
    config: BroadcastConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Broadcaster {
    pub fn new(outbound: Arc<Outbound>, config: BroadcastConfig) -> Self {
        Self {
            outbound,
            config,
            shutdown: None,
        }
    }

    /// Stop between batches once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Send `message` to every recipient. Individual failures are counted
    /// and logged; they never abort the run.
    pub async fn broadcast(
        &self,
        recipients: &[Recipient],
        message: &OutboundMessage,
    ) -> Result<BroadcastReport, BroadcastError> {
        if message.is_empty() {
            return Err(BroadcastError::EmptyContent);
        }

        let mut report = BroadcastReport::default();
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<&[Recipient]> = recipients.chunks(batch_size).collect();
        let total_batches = batches.len();

        tracing::info!(
            recipients = recipients.len(),
            batches = total_batches,
            kind = %message.kind(),
            "Starting broadcast"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            if self.shutdown_requested() {
                tracing::warn!(batch = index, "Broadcast stopped by shutdown");
                break;
            }

            let results = join_all(batch.iter().map(|r| self.outbound.deliver_to(r, message))).await;
            for (recipient, result) in batch.iter().zip(results) {
                report.attempted += 1;
                match result {
                    Ok(_) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(address = %recipient.address, error = %e, "Broadcast delivery failed");
                    }
                }
            }

            tracing::debug!(batch = index + 1, of = total_batches, sent = report.sent, "Batch complete");

            if index + 1 < total_batches && self.pause().await {
                tracing::warn!(batch = index + 1, "Broadcast stopped by shutdown");
                break;
            }
        }

        tracing::info!(
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            "Broadcast finished"
        );
        Ok(report)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for the batch delay. Returns `true` if shutdown was requested.
    async fn pause(&self) -> bool {
        let delay = self.config.batch_delay;
        let Some(rx) = &self.shutdown else {
            tokio::time::sleep(delay).await;
            return false;
        };
        let mut rx = rx.clone();
        if *rx.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = rx.changed() => match changed {
                Ok(()) => *rx.borrow(),
                // Sender gone: nobody can ask us to stop any more.
                Err(_) => {
                    tokio::time::sleep(delay).await;
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::{Database, LibSqlBackend, NewRecipient};
    use crate::testing::RecordingChannel;

    async fn setup(channel: RecordingChannel, count: usize) -> (Arc<Outbound>, Arc<RecordingChannel>, Vec<Recipient>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut recipients = Vec::new();
        for i in 0..count {
            let new = NewRecipient::from_inbound(&format!("+1555000{i:04}"), "en", Utc::now());
            recipients.push(db.create_recipient(&new).await.unwrap());
        }
        let channel = Arc::new(channel);
        let outbound = Arc::new(Outbound::new(channel.clone(), db, RetryPolicy::none()));
        (outbound, channel, recipients)
    }

    fn fast(batch_size: usize) -> BroadcastConfig {
        BroadcastConfig {
            batch_size,
            batch_delay: Duration::from_millis(1),
        }
    }

    fn fact() -> OutboundMessage {
        OutboundMessage::DailyFact {
            title: "Example".into(),
            url: "https://en.wikipedia.org/wiki/Example".into(),
            summary: crate::testing::EXAMPLE_SUMMARY.into(),
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_others() {
        let (outbound, channel, recipients) =
            setup(RecordingChannel::new().failing_for("+15550000003"), 12).await;
        let broadcaster = Broadcaster::new(outbound, fast(5));

        let report = broadcaster.broadcast(&recipients, &fact()).await.unwrap();
        assert_eq!(report.attempted, 12);
        assert_eq!(report.sent, 11);
        assert_eq!(report.failed, 1);
        assert_eq!(channel.sent().len(), 11);
        assert!(channel.sent_to("+15550000003").is_empty());
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let (outbound, channel, recipients) = setup(RecordingChannel::new(), 2).await;
        let broadcaster = Broadcaster::new(outbound, fast(10));
        let err = broadcaster
            .broadcast(&recipients, &OutboundMessage::Custom { body: "  ".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::EmptyContent));
        assert_eq!(channel.attempts(), 0);
    }

    #[tokio::test]
    async fn no_recipients_is_an_empty_report() {
        let (outbound, _, _) = setup(RecordingChannel::new(), 0).await;
        let report = Broadcaster::new(outbound, fast(10))
            .broadcast(&[], &fact())
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn shutdown_stops_after_in_flight_batch() {
        let (outbound, channel, recipients) = setup(RecordingChannel::new(), 25).await;
        let (tx, rx) = watch::channel(false);
        let broadcaster = Arc::new(
            Broadcaster::new(
                outbound,
                BroadcastConfig {
                    batch_size: 10,
                    batch_delay: Duration::from_secs(60),
                },
            )
            .with_shutdown(rx),
        );

        let task = {
            let broadcaster = Arc::clone(&broadcaster);
            tokio::spawn(async move { broadcaster.broadcast(&recipients, &fact()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("broadcast should stop promptly")
            .unwrap()
            .unwrap();
        assert_eq!(report.attempted, 10);
        assert_eq!(channel.sent().len(), 10);
    }

    #[tokio::test]
    async fn shutdown_before_start_sends_nothing() {
        let (outbound, channel, recipients) = setup(RecordingChannel::new(), 3).await;
        let (_tx, rx) = watch::channel(true);
        let report = Broadcaster::new(outbound, fast(10))
            .with_shutdown(rx)
            .broadcast(&recipients, &fact())
            .await
            .unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(channel.attempts(), 0);
    }
}
