//! Daily production job: pick an article, summarize it, persist the day's
//! artifact once, then broadcast it to the language's subscribers.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::broadcast::Broadcaster;
use crate::channels::OutboundMessage;
use crate::content::ContentSource;
use crate::error::JobError;
use crate::store::{DailyArtifact, Database, NewArtifact};
use crate::summarizer::{Summarizer, SummaryRules};

/// Result of one production cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub date: NaiveDate,
    pub language: String,
    pub title: String,
    pub reused_artifact: bool,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct DailyJob {
    db: Arc<dyn Database>,
    content: Arc<dyn ContentSource>,
    summarizer: Arc<dyn Summarizer>,
    broadcaster: Arc<Broadcaster>,
    language: String,
    rules: SummaryRules,
}

impl DailyJob {
    pub fn new(
        db: Arc<dyn Database>,
        content: Arc<dyn ContentSource>,
        summarizer: Arc<dyn Summarizer>,
        broadcaster: Arc<Broadcaster>,
        language: &str,
    ) -> Self {
        Self {
            db,
            content,
            summarizer,
            broadcaster,
            language: language.to_string(),
            rules: SummaryRules::for_language(language),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Produce (or reuse) today's artifact and send it to every subscriber.
    pub async fn produce_and_send(&self, today: NaiveDate) -> Result<JobSummary, JobError> {
        let (artifact, reused) = self.produce(today).await?;

        let recipients = self.db.list_subscribed(Some(&self.language)).await?;
        let message = OutboundMessage::DailyFact {
            title: artifact.source_title.clone(),
            url: artifact.source_url.clone(),
            summary: artifact.summary_text.clone(),
        };
        let report = self.broadcaster.broadcast(&recipients, &message).await?;

        let summary = JobSummary {
            date: today,
            language: self.language.clone(),
            title: artifact.source_title,
            reused_artifact: reused,
            attempted: report.attempted,
            succeeded: report.sent,
            failed: report.failed,
        };
        tracing::info!(
            date = %summary.date,
            language = %summary.language,
            title = %summary.title,
            reused = summary.reused_artifact,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            "Daily fact cycle complete"
        );
        Ok(summary)
    }

    /// Return the artifact for `today`, creating it if needed. The flag is
    /// `true` when an existing artifact was reused.
    pub async fn produce(&self, today: NaiveDate) -> Result<(DailyArtifact, bool), JobError> {
        if let Some(existing) = self.db.get_artifact(today, &self.language).await? {
            tracing::info!(date = %today, title = %existing.source_title, "Reusing existing artifact");
            return Ok((existing, true));
        }

        let article = self.content.fetch_article().await.inspect_err(|e| {
            tracing::error!(source = self.content.name(), error = %e, "No article for today");
        })?;

        let summary = self.summarizer.summarize(&article, &self.language).await.inspect_err(|e| {
            tracing::error!(title = %article.title, model = self.summarizer.model_name(), error = %e, "Summarization failed");
        })?;
        let summary = summary.trim().to_string();

        if let Err(e) = self.rules.validate(&summary) {
            tracing::warn!(
                title = %article.title,
                reason = %e.reason,
                length = e.length,
                sentences = e.sentences,
                script_ratio = e.script_ratio,
                "Summary failed validation"
            );
            return Err(e.into());
        }

        let new = NewArtifact {
            date: today,
            language: self.language.clone(),
            source_title: article.title.clone(),
            source_url: article.url.clone(),
            summary_text: summary,
        };
        match self.db.insert_artifact(&new).await {
            Ok(artifact) => {
                tracing::info!(date = %today, title = %artifact.source_title, "Stored daily artifact");
                Ok((artifact, false))
            }
            Err(e) if e.is_constraint() => {
                // Another run got there first.
                let existing = self.db.get_artifact(today, &self.language).await?.ok_or(e)?;
                Ok((existing, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete artifacts older than the start of the previous month.
    pub async fn cleanup(&self, today: NaiveDate) -> Result<usize, JobError> {
        let cutoff = retention_cutoff(today);
        let deleted = self.db.delete_artifacts_before(cutoff).await?;
        tracing::info!(cutoff = %cutoff, deleted, "Artifact retention cleanup");
        Ok(deleted)
    }
}

/// First day of the calendar month before `today`.
pub fn retention_cutoff(today: NaiveDate) -> NaiveDate {
    let (year, month) = if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::channels::Outbound;
    use crate::config::BroadcastConfig;
    use crate::error::ContentError;
    use crate::retry::RetryPolicy;
    use crate::store::{LibSqlBackend, NewRecipient};
    use crate::testing::{EXAMPLE_SUMMARY, RecordingChannel, StubContentSource, StubSummarizer, example_article};

    struct Harness {
        job: DailyJob,
        db: Arc<dyn Database>,
        channel: Arc<RecordingChannel>,
        content: Arc<StubContentSource>,
        summarizer: Arc<StubSummarizer>,
    }

    async fn harness(content: StubContentSource, reply: &str) -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let channel = Arc::new(RecordingChannel::new());
        let outbound = Arc::new(Outbound::new(channel.clone(), Arc::clone(&db), RetryPolicy::none()));
        let broadcaster = Arc::new(Broadcaster::new(
            outbound,
            BroadcastConfig {
                batch_size: 10,
                batch_delay: Duration::from_millis(1),
            },
        ));
        let content = Arc::new(content);
        let summarizer = Arc::new(StubSummarizer::new(reply));
        let job = DailyJob::new(
            Arc::clone(&db),
            content.clone(),
            summarizer.clone(),
            broadcaster,
            "en",
        );
        Harness {
            job,
            db,
            channel,
            content,
            summarizer,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn cutoff_is_first_of_previous_month() {
        assert_eq!(retention_cutoff(date(2024, 3, 15)), date(2024, 2, 1));
        assert_eq!(retention_cutoff(date(2024, 1, 1)), date(2023, 12, 1));
        assert_eq!(retention_cutoff(date(2024, 12, 31)), date(2024, 11, 1));
    }

    #[tokio::test]
    async fn production_is_idempotent_per_day() {
        let h = harness(StubContentSource::new(example_article()), EXAMPLE_SUMMARY).await;
        let today = date(2024, 5, 1);

        let (first, reused) = h.job.produce(today).await.unwrap();
        assert!(!reused);
        let (second, reused) = h.job.produce(today).await.unwrap();
        assert!(reused);
        assert_eq!(first.id, second.id);
        assert_eq!(h.content.calls(), 1);
        assert_eq!(h.summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn sends_to_subscribers_of_the_language() {
        let h = harness(StubContentSource::new(example_article()), EXAMPLE_SUMMARY).await;
        let now = Utc::now();
        h.db.create_recipient(&NewRecipient::from_inbound("+1000", "en", now)).await.unwrap();
        h.db.create_recipient(&NewRecipient::from_inbound("+2000", "he", now)).await.unwrap();
        let mut off = NewRecipient::from_inbound("+3000", "en", now);
        off.subscribed = false;
        h.db.create_recipient(&off).await.unwrap();

        let summary = h.job.produce_and_send(date(2024, 5, 1)).await.unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.title, "Example");
        assert!(!summary.reused_artifact);

        let sent = h.channel.sent_to("+1000");
        assert!(sent[0].body().unwrap().contains(EXAMPLE_SUMMARY));
    }

    #[tokio::test]
    async fn invalid_summary_fails_without_storing() {
        let h = harness(StubContentSource::new(example_article()), "Too short.").await;
        let err = h.job.produce(date(2024, 5, 1)).await.unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert!(h.db.get_artifact(date(2024, 5, 1), "en").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_exhaustion_is_a_hard_failure() {
        let h = harness(StubContentSource::exhausted(), EXAMPLE_SUMMARY).await;
        let err = h.job.produce_and_send(date(2024, 5, 1)).await.unwrap_err();
        assert!(matches!(err, JobError::Content(ContentError::Exhausted { .. })));
        assert_eq!(h.summarizer.calls(), 0);
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_old_artifacts() {
        let h = harness(StubContentSource::new(example_article()), EXAMPLE_SUMMARY).await;
        h.job.produce(date(2024, 1, 20)).await.unwrap();
        h.job.produce(date(2024, 2, 3)).await.unwrap();
        h.job.produce(date(2024, 3, 10)).await.unwrap();

        let deleted = h.job.cleanup(date(2024, 3, 15)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(h.db.get_artifact(date(2024, 2, 3), "en").await.unwrap().is_some());
    }
}
