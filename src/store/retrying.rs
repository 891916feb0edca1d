//! Retrying decorator over any `Database`.
//!
//! Transient failures (busy, locked, dropped connection) are retried under
//! a `RetryPolicy`. Constraint and query errors surface on the first attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::DatabaseError;
use crate::retry::RetryPolicy;
use crate::store::traits::{
    DailyArtifact, Database, DeliveryStatus, NewArtifact, NewOutboundRecord, NewRecipient, OutboundRecord,
    Recipient, RecipientCounts, RecipientUpdate,
};

pub struct RetryingDatabase {
    inner: Arc<dyn Database>,
    policy: RetryPolicy,
}

impl RetryingDatabase {
    pub fn new(inner: Arc<dyn Database>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Database for RetryingDatabase {
    async fn ping(&self) -> Result<(), DatabaseError> {
        self.policy
            .run("ping", DatabaseError::is_transient, || self.inner.ping())
            .await
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.policy
            .run("run_migrations", DatabaseError::is_transient, || {
                self.inner.run_migrations()
            })
            .await
    }

    async fn get_recipient(&self, address: &str) -> Result<Option<Recipient>, DatabaseError> {
        self.policy
            .run("get_recipient", DatabaseError::is_transient, || {
                self.inner.get_recipient(address)
            })
            .await
    }

    async fn create_recipient(&self, recipient: &NewRecipient) -> Result<Recipient, DatabaseError> {
        self.policy
            .run("create_recipient", DatabaseError::is_transient, || {
                self.inner.create_recipient(recipient)
            })
            .await
    }

    async fn update_recipient(
        &self,
        address: &str,
        update: &RecipientUpdate,
    ) -> Result<Option<Recipient>, DatabaseError> {
        self.policy
            .run("update_recipient", DatabaseError::is_transient, || {
                self.inner.update_recipient(address, update)
            })
            .await
    }

    async fn toggle_subscription(&self, address: &str) -> Result<Option<Recipient>, DatabaseError> {
        self.policy
            .run("toggle_subscription", DatabaseError::is_transient, || {
                self.inner.toggle_subscription(address)
            })
            .await
    }

    async fn touch_last_inbound(&self, address: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        self.policy
            .run("touch_last_inbound", DatabaseError::is_transient, || {
                self.inner.touch_last_inbound(address, at)
            })
            .await
    }

    async fn list_subscribed(&self, language: Option<&str>) -> Result<Vec<Recipient>, DatabaseError> {
        self.policy
            .run("list_subscribed", DatabaseError::is_transient, || {
                self.inner.list_subscribed(language)
            })
            .await
    }

    async fn count_recipients(&self) -> Result<RecipientCounts, DatabaseError> {
        self.policy
            .run("count_recipients", DatabaseError::is_transient, || {
                self.inner.count_recipients()
            })
            .await
    }

    async fn delete_recipient(&self, address: &str) -> Result<bool, DatabaseError> {
        self.policy
            .run("delete_recipient", DatabaseError::is_transient, || {
                self.inner.delete_recipient(address)
            })
            .await
    }

    async fn get_artifact(
        &self,
        date: NaiveDate,
        language: &str,
    ) -> Result<Option<DailyArtifact>, DatabaseError> {
        self.policy
            .run("get_artifact", DatabaseError::is_transient, || {
                self.inner.get_artifact(date, language)
            })
            .await
    }

    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<DailyArtifact, DatabaseError> {
        self.policy
            .run("insert_artifact", DatabaseError::is_transient, || {
                self.inner.insert_artifact(artifact)
            })
            .await
    }

    async fn recent_artifacts(&self, language: &str, limit: usize) -> Result<Vec<DailyArtifact>, DatabaseError> {
        self.policy
            .run("recent_artifacts", DatabaseError::is_transient, || {
                self.inner.recent_artifacts(language, limit)
            })
            .await
    }

    async fn delete_artifacts_before(&self, date: NaiveDate) -> Result<usize, DatabaseError> {
        self.policy
            .run("delete_artifacts_before", DatabaseError::is_transient, || {
                self.inner.delete_artifacts_before(date)
            })
            .await
    }

    async fn log_outbound(&self, record: &NewOutboundRecord) -> Result<String, DatabaseError> {
        self.policy
            .run("log_outbound", DatabaseError::is_transient, || {
                self.inner.log_outbound(record)
            })
            .await
    }

    async fn update_outbound_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        external_handle: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.policy
            .run("update_outbound_status", DatabaseError::is_transient, || {
                self.inner.update_outbound_status(id, status, external_handle, error)
            })
            .await
    }

    async fn update_outbound_status_by_handle(
        &self,
        external_handle: &str,
        status: DeliveryStatus,
    ) -> Result<bool, DatabaseError> {
        self.policy
            .run("update_outbound_status_by_handle", DatabaseError::is_transient, || {
                self.inner.update_outbound_status_by_handle(external_handle, status)
            })
            .await
    }

    async fn recent_outbound(
        &self,
        recipient_address: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OutboundRecord>, DatabaseError> {
        self.policy
            .run("recent_outbound", DatabaseError::is_transient, || {
                self.inner.recent_outbound(recipient_address, limit)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::LibSqlBackend;
    use crate::testing::FlakyDatabase;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    async fn flaky(failures: u32, error: fn() -> DatabaseError) -> Arc<FlakyDatabase> {
        let inner: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        Arc::new(FlakyDatabase::new(inner, failures, error))
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let flaky = flaky(2, || DatabaseError::Busy("database is locked".into())).await;
        let db = RetryingDatabase::new(flaky.clone(), fast_policy());

        let counts = db.count_recipients().await.unwrap();
        assert_eq!(counts.total, 0);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_last_error() {
        let flaky = flaky(10, || DatabaseError::Connection("reset".into())).await;
        let db = RetryingDatabase::new(flaky.clone(), fast_policy());

        let err = db.get_recipient("+15551230000").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn constraint_errors_are_not_retried() {
        let flaky = flaky(10, || DatabaseError::Constraint("UNIQUE constraint failed".into())).await;
        let db = RetryingDatabase::new(flaky.clone(), fast_policy());

        let err = db
            .create_recipient(&NewRecipient::from_inbound("+1", "he", Utc::now()))
            .await
            .unwrap_err();
        assert!(err.is_constraint());
        assert_eq!(flaky.calls(), 1);
    }
}
