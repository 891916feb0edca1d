//! In-memory stand-ins for the external collaborators, shared by unit and
//! integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::task::TaskTracker;

use crate::api::AppState;
use crate::broadcast::Broadcaster;
use crate::channels::{DeliveryChannel, DeliveryReceipt, MessageKind, Outbound, TemplateVariables};
use crate::config::{BroadcastConfig, Environment};
use crate::content::{Article, ContentSource};
use crate::error::{ChannelError, ContentError, DatabaseError, Error, LlmError};
use crate::job::DailyJob;
use crate::retry::RetryPolicy;
use crate::scheduler::{DAILY_FACTS, DailyFactsTask, RETENTION_CLEANUP, RETENTION_CRON, RetentionTask, Scheduler};
use crate::session::SessionEngine;
use crate::store::{
    DailyArtifact, Database, DeliveryStatus, LibSqlBackend, NewArtifact, NewOutboundRecord, NewRecipient,
    OutboundRecord, Recipient, RecipientCounts, RecipientUpdate,
};
use crate::summarizer::Summarizer;

// ── Delivery channel ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    Session {
        to: String,
        body: String,
    },
    Template {
        to: String,
        template_id: String,
        variables: TemplateVariables,
    },
}

impl SentMessage {
    pub fn to(&self) -> &str {
        match self {
            SentMessage::Session { to, .. } | SentMessage::Template { to, .. } => to,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            SentMessage::Session { body, .. } => Some(body),
            SentMessage::Template { .. } => None,
        }
    }
}

/// Records every accepted message. Addresses marked failing are rejected
/// permanently; the first `transient_failures` attempts fail with a
/// retryable HTTP error.
#[derive(Default)]
pub struct RecordingChannel {
    sandbox: bool,
    templates: HashMap<MessageKind, String>,
    failing: HashSet<String>,
    transient_failures: AtomicU32,
    attempts: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sandbox(mut self) -> Self {
        self.sandbox = true;
        self
    }

    pub fn with_template(mut self, kind: MessageKind, template_id: &str) -> Self {
        self.templates.insert(kind, template_id.to_string());
        self
    }

    pub fn failing_for(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, address: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.to() == address).collect()
    }

    /// Send attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn accept(&self, message: SentMessage) -> Result<DeliveryReceipt, ChannelError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(ChannelError::Http("simulated timeout".into()));
        }
        if self.failing.contains(message.to()) {
            return Err(ChannelError::Rejected {
                name: "recording".into(),
                code: Some(63003),
                reason: "simulated rejection".into(),
            });
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(DeliveryReceipt {
            handle: format!("SM{attempt:06}"),
            status: DeliveryStatus::Sent,
        })
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn is_sandbox(&self) -> bool {
        self.sandbox
    }

    fn template_for(&self, kind: MessageKind) -> Option<String> {
        self.templates.get(&kind).cloned()
    }

    async fn send_session(&self, to: &str, body: &str) -> Result<DeliveryReceipt, ChannelError> {
        self.accept(SentMessage::Session {
            to: to.to_string(),
            body: body.to_string(),
        })
    }

    async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        variables: &TemplateVariables,
    ) -> Result<DeliveryReceipt, ChannelError> {
        self.accept(SentMessage::Template {
            to: to.to_string(),
            template_id: template_id.to_string(),
            variables: variables.clone(),
        })
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

// ── Content source ──────────────────────────────────────────────────

/// Returns the same article every call, or fails every call.
pub struct StubContentSource {
    article: Option<Article>,
    calls: AtomicUsize,
}

impl StubContentSource {
    pub fn new(article: Article) -> Self {
        Self {
            article: Some(article),
            calls: AtomicUsize::new(0),
        }
    }

    /// A source that never finds a suitable article.
    pub fn exhausted() -> Self {
        Self {
            article: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// An English article titled "Example".
pub fn example_article() -> Article {
    Article {
        title: "Example".into(),
        url: "https://en.wikipedia.org/wiki/Example".into(),
        summary: "Example is a term used to describe a representative instance of something.".into(),
        body: "Example is a term used to describe a representative instance of something. \
               It is widely used in documentation, teaching and software."
            .into(),
    }
}

/// A valid two-sentence English blurb.
pub const EXAMPLE_SUMMARY: &str =
    "Example is the word people reach for when they need a stand-in. It shows up in manuals everywhere.";

#[async_trait]
impl ContentSource for StubContentSource {
    fn name(&self) -> &str {
        "stub"
    }

    async fn fetch_article(&self) -> Result<Article, ContentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.article
            .clone()
            .ok_or(ContentError::Exhausted { attempts: 5 })
    }
}

// ── Summarizer ──────────────────────────────────────────────────────

/// Returns a fixed blurb for any article.
pub struct StubSummarizer {
    reply: String,
    calls: AtomicUsize,
}

impl StubSummarizer {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for StubSummarizer {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn summarize(&self, article: &Article, _language: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if article.body.is_empty() && article.summary.is_empty() {
            return Err(LlmError::EmptyInput {
                title: article.title.clone(),
            });
        }
        Ok(self.reply.clone())
    }
}

// ── Database ────────────────────────────────────────────────────────

/// Fails the first `failures` calls with `error()`, then delegates.
pub struct FlakyDatabase {
    inner: Arc<dyn Database>,
    remaining: AtomicU32,
    error: fn() -> DatabaseError,
    calls: AtomicUsize,
}

impl FlakyDatabase {
    pub fn new(inner: Arc<dyn Database>, failures: u32, error: fn() -> DatabaseError) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), DatabaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Err((self.error)());
        }
        Ok(())
    }
}

#[async_trait]
impl Database for FlakyDatabase {
    async fn ping(&self) -> Result<(), DatabaseError> {
        self.check()?;
        self.inner.ping().await
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.check()?;
        self.inner.run_migrations().await
    }

    async fn get_recipient(&self, address: &str) -> Result<Option<Recipient>, DatabaseError> {
        self.check()?;
        self.inner.get_recipient(address).await
    }

    async fn create_recipient(&self, recipient: &NewRecipient) -> Result<Recipient, DatabaseError> {
        self.check()?;
        self.inner.create_recipient(recipient).await
    }

    async fn update_recipient(
        &self,
        address: &str,
        update: &RecipientUpdate,
    ) -> Result<Option<Recipient>, DatabaseError> {
        self.check()?;
        self.inner.update_recipient(address, update).await
    }

    async fn toggle_subscription(&self, address: &str) -> Result<Option<Recipient>, DatabaseError> {
        self.check()?;
        self.inner.toggle_subscription(address).await
    }

    async fn touch_last_inbound(&self, address: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        self.check()?;
        self.inner.touch_last_inbound(address, at).await
    }

    async fn list_subscribed(&self, language: Option<&str>) -> Result<Vec<Recipient>, DatabaseError> {
        self.check()?;
        self.inner.list_subscribed(language).await
    }

    async fn count_recipients(&self) -> Result<RecipientCounts, DatabaseError> {
        self.check()?;
        self.inner.count_recipients().await
    }

    async fn delete_recipient(&self, address: &str) -> Result<bool, DatabaseError> {
        self.check()?;
        self.inner.delete_recipient(address).await
    }

    async fn get_artifact(
        &self,
        date: NaiveDate,
        language: &str,
    ) -> Result<Option<DailyArtifact>, DatabaseError> {
        self.check()?;
        self.inner.get_artifact(date, language).await
    }

    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<DailyArtifact, DatabaseError> {
        self.check()?;
        self.inner.insert_artifact(artifact).await
    }

    async fn recent_artifacts(&self, language: &str, limit: usize) -> Result<Vec<DailyArtifact>, DatabaseError> {
        self.check()?;
        self.inner.recent_artifacts(language, limit).await
    }

    async fn delete_artifacts_before(&self, date: NaiveDate) -> Result<usize, DatabaseError> {
        self.check()?;
        self.inner.delete_artifacts_before(date).await
    }

    async fn log_outbound(&self, record: &NewOutboundRecord) -> Result<String, DatabaseError> {
        self.check()?;
        self.inner.log_outbound(record).await
    }

    async fn update_outbound_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        external_handle: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.check()?;
        self.inner
            .update_outbound_status(id, status, external_handle, error)
            .await
    }

    async fn update_outbound_status_by_handle(
        &self,
        external_handle: &str,
        status: DeliveryStatus,
    ) -> Result<bool, DatabaseError> {
        self.check()?;
        self.inner
            .update_outbound_status_by_handle(external_handle, status)
            .await
    }

    async fn recent_outbound(
        &self,
        recipient_address: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OutboundRecord>, DatabaseError> {
        self.check()?;
        self.inner.recent_outbound(recipient_address, limit).await
    }
}

// ── Application ─────────────────────────────────────────────────────

/// Fully wired English-language application state over an in-memory store,
/// the given channel and the stub content source and summarizer.
pub async fn app_state(channel: RecordingChannel) -> Result<(AppState, Arc<RecordingChannel>), Error> {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await?);
    let channel = Arc::new(channel);
    let outbound = Arc::new(Outbound::new(channel.clone(), Arc::clone(&db), RetryPolicy::none()));
    let broadcaster = Arc::new(Broadcaster::new(
        Arc::clone(&outbound),
        BroadcastConfig {
            batch_size: 10,
            batch_delay: Duration::from_millis(1),
        },
    ));
    let job = Arc::new(DailyJob::new(
        Arc::clone(&db),
        Arc::new(StubContentSource::new(example_article())),
        Arc::new(StubSummarizer::new(EXAMPLE_SUMMARY)),
        Arc::clone(&broadcaster),
        "en",
    ));

    let mut scheduler = Scheduler::new(chrono_tz::UTC);
    scheduler.add_job(DAILY_FACTS, "0 0 9 * * *", Arc::new(DailyFactsTask(Arc::clone(&job))))?;
    scheduler.add_job(RETENTION_CLEANUP, RETENTION_CRON, Arc::new(RetentionTask(Arc::clone(&job))))?;

    let state = AppState {
        db: Arc::clone(&db),
        sessions: Arc::new(SessionEngine::new(Arc::clone(&db), Arc::clone(&outbound), "en")),
        outbound,
        broadcaster,
        job,
        scheduler: Arc::new(scheduler),
        inbound: TaskTracker::new(),
        environment: Environment::Local,
        language: "en".into(),
    };
    Ok((state, channel))
}
