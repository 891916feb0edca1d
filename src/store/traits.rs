//! `Database` trait: single async interface for all persistence.
//!
//! Every read hands back an owned snapshot. "Not found" is `Ok(None)` or
//! `Ok(false)`, never an error.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::channels::MessageKind;
use crate::error::DatabaseError;

// ── Recipients ──────────────────────────────────────────────────────

/// A chat endpoint that can receive broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipient {
    pub id: String,
    /// Canonical address without channel scheme, e.g. `+15551230000`.
    pub address: String,
    /// Content language partition.
    pub language: String,
    pub subscribed: bool,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a recipient that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewRecipient {
    pub address: String,
    pub language: String,
    pub subscribed: bool,
    pub last_inbound_at: Option<DateTime<Utc>>,
}

impl NewRecipient {
    /// A subscribed recipient created from an inbound message received at `at`.
    pub fn from_inbound(address: &str, language: &str, at: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            language: language.to_string(),
            subscribed: true,
            last_inbound_at: Some(at),
        }
    }
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct RecipientUpdate {
    pub subscribed: Option<bool>,
    pub language: Option<String>,
    pub last_inbound_at: Option<DateTime<Utc>>,
}

/// Recipient totals for the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecipientCounts {
    pub total: u64,
    pub subscribed: u64,
    /// Subscribed recipients per language.
    pub by_language: BTreeMap<String, u64>,
}

// ── Artifacts ───────────────────────────────────────────────────────

/// The summary produced for one `(date, language)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyArtifact {
    pub id: String,
    pub date: NaiveDate,
    pub language: String,
    pub source_title: String,
    pub source_url: String,
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub date: NaiveDate,
    pub language: String,
    pub source_title: String,
    pub source_url: String,
    pub summary_text: String,
}

// ── Outbound log ────────────────────────────────────────────────────

/// Delivery status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Parse a stored status. Unknown values read as `Pending`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "sent" => DeliveryStatus::Sent,
            "delivered" => DeliveryStatus::Delivered,
            "read" => DeliveryStatus::Read,
            "failed" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Pending,
        }
    }

    /// Map a provider status callback value (`queued`, `undelivered`, ...).
    pub fn from_provider(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "accepted" | "queued" | "sending" | "scheduled" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            "failed" | "undelivered" | "canceled" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// One outbound send attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundRecord {
    pub id: String,
    pub recipient_address: String,
    pub content: String,
    pub kind: MessageKind,
    pub status: DeliveryStatus,
    pub external_handle: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOutboundRecord {
    pub recipient_address: String,
    pub content: String,
    pub kind: MessageKind,
    pub status: DeliveryStatus,
    pub external_handle: Option<String>,
    pub error: Option<String>,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Backend-agnostic store for recipients, artifacts and the outbound log.
#[async_trait]
pub trait Database: Send + Sync {
    /// Verify the connection is usable.
    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Recipients ──────────────────────────────────────────────────

    async fn get_recipient(&self, address: &str) -> Result<Option<Recipient>, DatabaseError>;

    /// Insert a recipient. A duplicate address is `DatabaseError::Constraint`.
    async fn create_recipient(&self, recipient: &NewRecipient) -> Result<Recipient, DatabaseError>;

    /// Apply a partial update in one statement. `None` if the address is unknown.
    async fn update_recipient(
        &self,
        address: &str,
        update: &RecipientUpdate,
    ) -> Result<Option<Recipient>, DatabaseError>;

    /// Atomically flip `subscribed` and return the new state.
    async fn toggle_subscription(&self, address: &str) -> Result<Option<Recipient>, DatabaseError>;

    /// Record inbound activity. Returns whether the recipient exists.
    async fn touch_last_inbound(&self, address: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Subscribed recipients, optionally restricted to one language, oldest first.
    async fn list_subscribed(&self, language: Option<&str>) -> Result<Vec<Recipient>, DatabaseError>;

    async fn count_recipients(&self) -> Result<RecipientCounts, DatabaseError>;

    /// Hard delete (admin only). Returns whether a row was removed.
    async fn delete_recipient(&self, address: &str) -> Result<bool, DatabaseError>;

    // ── Artifacts ───────────────────────────────────────────────────

    async fn get_artifact(
        &self,
        date: NaiveDate,
        language: &str,
    ) -> Result<Option<DailyArtifact>, DatabaseError>;

    /// Insert an artifact. A second one for the same `(date, language)` is
    /// `DatabaseError::Constraint`.
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<DailyArtifact, DatabaseError>;

    /// Most recent artifacts for a language, newest first.
    async fn recent_artifacts(&self, language: &str, limit: usize) -> Result<Vec<DailyArtifact>, DatabaseError>;

    /// Delete artifacts dated strictly before `date`. Returns the count removed.
    async fn delete_artifacts_before(&self, date: NaiveDate) -> Result<usize, DatabaseError>;

    // ── Outbound log ────────────────────────────────────────────────

    /// Record an outbound attempt. Returns the record id.
    async fn log_outbound(&self, record: &NewOutboundRecord) -> Result<String, DatabaseError>;

    /// Update a record after the send completes. A `None` handle keeps the existing one.
    async fn update_outbound_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        external_handle: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Apply a provider status callback. Returns whether a record matched.
    async fn update_outbound_status_by_handle(
        &self,
        external_handle: &str,
        status: DeliveryStatus,
    ) -> Result<bool, DatabaseError>;

    /// Latest outbound records, optionally for one address, newest first.
    async fn recent_outbound(
        &self,
        recipient_address: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OutboundRecord>, DatabaseError>;
}
