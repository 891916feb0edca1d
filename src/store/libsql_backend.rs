//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Mutations that must be
//! atomic are single statements (`UPDATE ... RETURNING`), so the shared
//! connection never holds an open transaction across awaits.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::channels::MessageKind;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    DailyArtifact, Database, DeliveryStatus, NewArtifact, NewOutboundRecord, NewRecipient, OutboundRecord,
    Recipient, RecipientCounts, RecipientUpdate,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to create in-memory database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_recipients(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Recipient>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| DatabaseError::from_libsql(op, e))? {
            out.push(row_to_recipient(&row).map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?);
        }
        Ok(out)
    }

    async fn query_artifacts(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<DailyArtifact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_libsql(op, e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| DatabaseError::from_libsql(op, e))? {
            out.push(row_to_artifact(&row)?);
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

fn opt_bool(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(b as i64),
        None => libsql::Value::Null,
    }
}

const RECIPIENT_COLUMNS: &str = "id, address, language, subscribed, last_inbound_at, created_at, updated_at";

const ARTIFACT_COLUMNS: &str = "id, date, language, source_title, source_url, summary_text, created_at";

const OUTBOUND_COLUMNS: &str =
    "id, recipient_address, content, kind, status, external_handle, error, created_at, updated_at";

/// Column order matches RECIPIENT_COLUMNS.
fn row_to_recipient(row: &libsql::Row) -> Result<Recipient, libsql::Error> {
    let subscribed: i64 = row.get(3)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;
    Ok(Recipient {
        id: row.get(0)?,
        address: row.get(1)?,
        language: row.get(2)?,
        subscribed: subscribed != 0,
        last_inbound_at: parse_optional_datetime(row.get::<String>(4).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Column order matches ARTIFACT_COLUMNS.
fn row_to_artifact(row: &libsql::Row) -> Result<DailyArtifact, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("artifact row parse: {e}"));
    let date_str: String = row.get(1).map_err(parse)?;
    let created_str: String = row.get(6).map_err(parse)?;
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("artifact date '{date_str}': {e}")))?;
    Ok(DailyArtifact {
        id: row.get(0).map_err(parse)?,
        date,
        language: row.get(2).map_err(parse)?,
        source_title: row.get(3).map_err(parse)?,
        source_url: row.get(4).map_err(parse)?,
        summary_text: row.get(5).map_err(parse)?,
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches OUTBOUND_COLUMNS.
fn row_to_outbound(row: &libsql::Row) -> Result<OutboundRecord, libsql::Error> {
    let kind_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;
    Ok(OutboundRecord {
        id: row.get(0)?,
        recipient_address: row.get(1)?,
        content: row.get(2)?,
        kind: MessageKind::from_db(&kind_str),
        status: DeliveryStatus::from_db(&status_str),
        external_handle: row.get::<String>(5).ok(),
        error: row.get::<String>(6).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn ping(&self) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("ping: {e}")))?;
        rows.next()
            .await
            .map_err(|e| DatabaseError::Connection(format!("ping: {e}")))?;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Recipients ──────────────────────────────────────────────────

    async fn get_recipient(&self, address: &str) -> Result<Option<Recipient>, DatabaseError> {
        let mut found = self
            .query_recipients(
                "get_recipient",
                &format!("SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE address = ?1"),
                params![address],
            )
            .await?;
        Ok(found.pop())
    }

    async fn create_recipient(&self, recipient: &NewRecipient) -> Result<Recipient, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let mut created = self
            .query_recipients(
                "create_recipient",
                &format!(
                    "INSERT INTO recipients (id, address, language, subscribed, last_inbound_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                     RETURNING {RECIPIENT_COLUMNS}"
                ),
                params![
                    id.clone(),
                    recipient.address.as_str(),
                    recipient.language.as_str(),
                    recipient.subscribed as i64,
                    opt_datetime(recipient.last_inbound_at),
                    now,
                ],
            )
            .await?;

        debug!(id = %id, address = %recipient.address, "Recipient created");
        created
            .pop()
            .ok_or_else(|| DatabaseError::Query("create_recipient: no row returned".to_string()))
    }

    async fn update_recipient(
        &self,
        address: &str,
        update: &RecipientUpdate,
    ) -> Result<Option<Recipient>, DatabaseError> {
        let mut updated = self
            .query_recipients(
                "update_recipient",
                &format!(
                    "UPDATE recipients SET
                        subscribed = COALESCE(?2, subscribed),
                        language = COALESCE(?3, language),
                        last_inbound_at = COALESCE(?4, last_inbound_at),
                        updated_at = ?5
                     WHERE address = ?1
                     RETURNING {RECIPIENT_COLUMNS}"
                ),
                params![
                    address,
                    opt_bool(update.subscribed),
                    opt_text(update.language.as_deref()),
                    opt_datetime(update.last_inbound_at),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await?;
        Ok(updated.pop())
    }

    async fn toggle_subscription(&self, address: &str) -> Result<Option<Recipient>, DatabaseError> {
        let mut updated = self
            .query_recipients(
                "toggle_subscription",
                &format!(
                    "UPDATE recipients SET subscribed = 1 - subscribed, updated_at = ?2
                     WHERE address = ?1
                     RETURNING {RECIPIENT_COLUMNS}"
                ),
                params![address, Utc::now().to_rfc3339()],
            )
            .await?;

        if let Some(r) = updated.last() {
            debug!(address = %address, subscribed = r.subscribed, "Subscription toggled");
        }
        Ok(updated.pop())
    }

    async fn touch_last_inbound(&self, address: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE recipients SET last_inbound_at = ?2, updated_at = ?3 WHERE address = ?1",
                params![address, at.to_rfc3339(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("touch_last_inbound", e))?;
        Ok(changed > 0)
    }

    async fn list_subscribed(&self, language: Option<&str>) -> Result<Vec<Recipient>, DatabaseError> {
        self.query_recipients(
            "list_subscribed",
            &format!(
                "SELECT {RECIPIENT_COLUMNS} FROM recipients
                 WHERE subscribed = 1 AND (?1 IS NULL OR language = ?1)
                 ORDER BY created_at ASC, id ASC"
            ),
            params![opt_text(language)],
        )
        .await
    }

    async fn count_recipients(&self) -> Result<RecipientCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT language, COUNT(*), COALESCE(SUM(subscribed), 0) FROM recipients GROUP BY language",
                (),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("count_recipients", e))?;

        let mut counts = RecipientCounts::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("count_recipients", e))?
        {
            let parse = |e: libsql::Error| DatabaseError::Query(format!("count_recipients row parse: {e}"));
            let language: String = row.get(0).map_err(parse)?;
            let total: i64 = row.get(1).map_err(parse)?;
            let subscribed: i64 = row.get(2).map_err(parse)?;
            counts.total += total as u64;
            counts.subscribed += subscribed as u64;
            counts.by_language.insert(language, subscribed as u64);
        }
        Ok(counts)
    }

    async fn delete_recipient(&self, address: &str) -> Result<bool, DatabaseError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM recipients WHERE address = ?1", params![address])
            .await
            .map_err(|e| DatabaseError::from_libsql("delete_recipient", e))?;
        if deleted > 0 {
            info!(address = %address, "Recipient deleted");
        }
        Ok(deleted > 0)
    }

    // ── Artifacts ───────────────────────────────────────────────────

    async fn get_artifact(
        &self,
        date: NaiveDate,
        language: &str,
    ) -> Result<Option<DailyArtifact>, DatabaseError> {
        let mut found = self
            .query_artifacts(
                "get_artifact",
                &format!("SELECT {ARTIFACT_COLUMNS} FROM daily_artifacts WHERE date = ?1 AND language = ?2"),
                params![date_key(date), language],
            )
            .await?;
        Ok(found.pop())
    }

    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<DailyArtifact, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let mut inserted = self
            .query_artifacts(
                "insert_artifact",
                &format!(
                    "INSERT INTO daily_artifacts (id, date, language, source_title, source_url, summary_text, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     RETURNING {ARTIFACT_COLUMNS}"
                ),
                params![
                    id.clone(),
                    date_key(artifact.date),
                    artifact.language.as_str(),
                    artifact.source_title.as_str(),
                    artifact.source_url.as_str(),
                    artifact.summary_text.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await?;

        debug!(id = %id, date = %artifact.date, language = %artifact.language, "Artifact stored");
        inserted
            .pop()
            .ok_or_else(|| DatabaseError::Query("insert_artifact: no row returned".to_string()))
    }

    async fn recent_artifacts(&self, language: &str, limit: usize) -> Result<Vec<DailyArtifact>, DatabaseError> {
        self.query_artifacts(
            "recent_artifacts",
            &format!(
                "SELECT {ARTIFACT_COLUMNS} FROM daily_artifacts
                 WHERE language = ?1 ORDER BY date DESC LIMIT ?2"
            ),
            params![language, limit as i64],
        )
        .await
    }

    async fn delete_artifacts_before(&self, date: NaiveDate) -> Result<usize, DatabaseError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM daily_artifacts WHERE date < ?1", params![date_key(date)])
            .await
            .map_err(|e| DatabaseError::from_libsql("delete_artifacts_before", e))?;
        Ok(deleted as usize)
    }

    // ── Outbound log ────────────────────────────────────────────────

    async fn log_outbound(&self, record: &NewOutboundRecord) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO outbound_messages (id, recipient_address, content, kind, status,
                    external_handle, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id.clone(),
                    record.recipient_address.as_str(),
                    record.content.as_str(),
                    record.kind.as_str(),
                    record.status.as_str(),
                    opt_text(record.external_handle.as_deref()),
                    opt_text(record.error.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("log_outbound", e))?;
        Ok(id)
    }

    async fn update_outbound_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        external_handle: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE outbound_messages SET
                    status = ?2,
                    external_handle = COALESCE(?3, external_handle),
                    error = ?4,
                    updated_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    status.as_str(),
                    opt_text(external_handle),
                    opt_text(error),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("update_outbound_status", e))?;
        Ok(())
    }

    async fn update_outbound_status_by_handle(
        &self,
        external_handle: &str,
        status: DeliveryStatus,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE outbound_messages SET status = ?2, updated_at = ?3 WHERE external_handle = ?1",
                params![external_handle, status.as_str(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("update_outbound_status_by_handle", e))?;
        Ok(changed > 0)
    }

    async fn recent_outbound(
        &self,
        recipient_address: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OutboundRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {OUTBOUND_COLUMNS} FROM outbound_messages
                     WHERE (?1 IS NULL OR recipient_address = ?1)
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![opt_text(recipient_address), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("recent_outbound", e))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("recent_outbound", e))?
        {
            out.push(
                row_to_outbound(&row)
                    .map_err(|e| DatabaseError::Query(format!("recent_outbound row parse: {e}")))?,
            );
        }
        Ok(out)
    }
}
