//! Persistence layer: libSQL-backed storage for recipients, daily artifacts
//! and the outbound message log.

pub mod libsql_backend;
pub mod migrations;
pub mod retrying;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use retrying::RetryingDatabase;
pub use traits::{
    DailyArtifact, Database, DeliveryStatus, NewArtifact, NewOutboundRecord, NewRecipient, OutboundRecord,
    Recipient, RecipientCounts, RecipientUpdate,
};
