//! Delivery channel abstraction for outbound messages.

pub mod message;
pub mod outbound;
pub mod whatsapp;

use async_trait::async_trait;

pub use message::{MessageKind, OutboundMessage, TemplateVariables};
pub use outbound::{DeliveryMode, Outbound, session_window_open};
pub use whatsapp::WhatsAppChannel;

use crate::error::ChannelError;
use crate::store::DeliveryStatus;

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    /// Provider message id, used to match later status callbacks.
    pub handle: String,
    pub status: DeliveryStatus,
}

/// A provider that can deliver messages to an address.
///
/// Addresses are canonical (no channel scheme); implementations add whatever
/// prefix their wire format needs.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel name, used in logs and errors.
    fn name(&self) -> &str;

    /// Sandbox senders cannot send free-form session messages.
    fn is_sandbox(&self) -> bool;

    /// Template id registered for `kind`, if any.
    fn template_for(&self, kind: MessageKind) -> Option<String>;

    /// Send a free-form message inside the recipient's session window.
    async fn send_session(&self, to: &str, body: &str) -> Result<DeliveryReceipt, ChannelError>;

    /// Send a pre-approved template with positional variables.
    async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        variables: &TemplateVariables,
    ) -> Result<DeliveryReceipt, ChannelError>;

    /// Check that the provider is reachable and the credentials work.
    async fn health_check(&self) -> Result<(), ChannelError>;
}
