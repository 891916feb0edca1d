//! Session & command engine: turns one inbound chat message into store
//! mutations and a single reply.
//!
//! The engine keeps no per-conversation state beyond the recipient row.
//! Bare digits are menu commands; any other text re-shows the menu.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::channels::{Outbound, OutboundMessage};
use crate::error::Error;
use crate::store::{Database, NewRecipient, Recipient};

/// An inbound message as decoded from a provider webhook.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Raw sender, possibly with a channel scheme (`whatsapp:+1555...`).
    pub address: String,
    pub body: String,
    pub provider_message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Menu command parsed from a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// "1": information about the daily fact.
    FactInfo,
    /// "2": flip the subscription.
    ToggleSubscription,
    /// "3": help.
    Help,
    /// Anything else.
    ShowMenu,
}

impl Command {
    /// Classify a raw body. Only a trimmed, non-empty run of ASCII digits is
    /// a numeric command; unknown numbers and free text show the menu.
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Command::ShowMenu;
        }
        match trimmed {
            "1" => Command::FactInfo,
            "2" => Command::ToggleSubscription,
            "3" => Command::Help,
            _ => Command::ShowMenu,
        }
    }
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// First contact: recipient created and welcomed.
    Welcomed,
    /// Subscription flipped to the contained state.
    Toggled { subscribed: bool },
    /// A content reply for the command was sent.
    Replied(Command),
    /// Handling failed; a best-effort menu reply was attempted.
    Failed,
}

/// Strip a `<scheme>:` prefix such as `whatsapp:` and surrounding spaces.
pub fn canonical_address(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once(':') {
        Some((scheme, rest)) if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim().to_string()
        }
        _ => trimmed.to_string(),
    }
}

pub struct SessionEngine {
    db: Arc<dyn Database>,
    outbound: Arc<Outbound>,
    default_language: String,
}

impl SessionEngine {
    pub fn new(db: Arc<dyn Database>, outbound: Arc<Outbound>, default_language: &str) -> Self {
        Self {
            db,
            outbound,
            default_language: default_language.to_string(),
        }
    }

    /// Handle one inbound event. Never fails: errors are logged with the
    /// event context and answered with an apology and the main menu.
    pub async fn handle(&self, event: InboundEvent) -> Outcome {
        let address = canonical_address(&event.address);
        match self.process(&address, &event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    address = %address,
                    body = %event.body,
                    provider_message_id = ?event.provider_message_id,
                    error = %e,
                    "Failed to handle inbound message"
                );
                let _ = self
                    .outbound
                    .deliver(
                        &address,
                        &self.default_language,
                        Some(event.received_at),
                        &OutboundMessage::Error,
                    )
                    .await;
                Outcome::Failed
            }
        }
    }

    async fn process(&self, address: &str, event: &InboundEvent) -> Result<Outcome, Error> {
        if address.is_empty() {
            return Err(Error::Channel(crate::error::ChannelError::InvalidMessage(
                "empty sender address".into(),
            )));
        }

        let recipient = match self.db.get_recipient(address).await? {
            Some(existing) => existing,
            None => match self.create(address, event.received_at).await? {
                Created::New(recipient) => {
                    tracing::info!(address = %address, "New recipient");
                    self.reply(&recipient, &OutboundMessage::Welcome).await;
                    return Ok(Outcome::Welcomed);
                }
                // Lost a creation race; continue as an existing recipient.
                Created::Existing(recipient) => recipient,
            },
        };

        self.db.touch_last_inbound(address, event.received_at).await?;
        let recipient = Recipient {
            last_inbound_at: Some(event.received_at),
            ..recipient
        };

        let command = Command::parse(&event.body);
        tracing::debug!(address = %address, command = ?command, "Inbound command");

        match command {
            Command::ToggleSubscription => {
                let updated = self.db.toggle_subscription(address).await?.ok_or_else(|| {
                    crate::error::DatabaseError::Query(format!("recipient {address} vanished during toggle"))
                })?;
                let recipient = Recipient {
                    last_inbound_at: Some(event.received_at),
                    ..updated
                };
                tracing::info!(address = %address, subscribed = recipient.subscribed, "Subscription toggled");
                self.reply(
                    &recipient,
                    &OutboundMessage::SubscriptionChanged {
                        subscribed: recipient.subscribed,
                    },
                )
                .await;
                Ok(Outcome::Toggled {
                    subscribed: recipient.subscribed,
                })
            }
            Command::FactInfo => {
                self.reply(&recipient, &OutboundMessage::FactInfo).await;
                Ok(Outcome::Replied(command))
            }
            Command::Help => {
                self.reply(&recipient, &OutboundMessage::Help).await;
                Ok(Outcome::Replied(command))
            }
            Command::ShowMenu => {
                self.reply(&recipient, &OutboundMessage::Menu).await;
                Ok(Outcome::Replied(command))
            }
        }
    }

    async fn create(&self, address: &str, at: DateTime<Utc>) -> Result<Created, Error> {
        let new = NewRecipient::from_inbound(address, &self.default_language, at);
        match self.db.create_recipient(&new).await {
            Ok(recipient) => Ok(Created::New(recipient)),
            Err(e) if e.is_constraint() => {
                tracing::debug!(address = %address, "Recipient created concurrently, re-reading");
                let existing = self.db.get_recipient(address).await?.ok_or_else(|| {
                    crate::error::DatabaseError::Query(format!("recipient {address} missing after conflict"))
                })?;
                Ok(Created::Existing(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reply failures are logged by the dispatcher and do not undo the
    /// state change that triggered them.
    async fn reply(&self, recipient: &Recipient, message: &OutboundMessage) {
        let _ = self.outbound.deliver_to(recipient, message).await;
    }
}

enum Created {
    New(Recipient),
    Existing(Recipient),
}
