//! Typed outbound messages.
//!
//! Each message knows its kind, its free-form session body in a given
//! language, and the positional variables its pre-approved template expects.

use std::collections::BTreeMap;

use serde::Serialize;

/// Kind of outbound message, persisted in the outbound log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Welcome,
    Menu,
    DailyFact,
    Help,
    SubscriptionChanged,
    Error,
    Custom,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Welcome => "welcome",
            MessageKind::Menu => "menu",
            MessageKind::DailyFact => "daily_fact",
            MessageKind::Help => "help",
            MessageKind::SubscriptionChanged => "subscription_changed",
            MessageKind::Error => "error",
            MessageKind::Custom => "custom",
        }
    }

    /// Parse a stored kind. Unknown values read as `Custom`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "welcome" => MessageKind::Welcome,
            "menu" => MessageKind::Menu,
            "daily_fact" => MessageKind::DailyFact,
            "help" => MessageKind::Help,
            "subscription_changed" => MessageKind::SubscriptionChanged,
            "error" => MessageKind::Error,
            _ => MessageKind::Custom,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional template variables (`{"1": ..., "2": ...}` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVariables(Vec<String>);

impl TemplateVariables {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Provider JSON form, keys numbered from 1.
    pub fn to_json(&self) -> String {
        let map: BTreeMap<String, &str> = self
            .0
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1).to_string(), v.as_str()))
            .collect();
        serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A message the service can send.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Onboarding text plus the main menu, sent on first contact.
    Welcome,
    /// Main menu.
    Menu,
    /// Usage help.
    Help,
    /// Reply to command "1"; fetching today's fact on demand is not offered yet.
    FactInfo,
    /// Confirmation after a subscription toggle, reflecting the new state.
    SubscriptionChanged { subscribed: bool },
    /// The daily broadcast.
    DailyFact {
        title: String,
        url: String,
        summary: String,
    },
    /// Apology plus the main menu after an internal failure.
    Error,
    /// Free-form admin text.
    Custom { body: String },
}

impl OutboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            OutboundMessage::Welcome => MessageKind::Welcome,
            OutboundMessage::Menu => MessageKind::Menu,
            OutboundMessage::Help | OutboundMessage::FactInfo => MessageKind::Help,
            OutboundMessage::SubscriptionChanged { .. } => MessageKind::SubscriptionChanged,
            OutboundMessage::DailyFact { .. } => MessageKind::DailyFact,
            OutboundMessage::Error => MessageKind::Error,
            OutboundMessage::Custom { .. } => MessageKind::Custom,
        }
    }

    /// True when the message carries caller-supplied text and that text is blank.
    pub fn is_empty(&self) -> bool {
        match self {
            OutboundMessage::DailyFact { summary, .. } => summary.trim().is_empty(),
            OutboundMessage::Custom { body } => body.trim().is_empty(),
            _ => false,
        }
    }

    /// Session-mode body for a recipient in `language`.
    pub fn body(&self, language: &str) -> String {
        let hebrew = language == "he";
        match self {
            OutboundMessage::Welcome => {
                if hebrew {
                    format!(
                        "ברוכים הבאים לעובדה היומית מויקיפדיה! 📚\nבכל יום תקבלו עובדה מעניינת אחת.\n\n{}",
                        menu_text(hebrew)
                    )
                } else {
                    format!(
                        "Welcome to the Wikipedia daily fact! 📚\nEvery day you will get one interesting fact.\n\n{}",
                        menu_text(hebrew)
                    )
                }
            }
            OutboundMessage::Menu => menu_text(hebrew).to_string(),
            OutboundMessage::Help => help_text(hebrew).to_string(),
            OutboundMessage::FactInfo => {
                if hebrew {
                    format!("העובדה היומית נשלחת כל בוקר לכל המנויים.\n\n{}", help_text(hebrew))
                } else {
                    format!("The daily fact is sent every morning to all subscribers.\n\n{}", help_text(hebrew))
                }
            }
            OutboundMessage::SubscriptionChanged { subscribed } => match (hebrew, subscribed) {
                (true, true) => "נרשמתם מחדש לעובדה היומית ✅".to_string(),
                (true, false) => "ההרשמה בוטלה. לא תקבלו עוד עובדות יומיות. שלחו 2 כדי להירשם מחדש.".to_string(),
                (false, true) => "You are subscribed to the daily fact ✅".to_string(),
                (false, false) => {
                    "You are unsubscribed and will no longer receive daily facts. Send 2 to subscribe again."
                        .to_string()
                }
            },
            OutboundMessage::DailyFact { title, url, summary } => {
                let heading = if hebrew { "העובדה היומית" } else { "Daily fact" };
                format!("📖 {heading}: {title}\n\n{summary}\n\n{url}")
            }
            OutboundMessage::Error => {
                if hebrew {
                    format!("משהו השתבש. נסו שוב מאוחר יותר.\n\n{}", menu_text(hebrew))
                } else {
                    format!("Something went wrong. Please try again later.\n\n{}", menu_text(hebrew))
                }
            }
            OutboundMessage::Custom { body } => body.clone(),
        }
    }

    /// Variables for the template registered for this message's kind.
    pub fn template_variables(&self, language: &str) -> TemplateVariables {
        match self {
            OutboundMessage::DailyFact { summary, .. } => TemplateVariables::single(summary.as_str()),
            OutboundMessage::SubscriptionChanged { .. } => TemplateVariables::single(self.body(language)),
            OutboundMessage::Custom { body } => TemplateVariables::single(body.as_str()),
            OutboundMessage::Welcome
            | OutboundMessage::Menu
            | OutboundMessage::Help
            | OutboundMessage::FactInfo
            | OutboundMessage::Error => TemplateVariables::none(),
        }
    }
}

fn menu_text(hebrew: bool) -> &'static str {
    if hebrew {
        "תפריט:\n1️⃣ מידע על העובדה היומית\n2️⃣ הרשמה / ביטול הרשמה\n3️⃣ עזרה"
    } else {
        "Menu:\n1️⃣ About the daily fact\n2️⃣ Subscribe / unsubscribe\n3️⃣ Help"
    }
}

fn help_text(hebrew: bool) -> &'static str {
    if hebrew {
        "שלחו את מספר האפשרות:\n1 - מידע על העובדה היומית\n2 - הרשמה או ביטול הרשמה\n3 - עזרה\nכל הודעה אחרת תציג את התפריט."
    } else {
        "Reply with an option number:\n1 - about the daily fact\n2 - subscribe or unsubscribe\n3 - help\nAny other message shows the menu."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_storage_names() {
        for kind in [
            MessageKind::Welcome,
            MessageKind::Menu,
            MessageKind::DailyFact,
            MessageKind::Help,
            MessageKind::SubscriptionChanged,
            MessageKind::Error,
            MessageKind::Custom,
        ] {
            assert_eq!(MessageKind::from_db(kind.as_str()), kind);
        }
    }

    #[test]
    fn error_reply_carries_the_menu() {
        let body = OutboundMessage::Error.body("en");
        assert!(body.starts_with("Something went wrong"));
        assert!(body.contains("Menu:"));
        assert!(OutboundMessage::Error.body("he").contains("תפריט:"));
    }

    #[test]
    fn fact_info_is_help_kind() {
        assert_eq!(OutboundMessage::FactInfo.kind(), MessageKind::Help);
    }

    #[test]
    fn template_variables_serialize_positionally() {
        let msg = OutboundMessage::DailyFact {
            title: "Example".into(),
            url: "https://en.wikipedia.org/wiki/Example".into(),
            summary: "A \"quoted\" fact.".into(),
        };
        let vars = msg.template_variables("en");
        assert_eq!(vars.to_json(), r#"{"1":"A \"quoted\" fact."}"#);
        assert_eq!(OutboundMessage::Menu.template_variables("he").to_json(), "{}");
    }

    #[test]
    fn subscription_reply_reflects_new_state() {
        let off = OutboundMessage::SubscriptionChanged { subscribed: false }.body("en");
        assert!(off.contains("unsubscribed"));
        let on = OutboundMessage::SubscriptionChanged { subscribed: true }.body("en");
        assert!(!on.contains("unsubscribed"));
    }

    #[test]
    fn welcome_includes_menu() {
        assert!(OutboundMessage::Welcome.body("en").contains("Menu:"));
        assert!(OutboundMessage::Welcome.body("he").contains("תפריט"));
    }

    #[test]
    fn empty_content_detected() {
        assert!(OutboundMessage::Custom { body: "  ".into() }.is_empty());
        assert!(!OutboundMessage::Menu.is_empty());
    }
}
