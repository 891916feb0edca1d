//! WhatsApp channel over the Twilio Messages REST API.
//!
//! Session messages go out with a `Body`; template messages with
//! `ContentSid` + `ContentVariables`. Both are form-encoded POSTs
//! authenticated with the account SID and auth token.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::channels::{DeliveryChannel, DeliveryReceipt, MessageKind, TemplateVariables};
use crate::config::TwilioConfig;
use crate::error::ChannelError;
use crate::store::DeliveryStatus;

const CHANNEL_NAME: &str = "whatsapp";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Successful message creation response (subset).
#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

/// Error body returned with 4xx responses (subset).
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// WhatsApp channel backed by Twilio.
pub struct WhatsAppChannel {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(config: TwilioConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Http(format!("failed to build HTTP client: {e}")))?;

        if config.is_sandbox() {
            tracing::warn!("Using the WhatsApp sandbox sender; recipients must join the sandbox first");
        }
        if config.templates.daily_fact.is_none() {
            tracing::warn!("No daily fact template configured; broadcasts need an open session window");
        }

        Ok(Self { config, client })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    fn account_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    async fn post_message(&self, form: &[(&str, &str)]) -> Result<DeliveryReceipt, ChannelError> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(self.config.auth_token.expose_secret()))
            .form(form)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: MessageResponse = response.json().await.map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("unreadable response: {e}"),
            })?;
            let delivery_status = body
                .status
                .as_deref()
                .and_then(DeliveryStatus::from_provider)
                .unwrap_or(DeliveryStatus::Sent);
            // Queued at the provider counts as sent from our side.
            let delivery_status = match delivery_status {
                DeliveryStatus::Pending => DeliveryStatus::Sent,
                other => other,
            };
            return Ok(DeliveryReceipt {
                handle: body.sid,
                status: delivery_status,
            });
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChannelError::RateLimited {
                name: CHANNEL_NAME.into(),
            });
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(ChannelError::Http(format!("{status}: {text}")));
        }

        let parsed: Option<ErrorResponse> = serde_json::from_str(&text).ok();
        let (code, reason) = match parsed {
            Some(err) => (err.code, err.message.unwrap_or_else(|| text.clone())),
            None => (None, text),
        };
        Err(ChannelError::Rejected {
            name: CHANNEL_NAME.into(),
            code,
            reason: format!("{status}: {reason}"),
        })
    }
}

/// Prefix the channel scheme unless the address already carries it.
pub fn wire_address(address: &str) -> String {
    if address.starts_with("whatsapp:") {
        address.to_string()
    } else {
        format!("whatsapp:{address}")
    }
}

#[async_trait]
impl DeliveryChannel for WhatsAppChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    fn is_sandbox(&self) -> bool {
        self.config.is_sandbox()
    }

    fn template_for(&self, kind: MessageKind) -> Option<String> {
        let templates = &self.config.templates;
        match kind {
            MessageKind::Welcome => templates.welcome.clone(),
            MessageKind::Menu => templates.menu.clone(),
            MessageKind::Help => templates.help.clone(),
            MessageKind::SubscriptionChanged => templates.subscription.clone(),
            MessageKind::DailyFact => templates.daily_fact.clone(),
            // The menu template is a safe generic reply after a failure.
            MessageKind::Error => templates.menu.clone(),
            MessageKind::Custom => None,
        }
    }

    async fn send_session(&self, to: &str, body: &str) -> Result<DeliveryReceipt, ChannelError> {
        if body.trim().is_empty() {
            return Err(ChannelError::InvalidMessage("empty body".into()));
        }
        let to = wire_address(to);
        self.post_message(&[("To", to.as_str()), ("From", self.config.from_number.as_str()), ("Body", body)])
            .await
    }

    async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        variables: &TemplateVariables,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let to = wire_address(to);
        let variables = variables.to_json();
        self.post_message(&[
            ("To", to.as_str()),
            ("From", self.config.from_number.as_str()),
            ("ContentSid", template_id),
            ("ContentVariables", variables.as_str()),
        ])
        .await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let response = self
            .client
            .get(self.account_url())
            .basic_auth(&self.config.account_sid, Some(self.config.auth_token.expose_secret()))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("account check returned {}", response.status()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use secrecy::SecretString;

    use super::*;
    use crate::config::TemplateSids;

    type Captured = Arc<Mutex<Vec<HashMap<String, String>>>>;

    /// Mock Messages endpoint. Bodies containing "fail" get a 400 with a
    /// provider error code; "busy" gets a 429.
    async fn mock_twilio() -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));

        async fn create(
            State(captured): State<Captured>,
            Form(form): Form<HashMap<String, String>>,
        ) -> (StatusCode, Json<serde_json::Value>) {
            let body = form.get("Body").cloned().unwrap_or_default();
            captured.lock().unwrap().push(form);
            if body.contains("fail") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"code": 63016, "message": "outside window", "status": 400})),
                );
            }
            if body.contains("busy") {
                return (StatusCode::TOO_MANY_REQUESTS, Json(serde_json::json!({})));
            }
            (
                StatusCode::CREATED,
                Json(serde_json::json!({"sid": "SM0001", "status": "queued"})),
            )
        }

        let app = Router::new()
            .route("/2010-04-01/Accounts/{sid}/Messages.json", post(create))
            .with_state(Arc::clone(&captured));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), captured)
    }

    fn config(api_base: &str, from: &str) -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: SecretString::from("token"),
            from_number: from.into(),
            api_base: api_base.into(),
            templates: TemplateSids {
                daily_fact: Some("HXfact".into()),
                menu: Some("HXmenu".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn wire_address_adds_scheme_once() {
        assert_eq!(wire_address("+15551230000"), "whatsapp:+15551230000");
        assert_eq!(wire_address("whatsapp:+15551230000"), "whatsapp:+15551230000");
    }

    #[test]
    fn template_lookup_by_kind() {
        let channel = WhatsAppChannel::new(config("http://unused", "whatsapp:+15550001111")).unwrap();
        assert_eq!(channel.template_for(MessageKind::DailyFact).as_deref(), Some("HXfact"));
        assert_eq!(channel.template_for(MessageKind::Error).as_deref(), Some("HXmenu"));
        assert!(channel.template_for(MessageKind::Help).is_none());
        assert!(channel.template_for(MessageKind::Custom).is_none());
        assert!(!channel.is_sandbox());

        let sandbox = WhatsAppChannel::new(config("http://unused", crate::config::TWILIO_SANDBOX_SENDER)).unwrap();
        assert!(sandbox.is_sandbox());
    }

    #[tokio::test]
    async fn session_send_posts_body() {
        let (base, captured) = mock_twilio().await;
        let channel = WhatsAppChannel::new(config(&base, "whatsapp:+15550001111")).unwrap();

        let receipt = channel.send_session("+15551230000", "hello there").await.unwrap();
        assert_eq!(receipt.handle, "SM0001");
        assert_eq!(receipt.status, DeliveryStatus::Sent);

        let forms = captured.lock().unwrap();
        assert_eq!(forms[0]["To"], "whatsapp:+15551230000");
        assert_eq!(forms[0]["From"], "whatsapp:+15550001111");
        assert_eq!(forms[0]["Body"], "hello there");
        assert!(!forms[0].contains_key("ContentSid"));
    }

    #[tokio::test]
    async fn template_send_posts_content_fields() {
        let (base, captured) = mock_twilio().await;
        let channel = WhatsAppChannel::new(config(&base, "whatsapp:+15550001111")).unwrap();

        channel
            .send_template("+15551230000", "HXfact", &TemplateVariables::single("fact"))
            .await
            .unwrap();

        let forms = captured.lock().unwrap();
        assert_eq!(forms[0]["ContentSid"], "HXfact");
        assert_eq!(forms[0]["ContentVariables"], r#"{"1":"fact"}"#);
        assert!(!forms[0].contains_key("Body"));
    }

    #[tokio::test]
    async fn provider_errors_are_classified() {
        let (base, _) = mock_twilio().await;
        let channel = WhatsAppChannel::new(config(&base, "whatsapp:+15550001111")).unwrap();

        let err = channel.send_session("+1", "please fail").await.unwrap_err();
        assert!(matches!(err, ChannelError::Rejected { code: Some(63016), .. }));
        assert!(!err.is_transient());

        let err = channel.send_session("+1", "busy now").await.unwrap_err();
        assert!(matches!(err, ChannelError::RateLimited { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn empty_session_body_rejected_locally() {
        let channel = WhatsAppChannel::new(config("http://127.0.0.1:9", "whatsapp:+15550001111")).unwrap();
        let err = channel.send_session("+1", "   ").await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidMessage(_)));
    }
}
