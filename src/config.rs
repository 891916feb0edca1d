//! Configuration types, built from environment variables.
//!
//! Every section has a `from_env()` constructor; `AppConfig::from_env()`
//! gathers them. Sections also accept an arbitrary key lookup so tests can
//! build configs without touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Sender used by the Twilio WhatsApp sandbox. Free-form sends are not
/// allowed from it, so it forces template delivery.
pub const TWILIO_SANDBOX_SENDER: &str = "whatsapp:+14155238886";

/// Languages the content source and validator know a script for.
pub const SUPPORTED_LANGUAGES: &[&str] = &["he", "en"];

// ── Lookup helpers ──────────────────────────────────────────────────

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    optional(lookup, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ── Environment ─────────────────────────────────────────────────────

/// Deployment environment (`ENV_ID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Sections ────────────────────────────────────────────────────────

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    /// How long shutdown waits for an in-flight job.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            environment: parsed(lookup, "ENV_ID", Environment::Local)?,
            host: optional(lookup, "SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(lookup, "SERVER_PORT", 8000)?,
            shutdown_grace: Duration::from_secs(parsed(lookup, "SHUTDOWN_GRACE_SECS", 30)?),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// libSQL store settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Local database file path.
    pub path: String,
    /// Attempts for transient store errors.
    pub retry_attempts: u32,
}

impl DatabaseConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            path: optional(lookup, "DATABASE_URL").unwrap_or_else(|| "./data/wikifacts.db".to_string()),
            retry_attempts: parsed(lookup, "DATABASE_RETRY_ATTEMPTS", 3)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }
}

/// Pre-approved template ids, one per message kind that may need
/// out-of-session delivery.
#[derive(Debug, Clone, Default)]
pub struct TemplateSids {
    pub welcome: Option<String>,
    pub menu: Option<String>,
    pub subscription: Option<String>,
    pub daily_fact: Option<String>,
    pub help: Option<String>,
}

/// Twilio WhatsApp delivery settings.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sender address, e.g. `whatsapp:+14155238886`.
    pub from_number: String,
    pub api_base: String,
    pub templates: TemplateSids,
}

impl TwilioConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut from_number = required(lookup, "TWILIO_WHATSAPP_FROM")?;
        if !from_number.starts_with("whatsapp:") {
            from_number = format!("whatsapp:{from_number}");
        }

        Ok(Self {
            account_sid: required(lookup, "TWILIO_ACCOUNT_SID")?,
            auth_token: SecretString::from(required(lookup, "TWILIO_AUTH_TOKEN")?),
            from_number,
            api_base: optional(lookup, "TWILIO_API_BASE")
                .unwrap_or_else(|| "https://api.twilio.com".to_string()),
            templates: TemplateSids {
                welcome: optional(lookup, "TWILIO_WELCOME_TEMPLATE_SID"),
                menu: optional(lookup, "TWILIO_MENU_TEMPLATE_SID"),
                subscription: optional(lookup, "TWILIO_SUBSCRIPTION_TEMPLATE_SID"),
                daily_fact: optional(lookup, "TWILIO_DAILY_FACT_TEMPLATE_SID"),
                help: optional(lookup, "TWILIO_HELP_TEMPLATE_SID"),
            },
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn is_sandbox(&self) -> bool {
        self.from_number == TWILIO_SANDBOX_SENDER
    }
}

/// OpenAI-compatible summarizer settings (OpenRouter by default).
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl SummarizerConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let temperature: f32 = parsed(lookup, "OPENROUTER_TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                key: "OPENROUTER_TEMPERATURE".to_string(),
                message: format!("{temperature} is outside 0.0..=2.0"),
            });
        }

        Ok(Self {
            api_key: SecretString::from(required(lookup, "OPENROUTER_API_KEY")?),
            model: optional(lookup, "OPENROUTER_MODEL").unwrap_or_else(|| "openai/gpt-4o-mini".to_string()),
            base_url: optional(lookup, "OPENROUTER_BASE_URL")
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            max_tokens: parsed(lookup, "OPENROUTER_MAX_TOKENS", 150)?,
            temperature,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }
}

/// Wikipedia content source settings.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Content language, also the recipient partition.
    pub language: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Overrides `https://{language}.wikipedia.org`.
    pub base_url: Option<String>,
}

impl ContentConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let language = optional(lookup, "CONTENT_LANGUAGE")
            .unwrap_or_else(|| "he".to_string())
            .to_ascii_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "CONTENT_LANGUAGE".to_string(),
                message: format!("'{language}' is not one of {SUPPORTED_LANGUAGES:?}"),
            });
        }

        Ok(Self {
            language,
            user_agent: optional(lookup, "WIKIPEDIA_USER_AGENT").unwrap_or_else(|| "WikiFactsBot/1.0".to_string()),
            timeout: Duration::from_secs(parsed(lookup, "WIKIPEDIA_TIMEOUT", 10)?),
            max_attempts: parsed(lookup, "WIKIPEDIA_MAX_ATTEMPTS", 5)?,
            base_url: optional(lookup, "WIKIPEDIA_BASE_URL"),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }
}

/// Job scheduling settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub fact_hour: u32,
    pub fact_minute: u32,
    pub timezone: Tz,
    pub tick: Duration,
}

impl SchedulerConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let fact_hour: u32 = parsed(lookup, "SCHEDULER_FACT_GENERATION_HOUR", 9)?;
        if fact_hour > 23 {
            return Err(ConfigError::InvalidValue {
                key: "SCHEDULER_FACT_GENERATION_HOUR".to_string(),
                message: format!("{fact_hour} is not an hour of the day"),
            });
        }
        let fact_minute: u32 = parsed(lookup, "SCHEDULER_FACT_GENERATION_MINUTE", 0)?;
        if fact_minute > 59 {
            return Err(ConfigError::InvalidValue {
                key: "SCHEDULER_FACT_GENERATION_MINUTE".to_string(),
                message: format!("{fact_minute} is not a minute of the hour"),
            });
        }
        let tick_secs: u64 = parsed(lookup, "SCHEDULER_TICK_SECS", 30)?;

        Ok(Self {
            fact_hour,
            fact_minute,
            timezone: parsed(lookup, "SCHEDULER_TIMEZONE", Tz::UTC)?,
            tick: Duration::from_secs(tick_secs.max(1)),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    /// Six-field cron expression for the daily production job.
    pub fn daily_cron(&self) -> String {
        format!("0 {} {} * * *", self.fact_minute, self.fact_hour)
    }
}

/// Broadcast pacing.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_secs(1),
        }
    }
}

impl BroadcastConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let batch_size: usize = parsed(lookup, "BROADCAST_BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "BROADCAST_BATCH_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            batch_size,
            batch_delay: Duration::from_millis(parsed(lookup, "BROADCAST_BATCH_DELAY_MS", 1000)?),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }
}

/// Log filter settings. `RUST_LOG` wins over `LOG_LEVEL` when both are set.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            level: optional(lookup, "LOG_LEVEL")
                .map(|l| l.to_ascii_lowercase())
                .unwrap_or_else(|| "info".to_string()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(&process_env)
    }
}

// ── Aggregate ───────────────────────────────────────────────────────

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub twilio: TwilioConfig,
    pub summarizer: SummarizerConfig,
    pub content: ContentConfig,
    pub scheduler: SchedulerConfig,
    pub broadcast: BroadcastConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_lookup(&lookup)?,
            database: DatabaseConfig::from_lookup(&lookup)?,
            twilio: TwilioConfig::from_lookup(&lookup)?,
            summarizer: SummarizerConfig::from_lookup(&lookup)?,
            content: ContentConfig::from_lookup(&lookup)?,
            scheduler: SchedulerConfig::from_lookup(&lookup)?,
            broadcast: BroadcastConfig::from_lookup(&lookup)?,
            logging: LoggingConfig::from_lookup(&lookup),
        })
    }

    /// Build the full config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn required_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "token"),
            ("TWILIO_WHATSAPP_FROM", "+14155238886"),
            ("OPENROUTER_API_KEY", "sk-or-test"),
        ]
    }

    #[test]
    fn defaults_applied() {
        let config = AppConfig::from_lookup(lookup(&required_pairs())).unwrap();
        assert_eq!(config.server.environment, Environment::Local);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.database.path, "./data/wikifacts.db");
        assert_eq!(config.summarizer.model, "openai/gpt-4o-mini");
        assert_eq!(config.summarizer.max_tokens, 150);
        assert_eq!(config.content.language, "he");
        assert_eq!(config.content.user_agent, "WikiFactsBot/1.0");
        assert_eq!(config.content.max_attempts, 5);
        assert_eq!(config.scheduler.daily_cron(), "0 0 9 * * *");
        assert_eq!(config.scheduler.timezone, Tz::UTC);
        assert_eq!(config.broadcast.batch_size, 10);
        assert_eq!(config.broadcast.batch_delay, Duration::from_secs(1));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.summarizer.api_key.expose_secret(), "sk-or-test");
    }

    #[test]
    fn sender_gets_scheme_and_sandbox_detected() {
        let config = TwilioConfig::from_lookup(&lookup(&required_pairs())).unwrap();
        assert_eq!(config.from_number, "whatsapp:+14155238886");
        assert!(config.is_sandbox());
        assert!(config.templates.daily_fact.is_none());
    }

    #[test]
    fn missing_required_key_reported() {
        let err = AppConfig::from_lookup(lookup(&[("TWILIO_ACCOUNT_SID", "AC123")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "TWILIO_AUTH_TOKEN"));
    }

    #[test]
    fn invalid_values_rejected() {
        let mut pairs = required_pairs();
        pairs.push(("SERVER_PORT", "not-a-port"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SERVER_PORT"));

        let mut pairs = required_pairs();
        pairs.push(("CONTENT_LANGUAGE", "fr"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = required_pairs();
        pairs.push(("SCHEDULER_FACT_GENERATION_HOUR", "24"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = required_pairs();
        pairs.push(("SCHEDULER_TIMEZONE", "Mars/Olympus"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn overrides_parsed() {
        let mut pairs = required_pairs();
        pairs.extend([
            ("ENV_ID", "production"),
            ("SCHEDULER_TIMEZONE", "Asia/Jerusalem"),
            ("SCHEDULER_FACT_GENERATION_HOUR", "7"),
            ("SCHEDULER_FACT_GENERATION_MINUTE", "30"),
            ("BROADCAST_BATCH_SIZE", "25"),
            ("TWILIO_DAILY_FACT_TEMPLATE_SID", "HX123"),
            ("CONTENT_LANGUAGE", "EN"),
        ]);
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.server.environment.is_production());
        assert_eq!(config.scheduler.timezone, chrono_tz::Asia::Jerusalem);
        assert_eq!(config.scheduler.daily_cron(), "0 30 7 * * *");
        assert_eq!(config.broadcast.batch_size, 25);
        assert_eq!(config.twilio.templates.daily_fact.as_deref(), Some("HX123"));
        assert_eq!(config.content.language, "en");
    }
}
