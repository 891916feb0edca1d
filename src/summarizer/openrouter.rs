//! OpenAI-compatible chat completions client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::SummarizerConfig;
use crate::content::Article;
use crate::error::LlmError;
use crate::summarizer::Summarizer;

const PROVIDER: &str = "openrouter";
const CONTENT_MAX_CHARS: usize = 1500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct OpenRouterSummarizer {
    client: reqwest::Client,
    config: SummarizerConfig,
}

impl OpenRouterSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

/// System prompt for the target language.
pub fn system_prompt(language: &str) -> &'static str {
    if language == "he" {
        "אתה כותב עובדות יומיות מעניינות ומרתקות מויקיפדיה בעברית. \
         המטרה שלך היא ליצור עובדה קצרה (2-3 משפטים) שתעורר עניין ותהיה קלה לזכירה. \
         השתמש בשפה פשוטה וברורה, וודא שהעובדה מרתקת ומעניינת לקורא הממוצע."
    } else {
        "You write engaging daily facts based on Wikipedia articles. \
         Produce a short fact (2-3 sentences) that sparks curiosity and is easy to remember. \
         Use plain, clear language and stay accurate to the source."
    }
}

/// User prompt: title plus the first part of the article body.
pub fn user_prompt(article: &Article, language: &str) -> String {
    let source = if article.body.trim().is_empty() {
        &article.summary
    } else {
        &article.body
    };
    let content: String = source.chars().take(CONTENT_MAX_CHARS).collect();

    if language == "he" {
        format!(
            "הכותרת: {}\n\nהתוכן:\n{}\n\n\
             אנא צור עובדה יומית מעניינת בהתבסס על המידע הזה. העובדה צריכה להיות:\n\
             - באורך של 2-3 משפטים\n\
             - כתובה בעברית פשוטה וברורה\n\
             - מדויקת למידע שסופק\n\n\
             העובדה היומית:",
            article.title, content
        )
    } else {
        format!(
            "Title: {}\n\nContent:\n{}\n\n\
             Write one interesting daily fact based on this information. The fact must be:\n\
             - 2-3 sentences long\n\
             - written in plain, clear English\n\
             - accurate to the content provided\n\n\
             Daily fact:",
            article.title, content
        )
    }
}

#[async_trait]
impl Summarizer for OpenRouterSummarizer {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn summarize(&self, article: &Article, language: &str) -> Result<String, LlmError> {
        if article.body.trim().is_empty() && article.summary.trim().is_empty() {
            return Err(LlmError::EmptyInput {
                title: article.title.clone(),
            });
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system_prompt(language).into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user_prompt(article, language),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: 0.9,
            frequency_penalty: 0.1,
            presence_penalty: 0.1,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.into(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.into(),
                retry_after,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("{status}: {text}"),
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "no completion choices".into(),
            })?;

        tracing::debug!(title = %article.title, model = %self.config.model, chars = text.chars().count(), "Summary generated");
        Ok(text)
    }
}
