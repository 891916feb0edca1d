//! Wikipedia content source.
//!
//! Picks a random page through the REST summary endpoint, pulls the plain
//! text extract through the action API, and rejects candidates that make
//! a poor daily fact (disambiguation and meta pages, stubs, wrong script).

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::config::ContentConfig;
use crate::content::{Article, ContentSource};
use crate::error::ContentError;
use crate::retry::RetryPolicy;
use crate::script::Script;

const SOURCE_NAME: &str = "wikipedia";
const SUMMARY_MAX_CHARS: usize = 500;
const BODY_MAX_CHARS: usize = 2000;

// ── Suitability ─────────────────────────────────────────────────────

/// A title pattern that disqualifies a page.
#[derive(Debug, Clone)]
pub struct TitleRule {
    pub name: &'static str,
    pub regex: Regex,
}

/// Thresholds a candidate must meet.
#[derive(Debug, Clone)]
pub struct SuitabilityRules {
    pub min_summary_chars: usize,
    pub min_text_chars: usize,
    pub min_script_ratio: f64,
    pub script: Script,
    pub title_rules: Vec<TitleRule>,
}

impl SuitabilityRules {
    pub fn for_language(language: &str) -> Self {
        Self {
            min_summary_chars: 100,
            min_text_chars: 200,
            min_script_ratio: 0.3,
            script: Script::for_language(language),
            title_rules: default_title_rules(),
        }
    }

    /// `Err(reason)` when the candidate should be skipped.
    pub fn check(&self, title: &str, page_type: Option<&str>, summary: &str, text: &str) -> Result<(), String> {
        if page_type == Some("disambiguation") {
            return Err("disambiguation page".to_string());
        }
        if let Some(rule) = self.title_rules.iter().find(|r| r.regex.is_match(title)) {
            return Err(format!("{} page", rule.name));
        }
        let summary_len = summary.chars().count();
        if summary_len < self.min_summary_chars {
            return Err(format!("summary too short ({summary_len} chars)"));
        }
        let text_len = text.chars().count();
        if text_len < self.min_text_chars {
            return Err(format!("text too short ({text_len} chars)"));
        }
        let ratio = self.script.ratio(summary);
        if ratio < self.min_script_ratio {
            return Err(format!("script ratio {ratio:.2} below {:.2}", self.min_script_ratio));
        }
        Ok(())
    }
}

/// Disambiguation, namespace and list pages in English and Hebrew.
fn default_title_rules() -> Vec<TitleRule> {
    vec![
        TitleRule {
            name: "disambiguation",
            regex: Regex::new(r"(?i)\((disambiguation|פירושונים)\)|\bdisambig").unwrap(),
        },
        TitleRule {
            name: "meta",
            regex: Regex::new(
                r"(?i)^(wikipedia|category|template|file|help|portal|user|special|media|talk)( talk)?:",
            )
            .unwrap(),
        },
        TitleRule {
            name: "meta",
            regex: Regex::new(r"^(ויקיפדיה|קטגוריה|תבנית|קובץ|עזרה|פורטל|משתמש|שיחה):").unwrap(),
        },
        TitleRule {
            name: "list",
            regex: Regex::new(r"(?i)^lists? of\b|^רשימת ").unwrap(),
        },
    ]
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RandomSummary {
    title: String,
    #[serde(default)]
    extract: String,
    #[serde(rename = "type", default)]
    page_type: Option<String>,
    #[serde(default)]
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: PageUrl,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    query: Option<ExtractQuery>,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: std::collections::HashMap<String, ExtractPage>,
}

#[derive(Debug, Deserialize)]
struct ExtractPage {
    #[serde(default)]
    extract: Option<String>,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Source ──────────────────────────────────────────────────────────

pub struct WikipediaSource {
    client: reqwest::Client,
    base_url: String,
    rules: SuitabilityRules,
    retry: RetryPolicy,
}

impl WikipediaSource {
    pub fn new(config: &ContentConfig) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| ContentError::RequestFailed {
                source_name: SOURCE_NAME.into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.wikipedia.org", config.language));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rules: SuitabilityRules::for_language(&config.language),
            retry: RetryPolicy::content().with_max_attempts(config.max_attempts),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_failed(reason: impl std::fmt::Display) -> ContentError {
        ContentError::RequestFailed {
            source_name: SOURCE_NAME.into(),
            reason: reason.to_string(),
        }
    }

    async fn random_summary(&self) -> Result<RandomSummary, ContentError> {
        let response = self
            .client
            .get(format!("{}/api/rest_v1/page/random/summary", self.base_url))
            .send()
            .await
            .map_err(Self::request_failed)?;

        if !response.status().is_success() {
            return Err(Self::request_failed(format!("random summary returned {}", response.status())));
        }

        response.json().await.map_err(|e| ContentError::InvalidResponse {
            source_name: SOURCE_NAME.into(),
            reason: e.to_string(),
        })
    }

    async fn plain_text(&self, title: &str) -> Result<String, ContentError> {
        let response = self
            .client
            .get(format!("{}/w/api.php", self.base_url))
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
            ])
            .send()
            .await
            .map_err(Self::request_failed)?;

        if !response.status().is_success() {
            return Err(Self::request_failed(format!("extract returned {}", response.status())));
        }

        let parsed: ExtractResponse = response.json().await.map_err(|e| ContentError::InvalidResponse {
            source_name: SOURCE_NAME.into(),
            reason: e.to_string(),
        })?;

        Ok(parsed
            .query
            .and_then(|q| q.pages.into_values().find_map(|p| p.extract))
            .unwrap_or_default())
    }

    /// One candidate, checked against the suitability rules.
    async fn fetch_candidate(&self) -> Result<Article, ContentError> {
        let summary = self.random_summary().await?;
        let text = self.plain_text(&summary.title).await?;
        let text = if text.trim().is_empty() {
            summary.extract.clone()
        } else {
            text
        };

        if let Err(reason) = self
            .rules
            .check(&summary.title, summary.page_type.as_deref(), &summary.extract, &text)
        {
            tracing::debug!(title = %summary.title, reason = %reason, "Article not suitable");
            return Err(ContentError::Unsuitable {
                title: summary.title,
                reason,
            });
        }

        let url = summary
            .content_urls
            .map(|u| u.desktop.page)
            .unwrap_or_else(|| format!("{}/wiki/{}", self.base_url, summary.title.replace(' ', "_")));

        Ok(Article {
            url,
            summary: truncate_chars(&summary.extract, SUMMARY_MAX_CHARS),
            body: truncate_chars(&text, BODY_MAX_CHARS),
            title: summary.title,
        })
    }
}

#[async_trait]
impl ContentSource for WikipediaSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_article(&self) -> Result<Article, ContentError> {
        match self
            .retry
            .run("wikipedia_fetch", ContentError::is_retryable, || self.fetch_candidate())
            .await
        {
            Ok(article) => {
                tracing::info!(title = %article.title, "Random article fetched");
                Ok(article)
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(attempts = self.retry.max_attempts, error = %e, "No suitable article found");
                Err(ContentError::Exhausted {
                    attempts: self.retry.max_attempts,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::extract::State;
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;

    fn hebrew_summary() -> String {
        "ירושלים היא עיר הבירה של ישראל והעיר הגדולה ביותר בה. ".repeat(3)
    }

    fn rules() -> SuitabilityRules {
        SuitabilityRules::for_language("he")
    }

    #[test]
    fn accepts_long_hebrew_article() {
        let summary = hebrew_summary();
        let text = summary.repeat(3);
        assert!(rules().check("ירושלים", Some("standard"), &summary, &text).is_ok());
    }

    #[test]
    fn rejects_disambiguation_and_meta_pages() {
        let summary = hebrew_summary();
        let text = summary.repeat(3);
        assert!(rules().check("ירושלים", Some("disambiguation"), &summary, &text).is_err());
        assert!(rules().check("Mercury (disambiguation)", None, &summary, &text).is_err());
        assert!(rules().check("List of rivers", None, &summary, &text).is_err());
        assert!(rules().check("Category:Cities", None, &summary, &text).is_err());
        assert!(rules().check("מרקורי (פירושונים)", None, &summary, &text).is_err());
        assert!(rules().check("רשימת ערי ישראל", None, &summary, &text).is_err());
        assert!(rules().check("Listening", None, &summary, &text).is_ok());
    }

    #[test]
    fn rejects_short_or_wrong_script() {
        let summary = hebrew_summary();
        assert!(rules().check("x", None, "קצר", &summary.repeat(3)).is_err());
        assert!(rules().check("x", None, &summary, "קצר").is_err());
        let english = "Jerusalem is the capital of Israel and its largest city. ".repeat(3);
        assert!(rules().check("Jerusalem", None, &english, &english.repeat(3)).is_err());
    }

    /// Serves a disambiguation page first, then a good article.
    async fn mock_wikipedia() -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));

        async fn random(State(calls): State<Arc<AtomicUsize>>) -> Json<serde_json::Value> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Json(serde_json::json!({
                    "title": "מרקורי",
                    "type": "disambiguation",
                    "extract": "מרקורי עשוי להתייחס ל:",
                }))
            } else {
                Json(serde_json::json!({
                    "title": "ירושלים",
                    "type": "standard",
                    "extract": "ירושלים היא עיר הבירה של ישראל והעיר הגדולה ביותר בה. ".repeat(3),
                    "content_urls": {"desktop": {"page": "https://he.wikipedia.org/wiki/ירושלים"}},
                }))
            }
        }

        async fn extract() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "query": {"pages": {"1": {"extract": "ירושלים היא עיר עתיקה ובה אתרים רבים. ".repeat(10)}}}
            }))
        }

        let app = Router::new()
            .route("/api/rest_v1/page/random/summary", get(random))
            .route("/w/api.php", get(extract))
            .with_state(Arc::clone(&calls));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), calls)
    }

    fn config(base_url: &str, max_attempts: u32) -> ContentConfig {
        ContentConfig {
            language: "he".into(),
            user_agent: "WikiFactsBot/test".into(),
            timeout: Duration::from_secs(5),
            max_attempts,
            base_url: Some(base_url.into()),
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn skips_unsuitable_candidate() {
        let (base, calls) = mock_wikipedia().await;
        let source = WikipediaSource::new(&config(&base, 5)).unwrap().with_retry_policy(fast(5));

        let article = source.fetch_article().await.unwrap();
        assert_eq!(article.title, "ירושלים");
        assert_eq!(article.url, "https://he.wikipedia.org/wiki/ירושלים");
        assert!(article.body.chars().count() <= BODY_MAX_CHARS);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhaustion_is_reported() {
        let (base, _) = mock_wikipedia().await;
        let source = WikipediaSource::new(&config(&base, 1)).unwrap().with_retry_policy(fast(1));

        let err = source.fetch_article().await.unwrap_err();
        assert!(matches!(err, ContentError::Exhausted { attempts: 1 }));
    }
}
