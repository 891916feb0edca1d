//! Summarizers turn an article into a short daily fact.

pub mod openrouter;
pub mod validation;

use async_trait::async_trait;

pub use openrouter::OpenRouterSummarizer;
pub use validation::SummaryRules;

use crate::content::Article;
use crate::error::LlmError;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Provider/model label for logs.
    fn model_name(&self) -> &str;

    /// Produce a short blurb in `language`. The caller validates it.
    async fn summarize(&self, article: &Article, language: &str) -> Result<String, LlmError>;
}
