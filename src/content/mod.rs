//! Content sources: where the daily article comes from.

pub mod wikipedia;

use async_trait::async_trait;
use serde::Serialize;

pub use wikipedia::{SuitabilityRules, WikipediaSource};

use crate::error::ContentError;

/// A candidate article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    /// Lead section, plain text.
    pub summary: String,
    /// Longer plain-text body used for summarization.
    pub body: String,
}

/// Supplies one suitable article per call.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a random suitable article, retrying internally as needed.
    async fn fetch_article(&self) -> Result<Article, ContentError>;
}
