//! Seams between the pipeline and the services it talks to.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{FetchError, PublishError, TransformError};
use crate::models::{Article, StyledContent};

/// Lists candidate articles for one league or category.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, category: &str) -> Result<Vec<Article>, FetchError>;
}

/// Pulls the full story text for an article link.
///
/// `Ok(None)` means the page had nothing usable; the pipeline then keeps the
/// summary body it already has.
#[async_trait]
pub trait BodyExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<Option<String>>;
}

/// Rewrites an article into the page's voice.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, headline: &str, body: &str) -> Result<StyledContent, TransformError>;

    /// Called once before the first article of every run.
    fn start_run(&self) {}
}

/// Posts styled content to the page and returns the new post id.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        styled: &StyledContent,
        article: &Article,
    ) -> Result<String, PublishError>;
}
