use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::traits::BodyExtractor;

/// Containers tried in order before falling back to the whole page.
const CONTENT_SELECTORS: &[&str] = &["div.article-body", "div.story-body", "article"];

pub struct ContentExtractor {
    client: Client,
}

impl ContentExtractor {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; SportsPoster/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub async fn fetch_article_content(&self, url: &str) -> Result<Option<String>> {
        for attempt in 0..3 {
            match self.try_fetch_article(url).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    if attempt == 2 {
                        warn!(url, error = %format!("{:#}", e), "Giving up on article page");
                        return Err(e);
                    }
                    let backoff = std::time::Duration::from_millis(500 * (2_u64.pow(attempt)));
                    debug!(url, attempt, ?backoff, "Retrying article page");
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Ok(None)
    }

    async fn try_fetch_article(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        if status == 401 || status == 403 || status == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        let html = response.text().await.context("Failed to read response body")?;

        Ok(extract_paragraphs(&html))
    }
}

#[async_trait]
impl BodyExtractor for ContentExtractor {
    async fn extract(&self, url: &str) -> Result<Option<String>> {
        self.fetch_article_content(url).await
    }
}

/// Join the non-empty paragraphs of the story container with blank lines.
pub fn extract_paragraphs(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let paragraph = Selector::parse("p").ok()?;

    let container = CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| document.select(&selector).next())
        .or_else(|| {
            let body = Selector::parse("body").ok()?;
            document.select(&body).next()
        })?;

    let paragraphs: Vec<String> = container
        .select(&paragraph)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();

    if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs.join("\n\n"))
    }
}
