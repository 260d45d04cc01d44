use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::error::FetchError;
use crate::models::Article;
use crate::traits::Fetcher;

pub const DEFAULT_BASE_URL: &str = "http://site.api.espn.com";
pub const DEFAULT_LEAGUES: &[&str] = &["eng.1", "esp.1", "ger.1", "ita.1"];

/// Display name for a soccer league code.
pub fn league_name(code: &str) -> String {
    match code {
        "eng.1" => "Premier League",
        "esp.1" => "La Liga",
        "ger.1" => "Bundesliga",
        "ita.1" => "Serie A",
        "fra.1" => "Ligue 1",
        "uefa.champions" => "Champions League",
        "uefa.europa" => "Europa League",
        other => other,
    }
    .to_string()
}

#[derive(Debug, Clone)]
pub struct EspnConfig {
    pub base_url: String,
    pub source_label: String,
}

impl Default for EspnConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            source_label: "ESPN".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    articles: Vec<EspnArticle>,
}

#[derive(Debug, Deserialize)]
struct EspnArticle {
    id: Option<serde_json::Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    headline: Option<String>,
    description: Option<String>,
    published: Option<String>,
    #[serde(default)]
    images: Vec<EspnImage>,
    links: Option<EspnLinks>,
}

#[derive(Debug, Deserialize)]
struct EspnImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EspnLinks {
    web: Option<EspnHref>,
}

#[derive(Debug, Deserialize)]
struct EspnHref {
    href: Option<String>,
}

pub struct EspnClient {
    client: Client,
    config: EspnConfig,
}

impl EspnClient {
    pub fn new(config: EspnConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn news_url(&self, league: &str) -> String {
        format!(
            "{}/apis/site/v2/sports/soccer/{}/news",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(league)
        )
    }

    /// Map the raw feed into articles. Entries without an id are dropped.
    fn parse_news(&self, body: &str, league: &str) -> Result<Vec<Article>, FetchError> {
        let response: NewsResponse = serde_json::from_str(body)?;
        let category_name = league_name(league);

        let articles = response
            .articles
            .into_iter()
            .filter_map(|raw| {
                let id = match raw.id? {
                    serde_json::Value::String(s) if !s.is_empty() => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };

                let published_at = raw
                    .published
                    .as_deref()
                    .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default();

                Some(Article {
                    id,
                    headline: raw.headline.unwrap_or_default(),
                    body: raw.description.unwrap_or_default(),
                    image_url: raw.images.into_iter().find_map(|img| img.url),
                    link: raw.links.and_then(|l| l.web).and_then(|w| w.href),
                    is_video: raw.kind.as_deref() == Some("Media"),
                    published_at,
                    source: self.config.source_label.clone(),
                    category: league.to_string(),
                    category_name: category_name.clone(),
                })
            })
            .collect();

        Ok(articles)
    }
}

#[async_trait]
impl Fetcher for EspnClient {
    async fn fetch(&self, category: &str) -> Result<Vec<Article>, FetchError> {
        let response = self.client.get(self.news_url(category)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        self.parse_news(&body, category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "header": "Premier League News",
        "articles": [
            {
                "id": 44012345,
                "type": "HeadlineNews",
                "headline": "Salah scores twice",
                "description": "Liverpool win at Anfield.",
                "published": "2025-03-01T18:45:00Z",
                "images": [{"url": "https://a.espncdn.com/photo/1.jpg"}],
                "links": {"web": {"href": "https://www.espn.com/soccer/story/_/id/44012345"}}
            },
            {
                "id": 44012399,
                "type": "Media",
                "headline": "Highlights",
                "description": "Watch all the goals.",
                "published": "2025-03-01T19:00:00Z"
            },
            {
                "id": "abc-7",
                "headline": "No date on this one",
                "images": []
            },
            {
                "headline": "Missing id"
            }
        ]
    }"#;

    fn client() -> EspnClient {
        EspnClient::new(EspnConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_maps_fields() {
        let articles = client().parse_news(SAMPLE, "eng.1").unwrap();
        assert_eq!(articles.len(), 3);

        let first = &articles[0];
        assert_eq!(first.id, "44012345");
        assert_eq!(first.headline, "Salah scores twice");
        assert_eq!(first.body, "Liverpool win at Anfield.");
        assert_eq!(
            first.image_url.as_deref(),
            Some("https://a.espncdn.com/photo/1.jpg")
        );
        assert_eq!(
            first.link.as_deref(),
            Some("https://www.espn.com/soccer/story/_/id/44012345")
        );
        assert!(!first.is_video);
        assert_eq!(first.category_name, "Premier League");
        assert_eq!(first.source, "ESPN");
    }

    #[test]
    fn test_parse_flags_media_as_video() {
        let articles = client().parse_news(SAMPLE, "eng.1").unwrap();
        assert!(articles[1].is_video);
    }

    #[test]
    fn test_parse_missing_date_sorts_oldest() {
        let articles = client().parse_news(SAMPLE, "eng.1").unwrap();
        let undated = &articles[2];
        assert_eq!(undated.id, "abc-7");
        assert_eq!(undated.published_at, DateTime::<Utc>::default());
        assert!(undated.image_url.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = client().parse_news("<html>", "eng.1").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_news_url() {
        let client = EspnClient::new(EspnConfig {
            base_url: "http://localhost:9000/".to_string(),
            source_label: "ESPN".to_string(),
        })
        .unwrap();
        assert_eq!(
            client.news_url("ger.1"),
            "http://localhost:9000/apis/site/v2/sports/soccer/ger.1/news"
        );
    }

    #[test]
    fn test_league_names() {
        assert_eq!(league_name("ita.1"), "Serie A");
        assert_eq!(league_name("ned.1"), "ned.1");
    }
}
