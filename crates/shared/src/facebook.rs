use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::PublishError;
use crate::models::{Article, StyledContent};
use crate::traits::Publisher;

pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v19.0";

/// "Thanks for the news photo from"
const CREDIT_LABEL: &str = "ขอขอบคุณภาพข่าวจาก";
/// "News link"
const LINK_LABEL: &str = "ลิงค์ข่าว";

/// Graph API error code for an invalid or expired access token.
const OAUTH_EXCEPTION: i64 = 190;

#[derive(Debug, Clone)]
pub struct FacebookConfig {
    pub page_id: String,
    pub access_token: String,
    pub graph_url: String,
}

#[derive(Serialize)]
struct PhotoRequest<'a> {
    url: &'a str,
    caption: &'a str,
    access_token: &'a str,
}

#[derive(Serialize)]
struct FeedRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<&'a str>,
    access_token: &'a str,
}

#[derive(Deserialize)]
struct PostResponse {
    id: Option<String>,
    post_id: Option<String>,
}

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: i64,
}

pub struct FacebookPublisher {
    client: Client,
    config: FacebookConfig,
}

impl FacebookPublisher {
    pub fn new(config: FacebookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, edge: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.graph_url.trim_end_matches('/'),
            self.config.page_id,
            edge
        )
    }
}

#[async_trait]
impl Publisher for FacebookPublisher {
    async fn publish(
        &self,
        styled: &StyledContent,
        article: &Article,
    ) -> Result<String, PublishError> {
        let message = compose_message(styled, article);

        // Photo posts let the Graph API pull the image itself
        let request = match article.image_url.as_deref() {
            Some(image_url) => self.client.post(self.endpoint("photos")).json(&PhotoRequest {
                url: image_url,
                caption: &message,
                access_token: &self.config.access_token,
            }),
            None => self.client.post(self.endpoint("feed")).json(&FeedRequest {
                message: &message,
                link: article.link.as_deref(),
                access_token: &self.config.access_token,
            }),
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(classify_failure(status, &body));
        }

        let posted: PostResponse = serde_json::from_str(&body).map_err(|e| {
            PublishError::Transient(format!("unreadable Graph API response: {}", e))
        })?;

        posted
            .post_id
            .or(posted.id)
            .ok_or_else(|| PublishError::Transient("Graph API returned no post id".to_string()))
    }
}

/// Styled text plus the source credit and link footer.
pub fn compose_message(styled: &StyledContent, article: &Article) -> String {
    let mut message = format!(
        "{}\n\n{}\n\n---\n{} : {}",
        styled.headline, styled.body, CREDIT_LABEL, article.source
    );
    if let Some(link) = &article.link {
        message.push_str(&format!("\n{} : {}", LINK_LABEL, link));
    }
    message
}

fn classify_failure(status: u16, body: &str) -> PublishError {
    let graph = serde_json::from_str::<GraphErrorEnvelope>(body).ok();
    let message = graph
        .as_ref()
        .map(|g| g.error.message.clone())
        .unwrap_or_else(|| body.to_string());
    let code = graph.map(|g| g.error.code).unwrap_or_default();

    match status {
        401 | 403 => PublishError::Auth(message),
        _ if code == OAUTH_EXCEPTION => PublishError::Auth(message),
        429 | 500..=599 => PublishError::Transient(message),
        _ => PublishError::Rejected { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::article;

    fn styled() -> StyledContent {
        StyledContent {
            headline: "หัวข้อ".to_string(),
            body: "เนื้อหา".to_string(),
        }
    }

    #[test]
    fn test_message_has_credit_and_link() {
        let message = compose_message(&styled(), &article("a1", 0));
        assert_eq!(
            message,
            "หัวข้อ\n\nเนื้อหา\n\n---\nขอขอบคุณภาพข่าวจาก : ESPN\nลิงค์ข่าว : https://news.example.com/story/a1"
        );
    }

    #[test]
    fn test_message_without_link() {
        let mut a = article("a1", 0);
        a.link = None;
        let message = compose_message(&styled(), &a);
        assert!(message.ends_with("ขอขอบคุณภาพข่าวจาก : ESPN"));
    }

    #[test]
    fn test_expired_token_is_auth_error() {
        let body = r#"{"error": {"message": "Session has expired", "type": "OAuthException", "code": 190}}"#;
        assert!(matches!(classify_failure(400, body), PublishError::Auth(m) if m == "Session has expired"));
        assert!(matches!(classify_failure(403, "nope"), PublishError::Auth(_)));
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(matches!(classify_failure(503, "busy"), PublishError::Transient(_)));
        assert!(matches!(classify_failure(429, "{}"), PublishError::Transient(_)));
    }

    #[test]
    fn test_bad_request_is_rejected() {
        let body = r#"{"error": {"message": "Invalid image URL", "code": 324}}"#;
        match classify_failure(400, body) {
            PublishError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid image URL");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_endpoint() {
        let publisher = FacebookPublisher::new(FacebookConfig {
            page_id: "12345".to_string(),
            access_token: "token".to_string(),
            graph_url: "https://graph.facebook.com/v19.0/".to_string(),
        })
        .unwrap();
        assert_eq!(
            publisher.endpoint("photos"),
            "https://graph.facebook.com/v19.0/12345/photos"
        );
    }
}
