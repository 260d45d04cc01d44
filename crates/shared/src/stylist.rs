use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::error::TransformError;
use crate::models::StyledContent;
use crate::traits::Transformer;

pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

const MAX_BODY_BYTES: usize = 10_000;

#[derive(Debug, Clone)]
pub struct StylistConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub endpoint: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct StyledPayload {
    headline_th: String,
    body_th_styled: String,
}

/// Translates and restyles articles through OpenRouter.
///
/// Keys are tried in order; a key that is rejected or rate limited hands
/// over to the next one for the rest of the run.
pub struct OpenRouterStylist {
    client: Client,
    config: StylistConfig,
    current_key: AtomicUsize,
}

impl OpenRouterStylist {
    pub fn new(config: StylistConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            config,
            current_key: AtomicUsize::new(0),
        })
    }

    pub fn current_key_index(&self) -> usize {
        self.current_key.load(Ordering::Relaxed)
    }

    async fn try_style(
        &self,
        api_key: &str,
        headline: &str,
        body: &str,
    ) -> Result<StyledContent, TransformError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: build_prompt(headline, body),
            }],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(TransformError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| TransformError::Content(format!("unexpected response shape: {}", e)))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");

        parse_styled(content)
    }
}

#[async_trait]
impl Transformer for OpenRouterStylist {
    async fn transform(&self, headline: &str, body: &str) -> Result<StyledContent, TransformError> {
        let key_count = self.config.api_keys.len();
        if key_count == 0 {
            return Err(TransformError::MissingCredentials);
        }

        let body = truncate_utf8(body, MAX_BODY_BYTES);
        let mut last_error = TransformError::MissingCredentials;

        while self.current_key_index() < key_count {
            let index = self.current_key_index();
            let api_key = &self.config.api_keys[index];

            match self.try_style(api_key, headline, body).await {
                Ok(styled) => {
                    info!(key_index = index, "Styled article with OpenRouter");
                    return Ok(styled);
                }
                Err(e) if should_rotate(&e) && index + 1 < key_count => {
                    warn!(key_index = index, error = %e, "Rewrite key unusable; switching to next key");
                    let _ = self.current_key.compare_exchange(
                        index,
                        index + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    fn start_run(&self) {
        self.current_key.store(0, Ordering::Relaxed);
    }
}

/// Rejected, out of credit, or rate limited.
fn should_rotate(error: &TransformError) -> bool {
    matches!(
        error,
        TransformError::Api {
            status: 401 | 402 | 403 | 429,
            ..
        }
    )
}

fn build_prompt(headline: &str, body: &str) -> String {
    format!(
        r#"Act as a friendly and funny Thai football blogger. Your goal is to take a news article and make it exciting for Thai football fans.
Here is the article: Headline: "{}" Body: {}
Please perform the following tasks:
1. Translate the entire article (headline and body) into Thai.
2. Rewrite the translated article in a fun, engaging, and informal style.
3. Structure your response as a JSON object with two keys: "headline_th" and "body_th_styled".
Respond with the JSON object only."#,
        headline, body
    )
}

/// Truncate to at most `max` bytes without splitting a character.
fn truncate_utf8(content: &str, max: usize) -> &str {
    if content.len() <= max {
        return content;
    }
    let mut end = max;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// Read the model's JSON answer, tolerating a markdown code fence around it.
fn parse_styled(content: &str) -> Result<StyledContent, TransformError> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    let payload: StyledPayload = serde_json::from_str(json).map_err(|e| {
        TransformError::Content(format!("model did not return the expected JSON: {}", e))
    })?;

    if payload.headline_th.trim().is_empty() || payload.body_th_styled.trim().is_empty() {
        return Err(TransformError::Content(
            "model returned an empty headline or body".to_string(),
        ));
    }

    Ok(StyledContent {
        headline: payload.headline_th.trim().to_string(),
        body: payload.body_th_styled.trim().to_string(),
    })
}
