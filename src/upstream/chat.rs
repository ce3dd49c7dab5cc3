use crate::error::CastorError;
use axum::http::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;

const CHAT_URL: &str = "https://grok.com/rest/app-chat/conversations/new";

/// Minimal upstream reply surface: the final text plus the raw body for
/// callers that want more.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub raw: Value,
}

/// Thin client for the upstream conversation endpoint. Authentication is the
/// session cookie alone; the response is reduced to its final message text.
pub struct GrokChatClient {
    client: reqwest::Client,
}

impl GrokChatClient {
    pub fn new(timeout_secs: u64) -> Result<Self, CastorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    pub async fn complete(
        &self,
        sso_token: &str,
        model: &str,
        message: &str,
    ) -> Result<ChatReply, CastorError> {
        let body = json!({
            "modelName": model,
            "message": message,
            "disableSearch": false,
            "enableImageGeneration": true,
        });

        let response = self
            .client
            .post(CHAT_URL)
            .header("content-type", "application/json")
            .header("origin", "https://grok.com")
            .header("referer", "https://grok.com/")
            .header("cookie", format!("sso={sso_token}; sso-rw={sso_token}"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CastorError::UpstreamStatus(
                StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            ));
        }

        let raw: Value = response.json().await?;
        let content = extract_content(&raw);
        Ok(ChatReply { content, raw })
    }
}

/// Best-effort extraction of the assistant text from the upstream body.
fn extract_content(raw: &Value) -> String {
    for path in [
        &["modelResponse", "message"][..],
        &["result", "response", "modelResponse", "message"][..],
        &["message"][..],
    ] {
        let mut cursor = raw;
        let mut found = true;
        for key in path {
            match cursor.get(key) {
                Some(next) => cursor = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            if let Some(text) = cursor.as_str() {
                return text.to_string();
            }
        }
    }
    String::new()
}
