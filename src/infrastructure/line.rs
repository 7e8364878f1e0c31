use crate::domain::ports::Notifier;
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use serde::Serialize;

pub const DEFAULT_LINE_API_URL: &str = "https://api.line.me";

#[derive(Serialize)]
struct TextMessage<'a> {
    r#type: &'static str,
    text: &'a str,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: [TextMessage<'a>; 1],
}

/// Pushes plain-text messages through the LINE Messaging API.
#[derive(Clone)]
pub struct LinePushNotifier {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl LinePushNotifier {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl Notifier for LinePushNotifier {
    async fn push(&self, user_id: &str, text: &str) -> Result<()> {
        if user_id.is_empty() {
            return Err(NotifyError::Validation("Push target is empty".to_string()));
        }
        let body = PushRequest {
            to: user_id,
            messages: [TextMessage {
                r#type: "text",
                text,
            }],
        };
        let response = self
            .client
            .post(format!("{}/v2/bot/message/push", self.api_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Gateway(format!(
                "LINE push failed with HTTP {}: {}",
                status, detail
            )));
        }
        tracing::debug!(user_id, "LINE push delivered");
        Ok(())
    }
}
