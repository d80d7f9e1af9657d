use crate::error::NotifyError;
use crate::NotificationChannel;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

const MAX_ATTEMPTS: u32 = 3;

/// HTTP webhook channel posting a small JSON payload per notification.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let payload = serde_json::json!({
            "subject": subject,
            "body": body,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.client.post(&self.url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    NotifyError::ApiError {
                        status: status.as_u16(),
                        body: resp.text().await.unwrap_or_default(),
                    }
                }
                Err(e) => NotifyError::from(e),
            };
            if attempt >= MAX_ATTEMPTS {
                return Err(error.into());
            }
            tracing::warn!(attempt, error = %error, "Webhook send failed, retrying");
            tokio::time::sleep(std::time::Duration::from_millis(
                100 * 2u64.pow(attempt - 1),
            ))
            .await;
        }
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
