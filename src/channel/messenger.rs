//! Outbound delivery back to the customer.

use async_trait::async_trait;
use serde_json::json;

use crate::error::{Error, Result};

/// Sends text to a customer over the chat channel.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<()>;
}

/// WhatsApp Cloud API messenger.
pub struct WhatsAppMessenger {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl WhatsAppMessenger {
    pub fn new(api_url: impl Into<String>, phone_number_id: &str, access_token: impl Into<String>) -> Self {
        let api_url = format!("{}/{}/messages", api_url.into().trim_end_matches('/'), phone_number_id);
        Self {
            client: reqwest::Client::new(),
            api_url,
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl Messenger for WhatsAppMessenger {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("whatsapp send: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "whatsapp send failed ({}): {}",
                status, detail
            )));
        }

        tracing::debug!("Delivered outbound message to {}", to);
        Ok(())
    }
}

/// Logs outbound messages instead of delivering them. Used in development
/// and tests, where no channel credentials exist.
#[derive(Default)]
pub struct ConsoleMessenger;

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        tracing::info!("[outbound -> {}] {}", to, body);
        Ok(())
    }
}
