use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v21.0";

#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("WhatsApp credentials are not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Delivery failed: {status} - {body}")]
    Delivery { status: u16, body: String },
}

/// Outbound text delivery to a WhatsApp user.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), WhatsAppError>;
}

#[derive(Clone)]
struct Credentials {
    phone_number_id: String,
    access_token: String,
}

/// Graph API client for the business phone number's `messages` endpoint.
#[derive(Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    api_base_url: String,
    credentials: Option<Credentials>,
}

impl WhatsAppClient {
    pub fn new(
        api_base_url: String,
        phone_number_id: Option<String>,
        access_token: Option<String>,
    ) -> Self {
        let credentials = match (phone_number_id, access_token) {
            (Some(phone_number_id), Some(access_token))
                if !phone_number_id.trim().is_empty() && !access_token.trim().is_empty() =>
            {
                Some(Credentials {
                    phone_number_id,
                    access_token,
                })
            }
            _ => None,
        };

        Self {
            client: reqwest::Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.whatsapp_api_base_url.clone(),
            config.whatsapp_phone_number_id.clone(),
            config.whatsapp_access_token.clone(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), WhatsAppError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(WhatsAppError::NotConfigured)?;

        let request = SendTextRequest {
            messaging_product: "whatsapp",
            to,
            kind: "text",
            text: TextBody { body },
        };

        let response = self
            .client
            .post(format!(
                "{}/{}/messages",
                self.api_base_url, credentials.phone_number_id
            ))
            .bearer_auth(&credentials.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WhatsAppError::Delivery {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::debug!("Delivered WhatsApp message to {}", to);
        Ok(())
    }
}

#[derive(Serialize)]
struct SendTextRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
}

#[derive(Serialize)]
struct TextBody<'a> {
    body: &'a str,
}
