//! WhatsApp Gateway Channel
//!
//! Sends through an HTTP WhatsApp gateway instance (Evolution-style API):
//! `POST {base}/message/sendText/{instance}` for text and
//! `POST {base}/message/sendMedia/{instance}` with base64 media. Auth is the
//! instance `apikey` header.

use crate::config::WhatsAppConfig;
use crate::dispatch::{MediaItem, MessagingChannel};
use crate::error::ChannelError;
use crate::utils::{mask_phone, normalize_phone, truncate_str};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Provider error bodies are cut to this many bytes before being recorded
const MAX_ERROR_BODY: usize = 300;

#[derive(Clone)]
pub struct WhatsAppChannel {
    client: Client,
    base_url: String,
    instance: String,
    api_key: String,
}

#[derive(Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMediaRequest<'a> {
    number: &'a str,
    mediatype: &'static str,
    mimetype: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
    media: String,
    file_name: &'a str,
}

impl WhatsAppChannel {
    pub fn new(
        base_url: impl Into<String>,
        instance: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_client(client, base_url, instance, api_key))
    }

    /// Create with a custom HTTP client
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        instance: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            instance: instance.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            anyhow::bail!("whatsapp.base_url is not set");
        }
        if config.instance.trim().is_empty() {
            anyhow::bail!("whatsapp.instance is not set");
        }
        let api_key = config
            .api_key
            .clone()
            .context("whatsapp.api_key is not set (or WACRM_WHATSAPP_API_KEY)")?;
        Self::new(
            &config.base_url,
            &config.instance,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/message/{}/{}", self.base_url, action, self.instance)
    }

    async fn post<T: Serialize>(&self, action: &str, body: &T) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(self.endpoint(action))
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body: truncate_str(body.trim(), MAX_ERROR_BODY).to_string(),
            });
        }
        Ok(())
    }
}

fn classify_transport_error(e: reqwest::Error) -> ChannelError {
    if e.is_connect() {
        ChannelError::Unavailable(e.to_string())
    } else if e.is_timeout() {
        ChannelError::Transport(format!("request timed out: {e}"))
    } else {
        ChannelError::Transport(e.to_string())
    }
}

fn destination_number(destination: &str) -> Result<String, ChannelError> {
    normalize_phone(destination)
        .ok_or_else(|| ChannelError::InvalidDestination(destination.to_string()))
}

/// Gateway media kind for a MIME type.
pub fn media_kind(mime_type: &str) -> &'static str {
    match mime_type.split('/').next().unwrap_or_default() {
        "image" => "image",
        "video" => "video",
        "audio" => "audio",
        _ => "document",
    }
}

#[async_trait]
impl MessagingChannel for WhatsAppChannel {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError> {
        let number = destination_number(destination)?;
        self.post(
            "sendText",
            &SendTextRequest {
                number: &number,
                text: body,
            },
        )
        .await?;
        tracing::debug!("WhatsApp: text sent to {}", mask_phone(&number));
        Ok(())
    }

    async fn send_media(
        &self,
        destination: &str,
        media: &MediaItem,
        caption: Option<String>,
    ) -> Result<(), ChannelError> {
        let number = destination_number(destination)?;
        let request = SendMediaRequest {
            number: &number,
            mediatype: media_kind(&media.mime_type),
            mimetype: &media.mime_type,
            caption,
            media: base64::engine::general_purpose::STANDARD.encode(&media.data),
            file_name: &media.file_name,
        };
        self.post("sendMedia", &request).await?;
        tracing::debug!(
            "WhatsApp: {} ({} bytes) sent to {}",
            media.file_name,
            media.data.len(),
            mask_phone(&number)
        );
        Ok(())
    }
}
