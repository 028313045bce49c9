//! Webhook payloads and the HTTP client that posts them.
//!
//! Delivery is at-most-once: a failed POST is logged and dropped.

use std::time::Duration;

use {
    reqwest::Client,
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{
    classifier::QualifiedMessage,
    error::{Error, Result},
    media::StoredMediaFile,
};

/// Image notification body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagePayload {
    pub image_base64: String,
    pub image_filename: String,
    pub sender_jid: String,
    pub message_id: String,
    pub group_name: String,
    pub sent_at: String,
}

/// Placeholder body for documents the downstream service does not OCR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipOcrPayload {
    pub skip_ocr: bool,
    pub file_type: &'static str,
    pub sender_jid: String,
    pub message_id: String,
    pub group_name: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DeliveryPayload {
    Image(ImagePayload),
    SkipOcr(SkipOcrPayload),
}

impl DeliveryPayload {
    pub fn image(message: &QualifiedMessage, file: &StoredMediaFile) -> Self {
        Self::Image(ImagePayload {
            image_base64: file.base64.clone(),
            image_filename: file.filename.clone(),
            sender_jid: message.event.sender_jid().to_string(),
            message_id: message.event.id.clone(),
            group_name: message.group_name.clone(),
            sent_at: message.event.sent_at(),
        })
    }

    pub fn skip_pdf(message: &QualifiedMessage) -> Self {
        Self::SkipOcr(SkipOcrPayload {
            skip_ocr: true,
            file_type: "PDF",
            sender_jid: message.event.sender_jid().to_string(),
            message_id: message.event.id.clone(),
            group_name: message.group_name.clone(),
            sent_at: message.event.sent_at(),
        })
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::Image(p) => &p.message_id,
            Self::SkipOcr(p) => &p.message_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::SkipOcr(_) => "skip_ocr",
        }
    }
}

/// Posts payloads to the configured webhook.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: Client,
    url: String,
}

impl DeliveryClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Message(format!("failed to build webhook HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `payload` as JSON; any transport error or non-2xx is an error.
    pub async fn post(&self, payload: &DeliveryPayload) -> Result<()> {
        self.client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::delivery(&self.url, e))?;
        Ok(())
    }

    /// POST and swallow failures. Returns whether the webhook accepted it.
    pub async fn deliver(&self, payload: &DeliveryPayload) -> bool {
        match self.post(payload).await {
            Ok(()) => {
                info!(
                    message_id = payload.message_id(),
                    kind = payload.kind(),
                    "delivered to webhook"
                );
                true
            },
            Err(e) => {
                warn!(
                    message_id = payload.message_id(),
                    kind = payload.kind(),
                    error = %e,
                    "webhook delivery failed, dropping"
                );
                false
            },
        }
    }
}
