//! Wire protocol between the gateway and the Baileys sidecar, and the
//! boundary parser that turns raw Baileys envelopes into the strict
//! [`InboundMessageEvent`] model.

use std::path::PathBuf;

use {
    mediarelay_common::{
        Attachment, ConnectionState, ConnectionUpdate, ConversationKind, InboundMessageEvent,
        MediaHandle,
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Baileys `DisconnectReason.loggedOut`.
pub const STATUS_LOGGED_OUT: u16 = 401;

/// Suffix of group conversation JIDs.
const GROUP_JID_SUFFIX: &str = "@g.us";

/// Envelope wrappers Baileys nests the real content inside.
const WRAPPER_KEYS: &[&str] = &[
    "ephemeralMessage",
    "viewOnceMessage",
    "viewOnceMessageV2",
    "documentWithCaptionMessage",
];

/// Messages sent from the gateway to the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Start (or restart) the Baileys socket using credentials in `auth_dir`.
    Login {
        auth_dir: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        credentials: Option<Value>,
    },
    GroupMetadata {
        request_id: String,
        jid: String,
    },
    /// Download an attachment. `reupload` lets the sidecar ask the sender's
    /// phone to re-upload expired media.
    DownloadMedia {
        request_id: String,
        message: Value,
        reupload: bool,
    },
    Logout,
}

/// Messages sent from the sidecar to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    /// Mirrors Baileys `connection.update`.
    Connection {
        #[serde(default)]
        connection: Option<String>,
        #[serde(default)]
        qr: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    CredsUpdate {
        creds: Value,
    },
    /// Mirrors Baileys `messages.upsert`.
    MessagesUpsert {
        messages: Vec<Value>,
        #[serde(default)]
        upsert_type: Option<String>,
    },
    GroupMetadataResult {
        request_id: String,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    DownloadMediaResult {
        request_id: String,
        /// Attachment bytes, base64-encoded.
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        request_id: Option<String>,
        error: String,
    },
}

impl SidecarMessage {
    /// Correlation id when this message answers a gateway request.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::GroupMetadataResult { request_id, .. }
            | Self::DownloadMediaResult { request_id, .. } => Some(request_id),
            Self::Error { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

/// Translate a sidecar `connection` message into a [`ConnectionUpdate`].
pub fn connection_update(
    connection: Option<&str>,
    qr: Option<String>,
    status_code: Option<u16>,
    reason: Option<String>,
) -> ConnectionUpdate {
    let state = match connection {
        Some("connecting") => Some(ConnectionState::Connecting),
        Some("open") => Some(ConnectionState::Open),
        Some("close") => Some(ConnectionState::Closed {
            reason: reason.unwrap_or_else(|| match status_code {
                Some(code) => format!("status {code}"),
                None => "unknown".to_string(),
            }),
            is_logged_out: status_code == Some(STATUS_LOGGED_OUT),
        }),
        _ => None,
    };
    ConnectionUpdate {
        state,
        qr: qr.filter(|q| !q.is_empty()),
    }
}

/// Parse one Baileys `WAMessage` envelope.
///
/// Returns `None` when the envelope lacks the key fields every message has;
/// such shapes are not messages and are dropped at the boundary.
pub fn parse_envelope(raw: &Value) -> Option<InboundMessageEvent> {
    let key = raw.get("key")?;
    let id = key.get("id")?.as_str()?.to_string();
    let conversation_id = key.get("remoteJid")?.as_str()?.to_string();
    let is_self_sent = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);

    let conversation_kind = if conversation_id.ends_with(GROUP_JID_SUFFIX) {
        ConversationKind::Group
    } else {
        ConversationKind::Direct
    };
    let participant_id = match conversation_kind {
        ConversationKind::Group => key
            .get("participant")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        ConversationKind::Direct => None,
    };

    let content = raw.get("message").filter(|m| m.is_object());
    let attachment = content.map_or(Attachment::None, classify_content);

    let sender_id = participant_id
        .clone()
        .unwrap_or_else(|| conversation_id.clone());

    Some(InboundMessageEvent {
        id,
        sender_id,
        conversation_id,
        conversation_kind,
        participant_id,
        timestamp: raw.get("messageTimestamp").map_or(0, parse_timestamp),
        attachment,
        is_self_sent,
        has_content: content.is_some(),
        media: MediaHandle(raw.clone()),
    })
}

fn classify_content(content: &Value) -> Attachment {
    let content = unwrap_content(content);

    if let Some(image) = content.get("imageMessage") {
        return Attachment::Image {
            mime_hint: mime_of(image),
        };
    }

    if let Some(document) = content.get("documentMessage")
        && let Some(mime) = mime_of(document)
        && mime.eq_ignore_ascii_case("application/pdf")
    {
        return Attachment::PdfDocument { mime_type: mime };
    }

    Attachment::Other
}

fn unwrap_content(mut content: &Value) -> &Value {
    // Wrappers can nest (an ephemeral view-once message).
    for _ in 0..WRAPPER_KEYS.len() {
        let inner = WRAPPER_KEYS
            .iter()
            .find_map(|k| content.get(*k).and_then(|w| w.get("message")))
            .filter(|m| m.is_object());
        match inner {
            Some(inner) => content = inner,
            None => break,
        }
    }
    content
}

fn mime_of(media: &Value) -> Option<String> {
    media
        .get("mimetype")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `messageTimestamp` arrives as a number, a numeric string, or a protobuf
/// `Long` object (`{low, high, unsigned}`).
fn parse_timestamp(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        Value::Object(long) => {
            let low = long.get("low").and_then(Value::as_i64).unwrap_or(0);
            let high = long.get("high").and_then(Value::as_i64).unwrap_or(0);
            (high << 32) | (low & 0xFFFF_FFFF)
        },
        _ => 0,
    }
}
