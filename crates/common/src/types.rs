use {
    chrono::{DateTime, SecondsFormat, Utc},
    serde::{Deserialize, Serialize},
};

/// Whether a message came from a one-to-one chat or a multi-party chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// The media or document object carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    None,
    Image { mime_hint: Option<String> },
    PdfDocument { mime_type: String },
    Other,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// Opaque reference a session needs to download an attachment again.
///
/// For the Baileys sidecar this is the raw message envelope, handed back
/// unchanged on `download_media`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaHandle(pub serde_json::Value);

/// Immutable snapshot of one inbound message, parsed at the session boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessageEvent {
    pub id: String,
    pub conversation_id: String,
    pub conversation_kind: ConversationKind,
    pub sender_id: String,
    /// Set only for group messages: the member who posted it.
    pub participant_id: Option<String>,
    /// Seconds since the Unix epoch, as reported by the platform.
    pub timestamp: i64,
    pub attachment: Attachment,
    pub is_self_sent: bool,
    /// False when the envelope carried no message body at all (protocol
    /// stubs, deletions, receipts).
    pub has_content: bool,
    pub media: MediaHandle,
}

impl InboundMessageEvent {
    /// JID reported to the webhook: the group participant when known, else
    /// the conversation itself.
    pub fn sender_jid(&self) -> &str {
        self.participant_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.conversation_id)
    }

    /// Message time as an RFC 3339 UTC string with millisecond precision.
    pub fn sent_at(&self) -> String {
        DateTime::<Utc>::from_timestamp(self.timestamp, 0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Session connection state, derived from each connection update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed { reason: String, is_logged_out: bool },
}

/// One connection update from the session. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub state: Option<ConnectionState>,
    /// Pairing challenge, present while the session waits for a QR scan.
    pub qr: Option<String>,
}

/// Session credentials, opaque to everything except the session and the
/// credential store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub jid: String,
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn event(participant: Option<&str>) -> InboundMessageEvent {
        InboundMessageEvent {
            id: "A1".into(),
            conversation_id: "123-456@g.us".into(),
            conversation_kind: ConversationKind::Group,
            sender_id: "123-456@g.us".into(),
            participant_id: participant.map(str::to_string),
            timestamp: 1_704_164_645,
            attachment: Attachment::Image { mime_hint: None },
            is_self_sent: false,
            has_content: true,
            media: MediaHandle::default(),
        }
    }

    #[rstest]
    #[case(Some("5511999@s.whatsapp.net"), "5511999@s.whatsapp.net")]
    #[case(Some(""), "123-456@g.us")]
    #[case(None, "123-456@g.us")]
    fn sender_jid_prefers_participant(#[case] participant: Option<&str>, #[case] expected: &str) {
        assert_eq!(event(participant).sender_jid(), expected);
    }

    #[test]
    fn sent_at_is_iso_millis() {
        assert_eq!(event(None).sent_at(), "2024-01-02T03:04:05.000Z");
    }

    #[test]
    fn attachment_serializes_tagged() {
        let json = serde_json::to_value(Attachment::PdfDocument {
            mime_type: "application/pdf".into(),
        })
        .expect("serialize attachment");
        assert_eq!(json["kind"], "pdf_document");
        assert_eq!(json["mime_type"], "application/pdf");
    }
}
