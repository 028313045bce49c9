//! Decides which inbound messages qualify for relaying.

use {
    mediarelay_common::{Attachment, ConversationKind, InboundMessageEvent, Session},
    tracing::{debug, info, warn},
};

/// Group name used when the metadata lookup fails.
pub const GROUP_NAME_FALLBACK: &str = "Group Name Error";

/// Which delivery branch a qualified message takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Download, persist, and post the image.
    Image,
    /// Post a skip-OCR placeholder; no media is fetched.
    PdfSkip,
}

/// Why a message was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyBatch,
    NoContent,
    SelfSent,
    DirectChat { has_image: bool },
    Unsupported,
}

/// Outcome of applying the classification rules to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ignore(IgnoreReason),
    Qualify(Route),
}

/// A message that passed classification, with its group name resolved.
#[derive(Debug, Clone)]
pub struct QualifiedMessage {
    pub event: InboundMessageEvent,
    pub group_name: String,
    pub route: Route,
}

/// Apply the routing rules, in order. Pure: no lookups, no logging.
pub fn classify(event: &InboundMessageEvent) -> Decision {
    if !event.has_content {
        return Decision::Ignore(IgnoreReason::NoContent);
    }
    if event.is_self_sent {
        return Decision::Ignore(IgnoreReason::SelfSent);
    }
    if event.conversation_kind != ConversationKind::Group {
        return Decision::Ignore(IgnoreReason::DirectChat {
            has_image: event.attachment.is_image(),
        });
    }
    match event.attachment {
        Attachment::Image { .. } => Decision::Qualify(Route::Image),
        Attachment::PdfDocument { .. } => Decision::Qualify(Route::PdfSkip),
        Attachment::None | Attachment::Other => Decision::Ignore(IgnoreReason::Unsupported),
    }
}

/// Classify the first message of a batch and resolve its group name.
///
/// Later messages in the batch are not looked at.
pub async fn qualify(
    session: &dyn Session,
    batch: Vec<InboundMessageEvent>,
) -> Result<QualifiedMessage, IgnoreReason> {
    let Some(event) = batch.into_iter().next() else {
        return Err(IgnoreReason::EmptyBatch);
    };

    let route = match classify(&event) {
        Decision::Qualify(route) => route,
        Decision::Ignore(reason) => {
            log_ignored(&event, reason);
            return Err(reason);
        },
    };

    let group_name = resolve_group_name(session, &event.conversation_id).await;
    info!(
        message_id = %event.id,
        group = %group_name,
        sender = %event.sender_jid(),
        ?route,
        "attachment received in group"
    );

    Ok(QualifiedMessage {
        event,
        group_name,
        route,
    })
}

async fn resolve_group_name(session: &dyn Session, jid: &str) -> String {
    match session.group_metadata(jid).await {
        Ok(meta) => meta.subject,
        Err(e) => {
            warn!(group = %jid, error = %e, "failed to get group metadata");
            GROUP_NAME_FALLBACK.to_string()
        },
    }
}

fn log_ignored(event: &InboundMessageEvent, reason: IgnoreReason) {
    match reason {
        IgnoreReason::SelfSent => info!(message_id = %event.id, "skipping message sent by this account"),
        IgnoreReason::DirectChat { has_image: true } => {
            info!(from = %event.conversation_id, "ignoring image from direct chat");
        },
        _ => debug!(message_id = %event.id, ?reason, "message ignored"),
    }
}
