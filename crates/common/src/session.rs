use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    Result,
    types::{ConnectionUpdate, Credentials, GroupMetadata, InboundMessageEvent},
};

// ── Session events ──────────────────────────────────────────────────────────

/// Everything a live session reports, in emission order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionUpdate(ConnectionUpdate),
    CredentialsUpdate(Credentials),
    MessageBatch(Vec<InboundMessageEvent>),
}

/// Sender half handed to a session so it can push events into the dispatcher.
pub type SessionEventSender = mpsc::Sender<SessionEvent>;

/// Receiver half drained by the dispatcher.
pub type SessionEventReceiver = mpsc::Receiver<SessionEvent>;

// ── Collaborator traits ─────────────────────────────────────────────────────

/// A live connection to the messaging service.
#[async_trait]
pub trait Session: Send + Sync {
    /// Look up a group's metadata (subject) by conversation JID.
    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata>;

    /// Download the raw bytes of a message's attachment.
    ///
    /// Implementations pass their own logger and media re-upload capability
    /// through to the platform so expired media URLs can be refreshed.
    async fn download_media(&self, message: &InboundMessageEvent) -> Result<Vec<u8>>;

    /// Tear the connection down. Called before a replacement session is
    /// built and on shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds fresh sessions. Each call yields a brand-new connection that
/// reports into `events`.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, events: SessionEventSender) -> Result<Arc<dyn Session>>;
}

/// Durable storage for session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load stored credentials, `None` if the session was never paired.
    async fn load(&self) -> Result<Option<Credentials>>;

    /// Persist updated credentials. Must complete before the caller continues.
    ///
    /// `credentials` is the full snapshot and replaces whatever was stored.
    /// Partial deltas must be merged by the producer first.
    async fn save(&self, credentials: &Credentials) -> Result<()>;
}
