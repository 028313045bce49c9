//! Shared types, error definitions, and session traits used across all
//! mediarelay crates.

pub mod error;
pub mod session;
pub mod types;

pub use {
    error::{Error, Result},
    session::{
        CredentialStore, Session, SessionConnector, SessionEvent, SessionEventReceiver,
        SessionEventSender,
    },
    types::{
        Attachment, ConnectionState, ConnectionUpdate, ConversationKind, Credentials,
        GroupMetadata, InboundMessageEvent, MediaHandle,
    },
};
