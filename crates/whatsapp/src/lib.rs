//! WhatsApp Web session for mediarelay.
//!
//! Talks to a Baileys (Node.js) sidecar over a local WebSocket and exposes
//! it through the `Session` / `SessionConnector` / `CredentialStore` seams.

pub mod credentials;
pub mod process;
pub mod session;
pub mod sidecar;
pub mod types;

pub use {
    credentials::FileCredentialStore,
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    session::{SidecarConnector, SidecarSession},
    sidecar::SidecarHandle,
    types::{GatewayMessage, STATUS_LOGGED_OUT, SidecarMessage, parse_envelope},
};
