//! [`Session`] and [`SessionConnector`] backed by the Baileys sidecar.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    tokio::sync::{Mutex, mpsc, oneshot},
    tracing::{debug, info, warn},
};

use mediarelay_common::{
    ConnectionState, ConnectionUpdate, CredentialStore, Credentials, Error, GroupMetadata,
    InboundMessageEvent, Result, Session, SessionConnector, SessionEvent, SessionEventSender,
};

use crate::{
    process::{SharedSidecarProcess, SidecarConfig, find_sidecar_dir, start_sidecar},
    sidecar::{SidecarHandle, connect_with_retry},
    types::{GatewayMessage, SidecarMessage, connection_update, parse_envelope},
};

/// Attempts (500 ms apart) to reach a sidecar that is still booting.
const CONNECT_ATTEMPTS: u32 = 60;

/// A connected sidecar session.
pub struct SidecarSession {
    handle: SidecarHandle,
    request_timeout: Duration,
}

impl SidecarSession {
    pub fn new(handle: SidecarHandle, request_timeout: Duration) -> Self {
        Self {
            handle,
            request_timeout,
        }
    }
}

#[async_trait]
impl Session for SidecarSession {
    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let msg = GatewayMessage::GroupMetadata {
            request_id: request_id.clone(),
            jid: jid.to_string(),
        };
        let reply = self
            .handle
            .request(request_id, &msg, self.request_timeout, "group_metadata")
            .await?;

        match reply {
            SidecarMessage::GroupMetadataResult {
                subject: Some(subject),
                error: None,
                ..
            } => Ok(GroupMetadata {
                jid: jid.to_string(),
                subject,
            }),
            SidecarMessage::GroupMetadataResult { error, .. } => Err(Error::rejected(
                "group_metadata",
                error.unwrap_or_else(|| "no subject in reply".into()),
            )),
            SidecarMessage::Error { error, .. } => Err(Error::rejected("group_metadata", error)),
            other => Err(Error::message(format!(
                "unexpected reply to group_metadata: {other:?}"
            ))),
        }
    }

    async fn download_media(&self, message: &InboundMessageEvent) -> Result<Vec<u8>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let msg = GatewayMessage::DownloadMedia {
            request_id: request_id.clone(),
            message: message.media.0.clone(),
            reupload: true,
        };
        let reply = self
            .handle
            .request(request_id, &msg, self.request_timeout, "download_media")
            .await?;

        match reply {
            SidecarMessage::DownloadMediaResult {
                data: Some(data),
                error: None,
                ..
            } => BASE64
                .decode(data.as_bytes())
                .map_err(|e| Error::external("decode downloaded media", e)),
            SidecarMessage::DownloadMediaResult { error, .. } => Err(Error::rejected(
                "download_media",
                error.unwrap_or_else(|| "no data in reply".into()),
            )),
            SidecarMessage::Error { error, .. } => Err(Error::rejected("download_media", error)),
            other => Err(Error::message(format!(
                "unexpected reply to download_media: {other:?}"
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.handle.close();
        Ok(())
    }
}

/// Builds [`SidecarSession`]s, starting the sidecar process on first use.
pub struct SidecarConnector {
    credentials: Arc<dyn CredentialStore>,
    process: SharedSidecarProcess,
    auth_dir: PathBuf,
    sidecar_port: u16,
    sidecar_dir: Option<PathBuf>,
    auto_start_sidecar: bool,
    request_timeout: Duration,
}

impl SidecarConnector {
    pub fn new(credentials: Arc<dyn CredentialStore>, auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            credentials,
            process: Arc::new(Mutex::new(None)),
            auth_dir: auth_dir.into(),
            sidecar_port: mediarelay_config::DEFAULT_SIDECAR_PORT,
            sidecar_dir: None,
            auto_start_sidecar: true,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Connector configured from the `[session]` and `[storage]` tables.
    pub fn from_config(
        credentials: Arc<dyn CredentialStore>,
        config: &mediarelay_config::MediarelayConfig,
    ) -> Self {
        Self::new(credentials, config.storage.auth_dir.clone())
            .with_sidecar_port(config.session.sidecar_port)
            .with_sidecar_dir(config.session.sidecar_dir.clone())
            .with_auto_start(config.session.auto_start_sidecar)
            .with_request_timeout(Duration::from_secs(config.session.request_timeout_secs))
    }

    pub fn with_sidecar_port(mut self, port: u16) -> Self {
        self.sidecar_port = port;
        self
    }

    pub fn with_sidecar_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.sidecar_dir = dir;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start_sidecar = auto_start;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Stop the sidecar process if this connector started it.
    pub async fn shutdown(&self) {
        if let Some(mut process) = self.process.lock().await.take()
            && let Err(e) = process.stop().await
        {
            warn!(error = %e, "failed to stop WhatsApp sidecar");
        }
    }

    async fn ensure_sidecar(&self) -> Result<()> {
        if !self.auto_start_sidecar {
            return Ok(());
        }

        let mut guard = self.process.lock().await;
        if let Some(process) = guard.as_mut() {
            if process.is_running() {
                return Ok(());
            }
            warn!("WhatsApp sidecar process exited, restarting");
        }

        let sidecar_dir = find_sidecar_dir(self.sidecar_dir.as_deref())
            .map_err(|e| Error::unavailable(format!("{e:#}")))?;
        let process = start_sidecar(&SidecarConfig {
            sidecar_dir,
            port: self.sidecar_port,
            auth_dir: self.auth_dir.clone(),
        })
        .await
        .map_err(|e| Error::unavailable(format!("{e:#}")))?;
        *guard = Some(process);
        Ok(())
    }
}

#[async_trait]
impl SessionConnector for SidecarConnector {
    async fn connect(&self, events: SessionEventSender) -> Result<Arc<dyn Session>> {
        self.ensure_sidecar().await?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        let handle = connect_with_retry(
            self.sidecar_port,
            inbound_tx,
            disconnect_tx,
            CONNECT_ATTEMPTS,
        )
        .await?;

        tokio::spawn(forward_events(inbound_rx, disconnect_rx, events));

        let stored = self.credentials.load().await?;
        info!(
            auth_dir = %self.auth_dir.display(),
            has_credentials = stored.is_some(),
            "starting WhatsApp session"
        );
        handle.send(&GatewayMessage::Login {
            auth_dir: self.auth_dir.clone(),
            credentials: stored.map(|c| c.0),
        })?;

        Ok(Arc::new(SidecarSession::new(handle, self.request_timeout)))
    }
}

/// Translate sidecar messages into session events, preserving order.
///
/// The connection task reports an unexpected drop before it releases the
/// inbound queue, so the drop becomes the last event of the session.
async fn forward_events(
    mut inbound: mpsc::UnboundedReceiver<SidecarMessage>,
    disconnect: oneshot::Receiver<String>,
    events: SessionEventSender,
) {
    while let Some(msg) = inbound.recv().await {
        let Some(event) = to_session_event(msg) else {
            continue;
        };
        if events.send(event).await.is_err() {
            debug!("session event receiver dropped, stopping forwarder");
            return;
        }
    }

    if let Ok(reason) = disconnect.await {
        let update = ConnectionUpdate {
            state: Some(ConnectionState::Closed {
                reason,
                is_logged_out: false,
            }),
            qr: None,
        };
        let _ = events.send(SessionEvent::ConnectionUpdate(update)).await;
    }
}

fn to_session_event(msg: SidecarMessage) -> Option<SessionEvent> {
    match msg {
        SidecarMessage::Connection {
            connection,
            qr,
            status_code,
            reason,
        } => Some(SessionEvent::ConnectionUpdate(connection_update(
            connection.as_deref(),
            qr,
            status_code,
            reason,
        ))),
        SidecarMessage::CredsUpdate { creds } => {
            Some(SessionEvent::CredentialsUpdate(Credentials(creds)))
        },
        SidecarMessage::MessagesUpsert {
            messages,
            upsert_type,
        } => {
            // A malformed head drops the batch. Later envelopes never take its place.
            let Some(head) = messages.first().and_then(parse_envelope) else {
                debug!(
                    count = messages.len(),
                    "first envelope has no message key, ignoring batch"
                );
                return None;
            };
            let batch: Vec<InboundMessageEvent> = std::iter::once(head)
                .chain(messages[1..].iter().filter_map(parse_envelope))
                .collect();
            if batch.len() < messages.len() {
                debug!(
                    dropped = messages.len() - batch.len(),
                    "ignored envelopes without a message key"
                );
            }
            debug!(count = batch.len(), upsert_type = ?upsert_type, "messages upserted");
            (!batch.is_empty()).then_some(SessionEvent::MessageBatch(batch))
        },
        SidecarMessage::Error { error, .. } => {
            warn!(error = %error, "WhatsApp sidecar reported an error");
            None
        },
        SidecarMessage::GroupMetadataResult { request_id, .. }
        | SidecarMessage::DownloadMediaResult { request_id, .. } => {
            debug!(%request_id, "late reply routed to event queue, ignoring");
            None
        },
    }
}
