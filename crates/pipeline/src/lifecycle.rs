//! Connection lifecycle: pairing output, credential persistence, and
//! deferred reconnects.
//!
//! The controller owns the current session handle. Consumers observe it
//! through a `watch` channel; a reconnect builds a fresh session and swaps
//! it in as a whole.

use std::{sync::Arc, time::Duration};

use {
    mediarelay_common::{
        ConnectionState, ConnectionUpdate, CredentialStore, Credentials, Session, SessionConnector,
        SessionEventSender,
    },
    tokio::{sync::watch, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{error::Result, pairing::QrRenderer};

/// Current session, `None` while (re)connecting or after shutdown.
pub type SessionSlot = Arc<watch::Sender<Option<Arc<dyn Session>>>>;

/// Observer side of [`SessionSlot`].
pub type SessionWatch = watch::Receiver<Option<Arc<dyn Session>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closed,
    /// Explicit logout. Stays here until the account is paired again.
    LoggedOut,
}

/// What a connection update caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    None,
    ReconnectScheduled(Duration),
    /// A reconnect was already pending; nothing new was scheduled.
    ReconnectPending,
    LoggedOut,
}

struct PendingReconnect {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct LifecycleController {
    connector: Arc<dyn SessionConnector>,
    credentials: Arc<dyn CredentialStore>,
    events: SessionEventSender,
    slot: SessionSlot,
    pairing: QrRenderer,
    reconnect_delay: Duration,
    phase: Phase,
    reconnect: Option<PendingReconnect>,
    shutdown: CancellationToken,
}

impl LifecycleController {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        credentials: Arc<dyn CredentialStore>,
        events: SessionEventSender,
        pairing: QrRenderer,
        reconnect_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            connector,
            credentials,
            events,
            slot: Arc::new(slot),
            pairing,
            reconnect_delay,
            phase: Phase::Connecting,
            reconnect: None,
            shutdown,
        }
    }

    pub fn sessions(&self) -> SessionWatch {
        self.slot.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Build the first session. Failure here is a startup failure.
    pub async fn start(&mut self) -> Result<()> {
        info!("connecting to WhatsApp");
        let session = self.connector.connect(self.events.clone()).await?;
        self.slot.send_replace(Some(session));
        Ok(())
    }

    pub async fn handle_connection_update(&mut self, update: ConnectionUpdate) -> LifecycleAction {
        if let Some(qr) = update.qr {
            info!("pairing challenge received, rendering QR code");
            self.pairing.spawn_render(qr);
        }

        match update.state {
            None => LifecycleAction::None,
            Some(ConnectionState::Connecting) => {
                info!("connecting to WhatsApp");
                self.phase = Phase::Connecting;
                LifecycleAction::None
            },
            Some(ConnectionState::Open) => {
                info!("connected to WhatsApp");
                self.phase = Phase::Open;
                LifecycleAction::None
            },
            Some(ConnectionState::Closed {
                reason,
                is_logged_out: true,
            }) => {
                error!(reason = %reason, "logged out of WhatsApp, pair again to resume");
                self.phase = Phase::LoggedOut;
                self.cancel_reconnect();
                LifecycleAction::LoggedOut
            },
            Some(ConnectionState::Closed { reason, .. }) => {
                warn!(reason = %reason, "WhatsApp connection closed");
                self.phase = Phase::Closed;
                self.schedule_reconnect()
            },
        }
    }

    /// Persist updated credentials before any further event is handled.
    pub async fn handle_credentials(&self, credentials: Credentials) {
        if let Err(e) = self.credentials.save(&credentials).await {
            error!(error = %e, "failed to persist session credentials");
        }
    }

    /// Cancel any pending reconnect and close the current session.
    pub async fn shutdown(&mut self) {
        self.cancel_reconnect();
        if let Some(session) = self.slot.send_replace(None)
            && let Err(e) = session.close().await
        {
            debug!(error = %e, "error closing session during shutdown");
        }
    }

    fn schedule_reconnect(&mut self) -> LifecycleAction {
        if let Some(pending) = &self.reconnect
            && !pending.task.is_finished()
        {
            debug!("reconnect already pending");
            return LifecycleAction::ReconnectPending;
        }

        info!(delay_secs = self.reconnect_delay.as_secs_f64(), "reconnecting");
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(reconnect_loop(
            Arc::clone(&self.connector),
            self.events.clone(),
            Arc::clone(&self.slot),
            self.reconnect_delay,
            cancel.clone(),
        ));
        self.reconnect = Some(PendingReconnect { cancel, task });
        LifecycleAction::ReconnectScheduled(self.reconnect_delay)
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.cancel.cancel();
        }
    }
}

/// Wait `delay`, then replace the session. Retries after the same delay
/// until a session is built or `cancel` fires.
async fn reconnect_loop(
    connector: Arc<dyn SessionConnector>,
    events: SessionEventSender,
    slot: SessionSlot,
    delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {},
        }

        if let Some(old) = slot.send_replace(None)
            && let Err(e) = old.close().await
        {
            debug!(error = %e, "error closing previous session");
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connector.connect(events.clone()) => result,
        };
        match connected {
            Ok(session) => {
                if cancel.is_cancelled() {
                    let _ = session.close().await;
                    return;
                }
                slot.send_replace(Some(session));
                info!("WhatsApp session rebuilt");
                return;
            },
            Err(e) => warn!(
                error = %e,
                retry_in_secs = delay.as_secs_f64(),
                "reconnect failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        mediarelay_common::{Error, GroupMetadata, InboundMessageEvent},
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        tokio::sync::mpsc,
    };

    struct IdleSession;

    #[async_trait]
    impl Session for IdleSession {
        async fn group_metadata(&self, _jid: &str) -> mediarelay_common::Result<GroupMetadata> {
            Err(Error::unavailable("idle"))
        }

        async fn download_media(
            &self,
            _message: &InboundMessageEvent,
        ) -> mediarelay_common::Result<Vec<u8>> {
            Err(Error::unavailable("idle"))
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        fail_first_reconnect: bool,
    }

    #[async_trait]
    impl SessionConnector for CountingConnector {
        async fn connect(
            &self,
            _events: SessionEventSender,
        ) -> mediarelay_common::Result<Arc<dyn Session>> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_reconnect && n == 1 {
                return Err(Error::unavailable("sidecar restarting"));
            }
            Ok(Arc::new(IdleSession))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<Credentials>>,
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn load(&self) -> mediarelay_common::Result<Option<Credentials>> {
            Ok(None)
        }

        async fn save(&self, credentials: &Credentials) -> mediarelay_common::Result<()> {
            self.saved.lock().expect("lock").push(credentials.clone());
            Ok(())
        }
    }

    fn controller(
        connector: Arc<CountingConnector>,
        store: Arc<MemoryStore>,
        qr_dir: &std::path::Path,
    ) -> LifecycleController {
        let (events, _rx) = mpsc::channel(8);
        LifecycleController::new(
            connector,
            store,
            events,
            QrRenderer::new(qr_dir.join("qr/qr.png")),
            Duration::from_secs(5),
            CancellationToken::new(),
        )
    }

    fn closed(is_logged_out: bool) -> ConnectionUpdate {
        ConnectionUpdate {
            state: Some(ConnectionState::Closed {
                reason: "stream errored".into(),
                is_logged_out,
            }),
            qr: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drop_schedules_reconnect_after_delay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(CountingConnector::default());
        let mut ctl = controller(Arc::clone(&connector), Arc::default(), dir.path());
        ctl.start().await.expect("start");
        let sessions = ctl.sessions();

        let action = ctl.handle_connection_update(closed(false)).await;
        assert_eq!(action, LifecycleAction::ReconnectScheduled(Duration::from_secs(5)));
        assert_eq!(ctl.phase(), Phase::Closed);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert!(sessions.borrow().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_never_reconnects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(CountingConnector::default());
        let mut ctl = controller(Arc::clone(&connector), Arc::default(), dir.path());
        ctl.start().await.expect("start");

        let action = ctl.handle_connection_update(closed(true)).await;
        assert_eq!(action, LifecycleAction::LoggedOut);
        assert_eq!(ctl.phase(), Phase::LoggedOut);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_drops_share_one_reconnect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(CountingConnector::default());
        let mut ctl = controller(Arc::clone(&connector), Arc::default(), dir.path());
        ctl.start().await.expect("start");

        ctl.handle_connection_update(closed(false)).await;
        let second = ctl.handle_connection_update(closed(false)).await;
        assert_eq!(second, LifecycleAction::ReconnectPending);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_is_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(CountingConnector {
            fail_first_reconnect: true,
            ..Default::default()
        });
        let mut ctl = controller(Arc::clone(&connector), Arc::default(), dir.path());
        ctl.start().await.expect("start");

        ctl.handle_connection_update(closed(false)).await;
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert!(ctl.sessions().borrow().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reconnect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(CountingConnector::default());
        let mut ctl = controller(Arc::clone(&connector), Arc::default(), dir.path());
        ctl.start().await.expect("start");

        ctl.handle_connection_update(closed(false)).await;
        ctl.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(ctl.sessions().borrow().is_none());
    }

    #[tokio::test]
    async fn credentials_are_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::default());
        let ctl = controller(Arc::default(), Arc::clone(&store), dir.path());

        ctl.handle_credentials(Credentials(serde_json::json!({ "me": "x" })))
            .await;
        assert_eq!(store.saved.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn open_and_connecting_update_phase() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctl = controller(Arc::default(), Arc::default(), dir.path());

        let action = ctl
            .handle_connection_update(ConnectionUpdate {
                state: Some(ConnectionState::Open),
                qr: None,
            })
            .await;
        assert_eq!(action, LifecycleAction::None);
        assert_eq!(ctl.phase(), Phase::Open);

        let action = ctl
            .handle_connection_update(ConnectionUpdate {
                state: Some(ConnectionState::Connecting),
                qr: None,
            })
            .await;
        assert_eq!(action, LifecycleAction::None);
        assert_eq!(ctl.phase(), Phase::Connecting);
    }

    #[tokio::test]
    async fn pairing_challenge_writes_qr_png() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctl = controller(Arc::default(), Arc::default(), dir.path());
        let qr_path = dir.path().join("qr/qr.png");

        let action = ctl
            .handle_connection_update(ConnectionUpdate {
                state: None,
                qr: Some("2@pairing-ref,abc,def".into()),
            })
            .await;
        assert_eq!(action, LifecycleAction::None);
        assert_eq!(ctl.phase(), Phase::Connecting);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let png = loop {
            if let Ok(bytes) = std::fs::read(&qr_path)
                && bytes.len() >= 8
            {
                break bytes;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "QR code was not written to {}",
                qr_path.display()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
