//! WebSocket client for the Baileys sidecar.
//!
//! One connection carries both directions: gateway commands and request/reply
//! pairs correlated by `request_id`, and unsolicited sidecar events which are
//! forwarded, in order, to an unbounded queue. The reader never waits on the
//! consumer, so replies keep flowing while events are being processed.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    tokio::sync::{Mutex, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use mediarelay_common::{Error, Result};

use crate::types::{GatewayMessage, SidecarMessage};

/// Delay between connection attempts while the sidecar is starting.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Queue for sidecar messages that are not replies to a request.
pub type InboundSender = mpsc::UnboundedSender<SidecarMessage>;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<SidecarMessage>>>>;

/// Handle to a live sidecar connection.
#[derive(Clone)]
pub struct SidecarHandle {
    write_tx: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Send a fire-and-forget command.
    pub fn send(&self, msg: &GatewayMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::unavailable("sidecar connection closed"));
        }
        let json = serde_json::to_string(msg)?;
        self.write_tx
            .send(json)
            .map_err(|_| Error::unavailable("sidecar writer stopped"))
    }

    /// Send a request and wait for the reply carrying `request_id`.
    pub async fn request(
        &self,
        request_id: String,
        msg: &GatewayMessage,
        timeout: Duration,
        operation: &str,
    ) -> Result<SidecarMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(e) = self.send(msg) {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::unavailable(format!(
                "sidecar connection closed during {operation}"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(Error::timeout(operation))
            },
        }
    }

    /// Close the WebSocket. Pending requests fail with `Unavailable`.
    pub fn close(&self) {
        // An empty frame tells the connection task to close.
        self.connected.store(false, Ordering::Release);
        let _ = self.write_tx.send(String::new());
    }
}

/// Connect to the sidecar on `port`, retrying while it boots.
///
/// `on_disconnect` fires once when the connection ends for any reason other
/// than [`SidecarHandle::close`].
pub async fn connect_with_retry(
    port: u16,
    inbound: InboundSender,
    on_disconnect: oneshot::Sender<String>,
    max_attempts: u32,
) -> Result<SidecarHandle> {
    let url = format!("ws://127.0.0.1:{port}");
    let mut last_error = None;

    for attempt in 1..=max_attempts.max(1) {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                info!(url = %url, attempt, "connected to WhatsApp sidecar");
                return Ok(spawn_connection(stream, inbound, on_disconnect));
            },
            Err(e) => {
                debug!(url = %url, attempt, error = %e, "sidecar not reachable yet");
                last_error = Some(e);
                tokio::time::sleep(RETRY_DELAY).await;
            },
        }
    }

    Err(match last_error {
        Some(e) => Error::external(format!("connect to sidecar at {url}"), e),
        None => Error::unavailable(format!("could not connect to sidecar at {url}")),
    })
}

fn spawn_connection<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    inbound: InboundSender,
    on_disconnect: oneshot::Sender<String>,
) -> SidecarHandle
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let connected = Arc::new(AtomicBool::new(true));

    let handle = SidecarHandle {
        write_tx,
        pending: Arc::clone(&pending),
        connected: Arc::clone(&connected),
    };

    tokio::spawn(async move {
        let (mut sink, mut reader) = stream.split();

        let reason = loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        route_frame(&text, &pending, &inbound).await;
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            break format!("pong failed: {e}");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break "closed by sidecar".to_string(),
                    Some(Ok(_)) => {},
                    Some(Err(e)) => break format!("websocket error: {e}"),
                },
                out = write_rx.recv() => match out {
                    Some(json) if !json.is_empty() => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            break format!("send failed: {e}");
                        }
                    },
                    // Empty frame is the close signal; `None` means every
                    // handle was dropped.
                    _ => {
                        let _ = sink.send(Message::Close(None)).await;
                        break String::new();
                    },
                },
            }
        };

        let was_connected = connected.swap(false, Ordering::AcqRel);
        // Fail outstanding requests by dropping their senders.
        pending.lock().await.clear();

        if was_connected && !reason.is_empty() {
            warn!(reason = %reason, "sidecar connection lost");
            let _ = on_disconnect.send(reason);
        } else {
            debug!("sidecar connection closed");
        }
    });

    handle
}

async fn route_frame(text: &str, pending: &PendingMap, inbound: &InboundSender) {
    let msg = match serde_json::from_str::<SidecarMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognised sidecar frame");
            return;
        },
    };

    if let Some(request_id) = msg.request_id().map(str::to_string) {
        let waiter = pending.lock().await.remove(&request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            },
            None => debug!(%request_id, "reply for unknown or expired request"),
        }
        return;
    }

    if inbound.send(msg).is_err() {
        debug!("sidecar event dropped, session consumer is gone");
    }
}
