#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end relay behavior against a scripted session and a mock webhook.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    axum::{Json, Router, extract::State, http::StatusCode, routing::post},
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    mediarelay_common::{
        Attachment, ConversationKind, CredentialStore, Credentials, Error, GroupMetadata,
        InboundMessageEvent, MediaHandle, Session, SessionConnector, SessionEvent,
        SessionEventSender,
    },
    mediarelay_config::MediarelayConfig,
    mediarelay_pipeline::{GROUP_NAME_FALLBACK, Relay},
    serde_json::Value,
    tokio::sync::oneshot,
};

// ── Scripted session ────────────────────────────────────────────────────────

const IMAGE_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

struct ScriptedSession {
    group_subject: Option<String>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn group_metadata(&self, jid: &str) -> mediarelay_common::Result<GroupMetadata> {
        match &self.group_subject {
            Some(subject) => Ok(GroupMetadata {
                jid: jid.into(),
                subject: subject.clone(),
            }),
            None => Err(Error::rejected("group_metadata", "not-authorized")),
        }
    }

    async fn download_media(
        &self,
        _message: &InboundMessageEvent,
    ) -> mediarelay_common::Result<Vec<u8>> {
        Ok(IMAGE_BYTES.to_vec())
    }
}

struct ScriptedConnector {
    group_subject: Option<String>,
    events: Mutex<Option<SessionEventSender>>,
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(
        &self,
        events: SessionEventSender,
    ) -> mediarelay_common::Result<Arc<dyn Session>> {
        *self.events.lock().unwrap() = Some(events);
        Ok(Arc::new(ScriptedSession {
            group_subject: self.group_subject.clone(),
        }))
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
        self.saved.lock().unwrap().push(credentials.clone());
        Ok(())
    }
}

// ── Mock webhook ────────────────────────────────────────────────────────────

#[derive(Clone)]
struct MockWebhook {
    bodies: Arc<Mutex<Vec<Value>>>,
    status: StatusCode,
}

async fn webhook_handler(State(state): State<MockWebhook>, Json(body): Json<Value>) -> StatusCode {
    state.bodies.lock().unwrap().push(body);
    state.status
}

async fn spawn_webhook(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>, oneshot::Sender<()>) {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/webhook", post(webhook_handler))
        .with_state(MockWebhook {
            bodies: Arc::clone(&bodies),
            status,
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock webhook");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("serve mock webhook");
    });

    (format!("http://{addr}/webhook"), bodies, shutdown_tx)
}

// ── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    relay: Relay,
    events: SessionEventSender,
    bodies: Arc<Mutex<Vec<Value>>>,
    store: Arc<MemoryStore>,
    incoming: PathBuf,
    _webhook: oneshot::Sender<()>,
    _dir: tempfile::TempDir,
}

struct Options {
    group_subject: Option<&'static str>,
    webhook_status: StatusCode,
    dedupe: bool,
    block_incoming_dir: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            group_subject: Some("Notas Fiscais"),
            webhook_status: StatusCode::OK,
            dedupe: false,
            block_incoming_dir: false,
        }
    }
}

impl Harness {
    async fn start(options: Options) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let (url, bodies, webhook) = spawn_webhook(options.webhook_status).await;

        let mut config = MediarelayConfig::default();
        config.delivery.api_url = url;
        config.delivery.timeout_secs = 5;
        config.storage.auth_dir = dir.path().join("auth");
        config.pipeline.dedupe_redelivered = options.dedupe;
        let incoming = config.storage.incoming_dir();

        if options.block_incoming_dir {
            std::fs::create_dir_all(&config.storage.auth_dir).unwrap();
            std::fs::write(&incoming, b"not a directory").unwrap();
        }

        let connector = Arc::new(ScriptedConnector {
            group_subject: options.group_subject.map(str::to_string),
            events: Mutex::new(None),
        });
        let store = Arc::new(MemoryStore::default());
        let relay = Relay::start(&config, Arc::clone(&connector) as _, Arc::clone(&store) as _)
            .await
            .expect("start relay");
        let events = connector
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("connector received event sender");

        Self {
            relay,
            events,
            bodies,
            store,
            incoming,
            _webhook: webhook,
            _dir: dir,
        }
    }

    async fn send(&self, batch: Vec<InboundMessageEvent>) {
        self.events
            .send(SessionEvent::MessageBatch(batch))
            .await
            .expect("queue batch");
    }

    /// Wait until `n` bodies arrived, then return all of them.
    async fn wait_for_posts(&self, n: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            {
                let bodies = self.bodies.lock().unwrap();
                if bodies.len() >= n {
                    return bodies.clone();
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} webhook posts"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn incoming_files(&self) -> Vec<PathBuf> {
        list_files(&self.incoming)
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn message(id: &str, kind: ConversationKind, attachment: Attachment) -> InboundMessageEvent {
    let (conversation_id, participant_id) = match kind {
        ConversationKind::Group => ("120363042@g.us", Some("5511999@s.whatsapp.net".to_string())),
        ConversationKind::Direct => ("5511999@s.whatsapp.net", None),
    };
    InboundMessageEvent {
        id: id.into(),
        conversation_id: conversation_id.into(),
        conversation_kind: kind,
        sender_id: "5511999@s.whatsapp.net".into(),
        participant_id,
        timestamp: 1_704_164_645,
        attachment,
        is_self_sent: false,
        has_content: true,
        media: MediaHandle::default(),
    }
}

fn image() -> Attachment {
    Attachment::Image {
        mime_hint: Some("image/jpeg".into()),
    }
}

fn pdf() -> Attachment {
    Attachment::PdfDocument {
        mime_type: "application/pdf".into(),
    }
}

/// A PDF posted after the message under test. The worker is sequential, so
/// once this arrives every earlier batch has been fully handled.
async fn send_marker(h: &Harness) {
    h.send(vec![message("MARKER", ConversationKind::Group, pdf())])
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn group_image_is_saved_and_posted() {
    let h = Harness::start(Options::default()).await;
    h.send(vec![message("A1", ConversationKind::Group, image())])
        .await;

    let bodies = h.wait_for_posts(1).await;
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["message_id"], "A1");
    assert_eq!(body["group_name"], "Notas Fiscais");
    assert_eq!(body["sender_jid"], "5511999@s.whatsapp.net");
    assert_eq!(body["sent_at"], "2024-01-02T03:04:05.000Z");

    let files = h.incoming_files();
    assert_eq!(files.len(), 1);
    let filename = files[0].file_name().unwrap().to_str().unwrap().to_string();
    assert!(filename.ends_with("_A1.jpg"), "unexpected file name {filename}");
    assert_eq!(body["image_filename"], filename.as_str());

    let decoded = BASE64
        .decode(body["image_base64"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, std::fs::read(&files[0]).unwrap());
    assert_eq!(decoded, IMAGE_BYTES);

    h.relay.shutdown().await;
}

#[tokio::test]
async fn self_sent_messages_produce_nothing() {
    let h = Harness::start(Options::default()).await;
    let mut own = message("A1", ConversationKind::Group, image());
    own.is_self_sent = true;
    h.send(vec![own]).await;
    send_marker(&h).await;

    let bodies = h.wait_for_posts(1).await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["message_id"], "MARKER");
    assert!(h.incoming_files().is_empty());

    h.relay.shutdown().await;
}

#[tokio::test]
async fn direct_chats_produce_nothing() {
    let h = Harness::start(Options::default()).await;
    h.send(vec![message("D1", ConversationKind::Direct, image())])
        .await;
    h.send(vec![message("D2", ConversationKind::Direct, pdf())])
        .await;
    send_marker(&h).await;

    let bodies = h.wait_for_posts(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.bodies.lock().unwrap().len(), 1);
    assert_eq!(bodies[0]["message_id"], "MARKER");
    assert!(h.incoming_files().is_empty());

    h.relay.shutdown().await;
}

#[tokio::test]
async fn group_pdf_posts_skip_signal_without_file() {
    let h = Harness::start(Options::default()).await;
    h.send(vec![message("P1", ConversationKind::Group, pdf())])
        .await;

    let bodies = h.wait_for_posts(1).await;
    assert_eq!(
        bodies[0],
        serde_json::json!({
            "skip_ocr": true,
            "file_type": "PDF",
            "sender_jid": "5511999@s.whatsapp.net",
            "message_id": "P1",
            "group_name": "Notas Fiscais",
            "sent_at": "2024-01-02T03:04:05.000Z"
        })
    );
    assert!(h.incoming_files().is_empty());

    h.relay.shutdown().await;
}

#[tokio::test]
async fn metadata_failure_still_posts_with_fallback_name() {
    let h = Harness::start(Options {
        group_subject: None,
        ..Default::default()
    })
    .await;
    h.send(vec![message("A1", ConversationKind::Group, image())])
        .await;

    let bodies = h.wait_for_posts(1).await;
    assert_eq!(bodies[0]["message_id"], "A1");
    assert_eq!(bodies[0]["group_name"], GROUP_NAME_FALLBACK);

    h.relay.shutdown().await;
}

#[tokio::test]
async fn write_failure_skips_post() {
    let h = Harness::start(Options {
        block_incoming_dir: true,
        ..Default::default()
    })
    .await;
    h.send(vec![message("A1", ConversationKind::Group, image())])
        .await;
    send_marker(&h).await;

    let bodies = h.wait_for_posts(1).await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["message_id"], "MARKER");

    h.relay.shutdown().await;
}

#[tokio::test]
async fn webhook_errors_do_not_stop_the_pipeline() {
    let h = Harness::start(Options {
        webhook_status: StatusCode::INTERNAL_SERVER_ERROR,
        ..Default::default()
    })
    .await;
    h.send(vec![message("A1", ConversationKind::Group, image())])
        .await;
    h.send(vec![message("A2", ConversationKind::Group, image())])
        .await;

    let bodies = h.wait_for_posts(2).await;
    let ids: Vec<_> = bodies.iter().map(|b| b["message_id"].clone()).collect();
    assert_eq!(ids, ["A1", "A2"]);

    h.relay.shutdown().await;
}

#[tokio::test]
async fn only_first_message_of_a_batch_is_considered() {
    let h = Harness::start(Options::default()).await;
    h.send(vec![
        message("P1", ConversationKind::Group, pdf()),
        message("P2", ConversationKind::Group, pdf()),
    ])
    .await;
    send_marker(&h).await;

    let bodies = h.wait_for_posts(2).await;
    let ids: Vec<_> = bodies.iter().map(|b| b["message_id"].clone()).collect();
    assert_eq!(ids, ["P1", "MARKER"]);

    h.relay.shutdown().await;
}

#[tokio::test]
async fn redelivery_is_processed_again_by_default() {
    let h = Harness::start(Options::default()).await;
    h.send(vec![message("P1", ConversationKind::Group, pdf())])
        .await;
    h.send(vec![message("P1", ConversationKind::Group, pdf())])
        .await;

    let bodies = h.wait_for_posts(2).await;
    assert_eq!(bodies.len(), 2);

    h.relay.shutdown().await;
}

#[tokio::test]
async fn dedupe_drops_redelivered_messages() {
    let h = Harness::start(Options {
        dedupe: true,
        ..Default::default()
    })
    .await;
    h.send(vec![message("P1", ConversationKind::Group, pdf())])
        .await;
    h.send(vec![message("P1", ConversationKind::Group, pdf())])
        .await;
    send_marker(&h).await;

    let bodies = h.wait_for_posts(2).await;
    let ids: Vec<_> = bodies.iter().map(|b| b["message_id"].clone()).collect();
    assert_eq!(ids, ["P1", "MARKER"]);

    h.relay.shutdown().await;
}

#[tokio::test]
async fn credential_updates_are_persisted() {
    let h = Harness::start(Options::default()).await;
    h.events
        .send(SessionEvent::CredentialsUpdate(Credentials(
            serde_json::json!({ "me": { "id": "5511@s.whatsapp.net" } }),
        )))
        .await
        .expect("queue creds");
    send_marker(&h).await;
    h.wait_for_posts(1).await;

    assert_eq!(h.store.saved.lock().unwrap().len(), 1);

    h.relay.shutdown().await;
}
