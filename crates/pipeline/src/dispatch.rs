//! Event dispatch.
//!
//! One loop drains the session event queue. Connection and credential
//! events are handled inline; message batches go to a single worker that
//! runs each batch to completion before taking the next.

use std::sync::Arc;

use {
    mediarelay_common::{InboundMessageEvent, Session, SessionEvent, SessionEventReceiver},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    classifier::{self, Decision, IgnoreReason, Route},
    dedupe::RecentIds,
    delivery::{DeliveryClient, DeliveryPayload},
    lifecycle::{LifecycleController, SessionWatch},
    media::{self, MediaStore},
};

pub type BatchSender = mpsc::UnboundedSender<Vec<InboundMessageEvent>>;
pub type BatchReceiver = mpsc::UnboundedReceiver<Vec<InboundMessageEvent>>;

/// What happened to one message batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    /// Already processed within the dedupe window.
    Duplicate,
    /// No live session to resolve metadata or media with.
    NoSession,
    /// Download or local write failed; nothing was posted.
    MediaFailed,
    Delivered { message_id: String, route: Route },
    DeliveryFailed { message_id: String, route: Route },
}

/// Sequential processor for message batches.
pub struct MessageWorker {
    sessions: SessionWatch,
    media: MediaStore,
    delivery: DeliveryClient,
    recent: Option<RecentIds>,
}

impl MessageWorker {
    pub fn new(sessions: SessionWatch, media: MediaStore, delivery: DeliveryClient) -> Self {
        Self {
            sessions,
            media,
            delivery,
            recent: None,
        }
    }

    /// Skip batches whose first message id already reached delivery within
    /// the last `capacity` delivered ids.
    pub fn with_dedupe(mut self, capacity: usize) -> Self {
        self.recent = Some(RecentIds::new(capacity));
        self
    }

    pub async fn process(&mut self, batch: Vec<InboundMessageEvent>) -> Outcome {
        if let Some(recent) = self.recent.as_ref()
            && let Some(first) = batch.first()
            && matches!(classifier::classify(first), Decision::Qualify(_))
            && recent.contains(&first.id)
        {
            info!(message_id = %first.id, "skipping re-delivered message");
            return Outcome::Duplicate;
        }

        let session: Option<Arc<dyn Session>> = self.sessions.borrow().clone();
        let Some(session) = session else {
            if let Some(first) = batch.first() {
                warn!(message_id = %first.id, "no live session, dropping message");
            }
            return Outcome::NoSession;
        };

        let message = match classifier::qualify(session.as_ref(), batch).await {
            Ok(message) => message,
            Err(reason) => return Outcome::Ignored(reason),
        };
        let message_id = message.event.id.clone();
        let route = message.route;

        let payload = match route {
            Route::Image => match media::acquire(session.as_ref(), &self.media, &message).await {
                Ok(file) => DeliveryPayload::image(&message, &file),
                Err(e) => {
                    error!(message_id = %message_id, error = %e, "failed to process image");
                    return Outcome::MediaFailed;
                },
            },
            Route::PdfSkip => DeliveryPayload::skip_pdf(&message),
        };

        // Remember ids only once the message reaches delivery.
        if let Some(recent) = self.recent.as_mut() {
            recent.insert(&message_id);
        }

        if self.delivery.deliver(&payload).await {
            Outcome::Delivered { message_id, route }
        } else {
            Outcome::DeliveryFailed { message_id, route }
        }
    }

    /// Process batches in arrival order until the queue closes or
    /// `shutdown` fires. An in-flight batch is finished first.
    pub async fn run(mut self, mut batches: BatchReceiver, shutdown: CancellationToken) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            let outcome = self.process(batch).await;
            debug!(?outcome, "message batch handled");
        }
        info!("message worker stopped");
    }
}

/// Routes session events to the lifecycle controller and message worker.
pub struct Dispatcher {
    lifecycle: LifecycleController,
    batches: BatchSender,
}

impl Dispatcher {
    pub fn new(lifecycle: LifecycleController, batches: BatchSender) -> Self {
        Self { lifecycle, batches }
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ConnectionUpdate(update) => {
                let action = self.lifecycle.handle_connection_update(update).await;
                debug!(?action, "connection update handled");
            },
            SessionEvent::CredentialsUpdate(credentials) => {
                self.lifecycle.handle_credentials(credentials).await;
            },
            SessionEvent::MessageBatch(batch) => {
                if self.batches.send(batch).is_err() {
                    warn!("message worker is gone, dropping batch");
                }
            },
        }
    }

    /// Drain `events` until shutdown, then tear the session down.
    pub async fn run(mut self, mut events: SessionEventReceiver, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        self.lifecycle.shutdown().await;
        info!("event dispatcher stopped");
    }
}
