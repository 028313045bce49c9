//! Wires the controller, dispatcher, and worker into a running relay.

use std::{sync::Arc, time::Duration};

use {
    mediarelay_common::{CredentialStore, SessionConnector},
    mediarelay_config::MediarelayConfig,
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    delivery::DeliveryClient,
    dispatch::{Dispatcher, MessageWorker},
    error::Result,
    lifecycle::{LifecycleController, SessionWatch},
    media::MediaStore,
    pairing::QrRenderer,
};

/// Capacity of the session event queue.
const EVENT_QUEUE: usize = 256;

/// A running relay. Dropping it does not stop the tasks; call [`Relay::shutdown`].
pub struct Relay {
    shutdown: CancellationToken,
    sessions: SessionWatch,
    dispatcher: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Relay {
    /// Connect the first session and start processing events.
    pub async fn start(
        config: &MediarelayConfig,
        connector: Arc<dyn SessionConnector>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (batches_tx, batches_rx) = mpsc::unbounded_channel();

        let mut lifecycle = LifecycleController::new(
            connector,
            credentials,
            events_tx,
            QrRenderer::new(config.storage.qr_path()),
            Duration::from_secs(config.session.reconnect_delay_secs),
            shutdown.clone(),
        );
        lifecycle.start().await?;
        let sessions = lifecycle.sessions();

        let delivery = DeliveryClient::new(
            config.delivery.api_url.clone(),
            Duration::from_secs(config.delivery.timeout_secs),
        )?;
        let mut worker = MessageWorker::new(
            lifecycle.sessions(),
            MediaStore::new(config.storage.incoming_dir()),
            delivery,
        );
        if config.pipeline.dedupe_redelivered {
            worker = worker.with_dedupe(config.pipeline.dedupe_capacity);
        }

        info!(
            api_url = %config.delivery.api_url,
            incoming_dir = %config.storage.incoming_dir().display(),
            dedupe = config.pipeline.dedupe_redelivered,
            "relay started"
        );

        let worker = tokio::spawn(worker.run(batches_rx, shutdown.clone()));
        let dispatcher = tokio::spawn(
            Dispatcher::new(lifecycle, batches_tx).run(events_rx, shutdown.clone()),
        );

        Ok(Self {
            shutdown,
            sessions,
            dispatcher,
            worker,
        })
    }

    /// Observe the current session handle.
    pub fn sessions(&self) -> SessionWatch {
        self.sessions.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting events, cancel reconnects, close the session, and wait
    /// for the in-flight message to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (name, task) in [("dispatcher", self.dispatcher), ("worker", self.worker)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "relay task ended abnormally");
            }
        }
    }
}
