use std::{path::Path, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use {
    mediarelay_config::{Severity, validate},
    mediarelay_pipeline::Relay,
    mediarelay_whatsapp::{FileCredentialStore, SidecarConnector},
};

use crate::config_commands::load_effective;

/// Start the relay and run until SIGINT/SIGTERM.
///
/// Any error before the relay is running is returned, which exits with
/// status 1.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = load_effective(config_path)?;

    let report = validate(&config);
    for d in &report.diagnostics {
        match d.severity {
            Severity::Error => error!(path = d.path, "{}", d.message),
            Severity::Warning => warn!(path = d.path, "{}", d.message),
        }
    }
    if report.has_errors() {
        bail!("invalid configuration, run `mediarelay config check` for details");
    }

    let store = Arc::new(FileCredentialStore::new(&config.storage.auth_dir));
    let connector = Arc::new(SidecarConnector::from_config(Arc::clone(&store) as _, &config));

    let relay = match Relay::start(&config, Arc::clone(&connector) as _, store).await {
        Ok(relay) => relay,
        Err(e) => {
            connector.shutdown().await;
            return Err(e).context("failed to start relay");
        },
    };

    shutdown_signal().cancelled().await;

    info!("shutting down");
    relay.shutdown().await;
    connector.shutdown().await;
    info!("mediarelay stopped");
    Ok(())
}

/// Token cancelled on SIGINT (Ctrl+C) or SIGTERM.
fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C)"),
                        _ = sigterm.recv() => info!("received SIGTERM"),
                    }
                },
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("received SIGINT (Ctrl+C)");
                },
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C");
        }

        trigger.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}
