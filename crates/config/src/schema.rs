/// Config schema types (delivery, storage, session, pipeline).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Webhook used when neither the config file nor `API_URL` names one.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/webhook";

/// Default port for the Baileys sidecar WebSocket server.
pub const DEFAULT_SIDECAR_PORT: u16 = 18_790;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediarelayConfig {
    pub delivery: DeliveryConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
}

/// Downstream webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Endpoint that receives image notifications and PDF skip-signals.
    pub api_url: String,
    /// Upper bound for a single POST, in seconds.
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            timeout_secs: 30,
        }
    }
}

/// Local filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Credential store directory.
    pub auth_dir: PathBuf,
    /// Where downloaded images land. Defaults to `{auth_dir}/incoming`.
    pub incoming_dir: Option<PathBuf>,
    /// Pairing QR image. Defaults to `{auth_dir}/qr/qr.png`.
    pub qr_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("/app/auth"),
            incoming_dir: None,
            qr_path: None,
        }
    }
}

impl StorageConfig {
    pub fn incoming_dir(&self) -> PathBuf {
        self.incoming_dir
            .clone()
            .unwrap_or_else(|| self.auth_dir.join("incoming"))
    }

    pub fn qr_path(&self) -> PathBuf {
        self.qr_path
            .clone()
            .unwrap_or_else(|| self.auth_dir.join("qr").join("qr.png"))
    }
}

/// Messaging session and sidecar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay before a dropped session is rebuilt, in seconds.
    pub reconnect_delay_secs: u64,
    /// Timeout for session requests (group metadata, media download).
    pub request_timeout_secs: u64,
    /// Port of the sidecar WebSocket server.
    pub sidecar_port: u16,
    /// Directory holding the sidecar's `package.json`. Searched for when unset.
    pub sidecar_dir: Option<PathBuf>,
    /// Spawn and supervise the sidecar process. Disable to run it by hand.
    pub auto_start_sidecar: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 5,
            request_timeout_secs: 60,
            sidecar_port: DEFAULT_SIDECAR_PORT,
            sidecar_dir: None,
            auto_start_sidecar: true,
        }
    }
}

/// Message pipeline behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Drop message batches whose id was already processed (e.g. replays
    /// after a reconnect). Off by default: every delivery is processed.
    pub dedupe_redelivered: bool,
    /// How many recent message ids the dedupe window remembers.
    pub dedupe_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedupe_redelivered: false,
            dedupe_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_hangs_off_auth_dir() {
        let storage = StorageConfig::default();
        assert_eq!(storage.incoming_dir(), PathBuf::from("/app/auth/incoming"));
        assert_eq!(storage.qr_path(), PathBuf::from("/app/auth/qr/qr.png"));
    }

    #[test]
    fn explicit_paths_win() {
        let storage = StorageConfig {
            auth_dir: PathBuf::from("/data/auth"),
            incoming_dir: Some(PathBuf::from("/data/media")),
            qr_path: None,
        };
        assert_eq!(storage.incoming_dir(), PathBuf::from("/data/media"));
        assert_eq!(storage.qr_path(), PathBuf::from("/data/auth/qr/qr.png"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: MediarelayConfig = toml::from_str(
            r#"
            [delivery]
            api_url = "https://ocr.example.com/webhook"
            "#,
        )
        .expect("parse partial config");
        assert_eq!(cfg.delivery.api_url, "https://ocr.example.com/webhook");
        assert_eq!(cfg.delivery.timeout_secs, 30);
        assert_eq!(cfg.session.reconnect_delay_secs, 5);
        assert!(!cfg.pipeline.dedupe_redelivered);
    }
}
