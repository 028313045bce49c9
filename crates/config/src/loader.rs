use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::MediarelayConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["mediarelay.toml", "mediarelay.json"];

/// Environment variable naming the delivery endpoint.
pub const API_URL_ENV: &str = "API_URL";
/// Environment variable overriding the credential directory.
pub const AUTH_DIR_ENV: &str = "MEDIARELAY_AUTH_DIR";
/// Environment variable pointing at the sidecar checkout.
pub const SIDECAR_DIR_ENV: &str = "MEDIARELAY_SIDECAR_DIR";

/// Load config from the given path (TOML or JSON).
pub fn load_config(path: &Path) -> Result<MediarelayConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./mediarelay.{toml,json}` (project-local)
/// 2. `~/.config/mediarelay/mediarelay.{toml,json}` (user-global)
///
/// Returns `MediarelayConfig::default()` if no config file is found or the
/// file found cannot be parsed.
pub fn discover_and_load() -> MediarelayConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    MediarelayConfig::default()
}

/// Returns the user-global config directory (`~/.config/mediarelay/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "mediarelay").map(|d| d.config_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Apply environment overrides from the process environment.
pub fn apply_env_overrides(config: &mut MediarelayConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Apply environment overrides using a custom lookup. Empty values are
/// treated as unset.
pub fn apply_env_overrides_with(
    config: &mut MediarelayConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(API_URL_ENV) {
        debug!(api_url = %url, "delivery endpoint overridden from environment");
        config.delivery.api_url = url;
    }
    if let Some(dir) = get(AUTH_DIR_ENV) {
        config.storage.auth_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get(SIDECAR_DIR_ENV) {
        config.session.sidecar_dir = Some(PathBuf::from(dir));
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<MediarelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        }),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}
