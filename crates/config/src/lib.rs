//! Configuration loading, validation, and env substitution.
//!
//! Config files: `mediarelay.toml` or `mediarelay.json`
//! Searched in `./` then `~/.config/mediarelay/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw file, and `API_URL` /
//! `MEDIARELAY_*` overrides on top of it.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, apply_env_overrides_with, config_dir, discover_and_load, load_config},
    schema::{
        DEFAULT_API_URL, DEFAULT_SIDECAR_PORT, DeliveryConfig, MediarelayConfig, PipelineConfig,
        SessionConfig, StorageConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
