use std::path::Path;

use {
    anyhow::{Context, Result},
    clap::Subcommand,
};

use mediarelay_config::{MediarelayConfig, Severity, validate};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file, then environment) as TOML.
    Show,
    /// Validate the effective configuration and report errors/warnings.
    Check,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    let config = load_effective(path)?;
    match action {
        ConfigAction::Show => {
            let rendered =
                toml::to_string_pretty(&config).context("failed to render config as TOML")?;
            println!("{rendered}");
            Ok(())
        },
        ConfigAction::Check => check(&config),
    }
}

/// Load the config file (explicit or discovered) and apply env overrides.
pub fn load_effective(path: Option<&Path>) -> Result<MediarelayConfig> {
    let mut config = match path {
        Some(path) => mediarelay_config::load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => mediarelay_config::discover_and_load(),
    };
    mediarelay_config::apply_env_overrides(&mut config);
    Ok(config)
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &MediarelayConfig) -> Result<()> {
    let result = validate(config);

    for d in &result.diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
    }

    let errors = result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    let warnings = result.diagnostics.len() - errors;

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("\n{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s)");
    }
    Ok(())
}
