//! Lifecycle of the Baileys sidecar process: locate, build, spawn, stop.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
        sync::Mutex,
    },
    tracing::{debug, error, info, warn},
};

/// Where the sidecar lives relative to an install prefix or checkout.
const SIDECAR_REL_PATH: &str = "sidecar/whatsapp-baileys";

/// How long to wait for a graceful exit before killing.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How long a fresh process must survive to count as started.
const STARTUP_PROBE: Duration = Duration::from_millis(500);

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM (Unix) then wait; kill if it does not exit in time.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping WhatsApp sidecar process");

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };
            if let Ok(pid) = i32::try_from(pid) {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "WhatsApp sidecar process exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar did not exit after SIGTERM, killing");
                self.child
                    .kill()
                    .await
                    .context("failed to kill sidecar process")?;
            },
        }
        Ok(())
    }
}

/// Settings for spawning the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory containing the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    /// Port for the sidecar WebSocket server.
    pub port: u16,
    /// Directory the sidecar keeps Baileys auth state in.
    pub auth_dir: PathBuf,
}

/// Shared, lazily started sidecar process.
pub type SharedSidecarProcess = Arc<Mutex<Option<SidecarProcess>>>;

fn has_manifest(dir: &Path) -> bool {
    dir.join("package.json").is_file()
}

/// Locate the sidecar checkout.
///
/// Order: explicit path (`session.sidecar_dir`), next to the executable
/// (installed and `cargo run` layouts), then relative to the working dir.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if has_manifest(path) {
            return Ok(path.to_path_buf());
        }
        bail!("no package.json in sidecar directory {}", path.display());
    }

    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        candidates.push(exe_dir.join("..").join(SIDECAR_REL_PATH));
        candidates.push(exe_dir.join("../..").join(SIDECAR_REL_PATH));
    }
    for prefix in [".", "..", "../.."] {
        candidates.push(Path::new(prefix).join(SIDECAR_REL_PATH));
    }

    candidates
        .into_iter()
        .find(|dir| has_manifest(dir))
        .map(|dir| dir.canonicalize().unwrap_or(dir))
        .with_context(|| {
            format!(
                "WhatsApp sidecar not found: set session.sidecar_dir or provide {SIDECAR_REL_PATH}/package.json"
            )
        })
}

/// Spawn the sidecar, building it first if `dist/index.js` is missing.
pub async fn start_sidecar(config: &SidecarConfig) -> Result<SidecarProcess> {
    let dir = &config.sidecar_dir;
    if !has_manifest(dir) {
        bail!("WhatsApp sidecar not found at {}", dir.display());
    }

    if !dir.join("dist/index.js").exists() {
        info!(path = %dir.display(), "building WhatsApp sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = config.port, "starting WhatsApp sidecar process");

    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(dir)
        .env("MEDIARELAY_SIDECAR_PORT", config.port.to_string())
        .env("MEDIARELAY_AUTH_DIR", &config.auth_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn sidecar process")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, true));
    }

    tokio::time::sleep(STARTUP_PROBE).await;
    if let Some(status) = child
        .try_wait()
        .context("failed to check sidecar process status")?
    {
        bail!("sidecar process exited immediately with status: {status}");
    }

    info!(port = config.port, "WhatsApp sidecar process started");
    Ok(SidecarProcess {
        child,
        port: config.port,
    })
}

/// Re-emit sidecar output through tracing. Pino JSON lines keep their level.
async fn forward_output(stream: impl AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(target: "whatsapp_sidecar", "{line}");
            continue;
        }
        match parse_pino_line(&line) {
            Some((level, msg)) => match level {
                0..=20 => debug!(target: "whatsapp_sidecar", "{msg}"),
                21..=30 => info!(target: "whatsapp_sidecar", "{msg}"),
                31..=40 => warn!(target: "whatsapp_sidecar", "{msg}"),
                _ => error!(target: "whatsapp_sidecar", "{msg}"),
            },
            None => info!(target: "whatsapp_sidecar", "{line}"),
        }
    }
}

/// Extract `(level, msg)` from a pino JSON log line.
fn parse_pino_line(line: &str) -> Option<(u64, String)> {
    if !line.starts_with('{') {
        return None;
    }
    let log: serde_json::Value = serde_json::from_str(line).ok()?;
    let level = log.get("level").and_then(serde_json::Value::as_u64).unwrap_or(30);
    let msg = log
        .get("msg")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(line)
        .to_string();
    Some((level, msg))
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    let label = args.join(" ");
    info!(path = %dir.display(), "running npm {label} for sidecar");

    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run npm {label}"))?;

    if !output.status.success() {
        bail!(
            "npm {label} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}
