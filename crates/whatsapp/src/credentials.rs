//! File-backed [`CredentialStore`]: `{auth_dir}/creds.json`.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    tracing::{debug, info},
};

use mediarelay_common::{CredentialStore, Credentials, Error, Result};

const CREDS_FILE: &str = "creds.json";

/// Stores session credentials as JSON, replaced atomically on every update.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(auth_dir: impl AsRef<Path>) -> Self {
        Self {
            path: auth_dir.as_ref().join(CREDS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored credentials");
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&data)?;
        Ok(Some(Credentials(value)))
    }

    /// Replaces `creds.json` with the given snapshot.
    async fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(&credentials.0)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| Error::external(format!("write {}", tmp.display()), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::external(format!("replace {}", self.path.display()), e))?;

        info!(path = %self.path.display(), bytes = data.len(), "session credentials saved");
        Ok(())
    }
}
