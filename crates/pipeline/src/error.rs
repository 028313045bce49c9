use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] mediarelay_common::Error),

    #[error("failed to {action} {path}: {source}")]
    Storage {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("delivery to {url} failed: {source}")]
    Delivery {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("QR code generation failed: {0}")]
    Qr(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn storage(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn delivery(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Delivery {
            url: url.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
