use std::error::Error as StdError;

use thiserror::Error;

/// Errors surfaced by session implementations and credential stores.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    /// The session is not connected or has been replaced.
    #[error("session unavailable: {message}")]
    Unavailable { message: String },

    /// A request to the session did not complete in time.
    #[error("session request timed out: {operation}")]
    Timeout { operation: String },

    /// The session answered a request with an error.
    #[error("session rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
