//! Error types for Carpenter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A job request failed validation. The message is shown verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The build executor failed. `output` carries whatever the build tool
    /// printed, if anything.
    #[error("{message}")]
    Build {
        message: String,
        output: Option<String>,
    },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("head store error: {0}")]
    Store(String),

    #[error("status sink error: {0}")]
    Status(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build tool output attached to the error, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::Build { output, .. } => output.as_deref(),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
