//! Error taxonomy shared by the engine and its collaborators.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for upload engine operations.
#[derive(Error, Debug)]
pub enum UploadError {
    /// The service rejected the token (HTTP 401). Almost always a user-fixable problem.
    #[error("Authentication failed ({context}). Check the token passed with --token or GEONADIR_TOKEN.")]
    Auth { context: String },

    /// The request could not be completed at all (connection, DNS, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a non-2xx status other than 401.
    #[error("HTTP {status} from {context}")]
    Http { status: u16, context: String },

    /// Bad local input: unreadable directory, unparsable catalog, malformed metadata.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local file access failed
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A background task died before producing a result
    #[error("Task failed: {0}")]
    Task(String),
}

impl UploadError {
    pub fn auth(context: impl Into<String>) -> Self {
        UploadError::Auth {
            context: context.into(),
        }
    }

    pub fn http(status: u16, context: impl Into<String>) -> Self {
        UploadError::Http {
            status,
            context: context.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, UploadError::Auth { .. })
    }
}
