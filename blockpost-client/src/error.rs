//! Client-level failures and the process exit status for each.

use std::path::PathBuf;

use blockpost_core::{AuthError, UploadError};

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("not logged in")]
    NotAuthenticated,
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("file not found or unreadable: {path}")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("local i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(self, ClientError::Upload(UploadError::IntegrityMismatch { .. }))
    }

    /// 2 connection, 3 authentication, 4 upload rejected, 5 integrity, 6 local file.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Connection(_) => 2,
            ClientError::Authentication(_) | ClientError::NotAuthenticated => 3,
            ClientError::Upload(UploadError::IntegrityMismatch { .. }) => 5,
            ClientError::Upload(_) => 4,
            ClientError::FileNotFound { .. } | ClientError::Io(_) => 6,
        }
    }
}
