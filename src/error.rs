//! Error types shared by the client, the token store and the refresh flow.
//!
//! All errors are `Clone`: a single refresh failure is handed to every request
//! that was queued behind it.

use reqwest::StatusCode;

/// Failures of the token store backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("token store io error: {0}")]
    Io(String),
    #[error("token store serialization error: {0}")]
    Serde(String),
}

/// Why a token refresh did not produce a new token pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("refresh token has expired")]
    RefreshTokenExpired,
    #[error("refresh request failed: {0}")]
    Network(String),
    #[error("refresh endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    #[error("token store unavailable during refresh: {0}")]
    Store(String),
    #[error("refresh was abandoned before it settled")]
    Abandoned,
    #[error("session was reset while the refresh was in flight")]
    SessionReset,
}

/// Errors surfaced to callers of [`crate::client::AuthClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("request to '{path}' failed: {message}")]
    Network { path: String, message: String },
    #[error("request to '{path}' returned {status}")]
    Status {
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("token refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Refresh(RefreshError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// True for the 401/403 answers that may be recovered by a token refresh.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}
