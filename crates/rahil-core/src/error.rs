use std::sync::Arc;

use thiserror::Error;

use crate::api::ApiError;
use crate::auth::StoreError;

/// Errors surfaced by the session manager and the domain operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Authentication required - please log in")]
    AuthenticationRequired,

    /// An authenticated call was rejected and the session could not be refreshed.
    /// The session has been logged out.
    #[error("Session ended: {original} (refresh failed: {cause})")]
    SessionEnded {
        original: ApiError,
        #[source]
        cause: Arc<Error>,
    },

    /// A refresh shared with other tasks failed
    #[error("Token refresh failed: {0}")]
    Refresh(Arc<Error>),

    #[error("Device not registered")]
    DeviceNotRegistered,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Credential storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl Error {
    /// Recover an owned error from a shared refresh outcome when possible
    pub(crate) fn unshare(err: Arc<Error>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Error::Refresh)
    }

    /// True when the user has to log in again before retrying
    pub fn requires_login(&self) -> bool {
        match self {
            Error::Api(e) => e.is_unauthorized(),
            Error::AuthenticationRequired | Error::SessionEnded { .. } | Error::Refresh(_) => true,
            _ => false,
        }
    }

    /// Human-readable message for display. Never includes transport details.
    pub fn user_message(&self) -> String {
        match self {
            Error::Api(ApiError::Server { message, .. }) => message.clone(),
            _ if self.requires_login() => "Session expired. Please log in again.".to_string(),
            Error::DeviceNotRegistered => "Device not registered".to_string(),
            Error::InvalidInput(msg) => msg.clone(),
            _ => "Operation failed. Please try again.".to_string(),
        }
    }
}
