//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionManager`: login/logout, profile refresh, and the
//!   refresh-and-retry wrapper every authenticated call goes through
//! - `CredentialStore`: durable persistence of tokens, the cached profile
//!   and the device id, with file, OS keychain and in-memory backends
//!
//! A 401 from the server triggers at most one token refresh per call,
//! shared between concurrent callers. A failed refresh logs the user out.

pub mod credentials;
pub mod session;

pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    StoreError,
};
pub use session::{NewAccount, Session, SessionManager};
