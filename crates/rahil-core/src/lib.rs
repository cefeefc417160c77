//! Core library for the Rahil attendance client.
//!
//! - `api`: one-shot HTTP calls and outcome classification
//! - `auth`: session state, token refresh and credential persistence
//! - `attendance`: check-in/out, requests and history
//! - `config`: on-disk configuration and wiring of the pieces above

pub mod api;
pub mod attendance;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use attendance::{AttendanceService, Coordinates};
pub use auth::{CredentialStore, NewAccount, Session, SessionManager};
pub use config::{Config, CredentialBackend};
pub use error::Error;
