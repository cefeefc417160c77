//! Data models for the attendance service.
//!
//! This module contains the wire and domain types exchanged with the
//! backend:
//!
//! - `UserProfile`, `AttendanceType`: the signed-in user and their last status
//! - `AuthTokens`: access/refresh pair returned by login and refresh
//! - `DeviceIdentity`, `DeviceRegistration`: installation registration
//! - `LeaveRequest`, `RequestKind`: leave/overtime requests
//! - `AttendanceLog`, `HistoryEntry`: the merged activity feed

pub mod auth;
pub mod device;
pub mod history;
pub mod request;
pub mod user;

pub use auth::AuthTokens;
pub use device::{DeviceIdentity, DeviceRegistration};
pub use history::{AttendanceLog, HistoryEntry, HistoryKind, HistoryResponse};
pub use request::{LeaveRequest, RequestKind};
pub use user::{AttendanceType, ProfileResponse, ProfileUpdate, UserProfile};
