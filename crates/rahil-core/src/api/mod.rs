//! REST API client module for the attendance service.
//!
//! This module provides the `ApiClient`, which performs exactly one HTTP
//! request/response cycle and classifies the outcome, and `ApiRequest`,
//! a replayable description of a request so the session layer can retry
//! it after refreshing the access token.
//!
//! The client never retries on its own. An HTTP 401 always surfaces as
//! `ApiError::Unauthorized`, which is the only signal the session layer
//! treats as an expired access token.

pub mod client;
pub mod error;
pub mod request;

pub use client::{decode, parse_image_url, ApiClient};
pub use error::ApiError;
pub use request::{ApiRequest, MultipartFile, RequestBody};
