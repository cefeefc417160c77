//! Attendance, leave requests and history.
//!
//! Every call goes through `SessionManager::authorized`, so an expired
//! access token is refreshed transparently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::ApiRequest;
use crate::auth::SessionManager;
use crate::error::Error;
use crate::models::request::NewRequest;
use crate::models::{AttendanceType, HistoryEntry, HistoryResponse, LeaveRequest, RequestKind};

const ATTENDANCE_PATH: &str = "/api/attendance";
const REQUESTS_PATH: &str = "/api/requests";
const HISTORY_PATH: &str = "/api/history";

/// A location fix in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Result<Self, Error> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidInput(format!("Latitude out of range: {}", lat)));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(Error::InvalidInput(format!("Longitude out of range: {}", lng)));
        }
        Ok(Self { lat, lng })
    }
}

#[derive(Serialize)]
struct AttendanceBody {
    #[serde(rename = "Type")]
    direction: AttendanceType,
    #[serde(rename = "DeviceID")]
    device_id: u64,
    #[serde(rename = "Lat")]
    lat: f64,
    #[serde(rename = "Lng")]
    lng: f64,
}

#[derive(Clone)]
pub struct AttendanceService {
    session: SessionManager,
}

impl AttendanceService {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Record a check-in or check-out from this device.
    ///
    /// The profile is refetched afterwards so the cached last status
    /// follows the server; a failed refetch is only logged.
    pub async fn check(&self, direction: AttendanceType, at: Coordinates) -> Result<(), Error> {
        if !self.session.is_logged_in().await {
            return Err(Error::AuthenticationRequired);
        }
        let device_id = self
            .session
            .device_id()
            .await
            .ok_or(Error::DeviceNotRegistered)?;

        let body = AttendanceBody {
            direction,
            device_id,
            lat: at.lat,
            lng: at.lng,
        };
        let request = ApiRequest::post(ATTENDANCE_PATH).json(&body)?;
        self.session.authorized(&request).await?;
        info!(direction = %direction, device_id, "Attendance recorded");

        if let Err(e) = self.session.fetch_profile().await {
            warn!(error = %e, "Failed to refresh profile after attendance");
        }
        Ok(())
    }

    pub async fn check_in(&self, at: Coordinates) -> Result<(), Error> {
        self.check(AttendanceType::In, at).await
    }

    pub async fn check_out(&self, at: Coordinates) -> Result<(), Error> {
        self.check(AttendanceType::Out, at).await
    }

    /// Submit a leave, overtime, holiday-work or promotion request
    pub async fn create_request(
        &self,
        kind: RequestKind,
        reason: &str,
        date: DateTime<Utc>,
    ) -> Result<LeaveRequest, Error> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::InvalidInput("Reason is required".to_string()));
        }

        let request = ApiRequest::post(REQUESTS_PATH).json(&NewRequest::new(kind, reason, date))?;
        let created: LeaveRequest = self.session.authorized_json(&request).await?;
        info!(id = created.id, kind = %kind, "Request submitted");
        Ok(created)
    }

    pub async fn fetch_requests(&self) -> Result<Vec<LeaveRequest>, Error> {
        let requests: Vec<LeaveRequest> = self
            .session
            .authorized_json(&ApiRequest::get(REQUESTS_PATH))
            .await?;
        debug!(count = requests.len(), "Fetched requests");
        Ok(requests)
    }

    /// Attendance logs and requests merged into one feed, newest first
    pub async fn fetch_history(&self) -> Result<Vec<HistoryEntry>, Error> {
        let response: HistoryResponse = self
            .session
            .authorized_json(&ApiRequest::get(HISTORY_PATH))
            .await?;
        debug!(
            logs = response.logs().len(),
            requests = response.requests().len(),
            "Fetched history"
        );
        Ok(response.into_entries())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::api::ApiClient;
    use crate::auth::{MemoryCredentialStore, Session};
    use crate::models::{DeviceIdentity, HistoryKind};

    fn service(server: &MockServer, device_id: Option<u64>) -> AttendanceService {
        let session = Session {
            access_token: Some("T1".into()),
            refresh_token: Some("R1".into()),
            user: None,
            device_id,
        };
        let store = Arc::new(MemoryCredentialStore::with_session(session));
        let manager = SessionManager::new(
            ApiClient::new(server.uri()).unwrap(),
            store,
            DeviceIdentity::new("install-1", "linux"),
        );
        AttendanceService::new(manager)
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(35.6892, 51.389).is_ok());
        assert!(Coordinates::new(90.0, -180.0).is_ok());
        assert!(Coordinates::new(90.1, 0.0).is_err());
        assert!(Coordinates::new(0.0, 181.0).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_check_in_posts_device_and_location() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/attendance"))
            .and(header("Authorization", "Bearer T1"))
            .and(body_json(serde_json::json!({
                "Type": "IN",
                "DeviceID": 42,
                "Lat": 35.5,
                "Lng": 51.25
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "ok"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user": {"id": 1, "email": "a@b.com", "last_status": "IN"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let service = service(&server, Some(42));

        service
            .check_in(Coordinates::new(35.5, 51.25).unwrap())
            .await
            .unwrap();

        let user = service.session().user().await.unwrap();
        assert_eq!(user.last_attendance(), Some(AttendanceType::In));
    }

    #[tokio::test]
    async fn test_check_out_survives_failed_profile_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/attendance"))
            .and(body_json(serde_json::json!({"Type": "OUT", "DeviceID": 7, "Lat": 1.0, "Lng": 2.0})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/profile"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let service = service(&server, Some(7));

        service
            .check_out(Coordinates::new(1.0, 2.0).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_check_requires_registered_device() {
        let server = MockServer::start().await;
        let service = service(&server, None);

        let err = service
            .check_in(Coordinates::new(0.0, 0.0).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotRegistered));
        assert_eq!(err.user_message(), "Device not registered");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attendance_rejection_surfaces_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/attendance"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(serde_json::json!({"error": "already checked in"})),
            )
            .mount(&server)
            .await;
        let service = service(&server, Some(42));

        let err = service
            .check_in(Coordinates::new(0.0, 0.0).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "already checked in");
    }

    #[tokio::test]
    async fn test_create_request_formats_date() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/requests"))
            .and(body_json(serde_json::json!({
                "type": "Holiday Work",
                "reason": "release weekend",
                "date": "2026-02-01T00:00:00.000Z"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 3,
                "type": "Holiday Work",
                "reason": "release weekend",
                "status": "pending",
                "date": "2026-02-01T00:00:00Z",
                "created_at": "2026-01-20T09:30:00Z",
                "user_id": 1
            })))
            .expect(1)
            .mount(&server)
            .await;
        let service = service(&server, Some(42));

        let date = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let created = service
            .create_request(RequestKind::HolidayWork, " release weekend ", date)
            .await
            .unwrap();
        assert_eq!(created.id, 3);
        assert_eq!(created.status, "pending");

        let err = service
            .create_request(RequestKind::Leave, "   ", date)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fetch_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/requests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "type": "Leave", "reason": "a", "status": "approved",
                 "date": "2026-01-02T00:00:00Z", "created_at": "2026-01-01T00:00:00Z"},
                {"id": 2, "type": "Overtime", "reason": "b", "status": "pending",
                 "date": "2026-01-03T00:00:00Z", "created_at": "2026-01-01T01:00:00Z"}
            ])))
            .mount(&server)
            .await;
        let service = service(&server, Some(42));

        let requests = service.fetch_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].kind, "Overtime");
    }

    #[tokio::test]
    async fn test_fetch_history_merges_newest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "logs": [
                    {"id": 1, "device_id": 42, "type": "IN", "lat": 0.0, "lng": 0.0,
                     "created_at": "2026-01-20T08:00:00Z"}
                ],
                "requests": [
                    {"id": 9, "type": "Leave", "reason": "trip", "status": "pending",
                     "date": "2026-02-01T00:00:00Z", "created_at": "2026-01-20T12:00:00Z"}
                ]
            })))
            .mount(&server)
            .await;
        let service = service(&server, Some(42));

        let entries = service.fetch_history().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].kind, HistoryKind::Request { .. }));
        assert!(matches!(entries[1].kind, HistoryKind::Attendance { .. }));
    }

    #[tokio::test]
    async fn test_fetch_history_with_null_arrays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"logs": null})),
            )
            .mount(&server)
            .await;
        let service = service(&server, Some(42));

        assert!(service.fetch_history().await.unwrap().is_empty());
    }
}
