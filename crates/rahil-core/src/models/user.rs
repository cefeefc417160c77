use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of an attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceType {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl AttendanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceType::In => "IN",
            AttendanceType::Out => "OUT",
        }
    }
}

impl fmt::Display for AttendanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(AttendanceType::In),
            "OUT" => Ok(AttendanceType::Out),
            other => Err(format!("unknown attendance type: {}", other)),
        }
    }
}

/// Server-reported user record, cached locally between launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub email: String,
    pub name: Option<String>,
    pub position: Option<String>,
    pub image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Password-change marker. The server never returns the password itself.
    pub password: Option<String>,
    pub biometric_enabled: Option<bool>,
    /// "IN", "OUT", or unset before the first check-in
    pub last_status: Option<String>,
    pub last_status_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Last attendance direction, if the server reported a recognizable one
    pub fn last_attendance(&self) -> Option<AttendanceType> {
        self.last_status.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.email)
    }
}

/// Envelope returned by `GET /api/profile`
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub user: UserProfile,
}

/// Partial profile edit. Empty or missing fields are left out of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub position: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl ProfileUpdate {
    /// Build the PATCH body, omitting empty fields
    pub fn to_body(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut body = serde_json::Map::new();
        let fields = [
            ("name", &self.name),
            ("position", &self.position),
            ("email", &self.email),
            ("password", &self.password),
        ];
        for (key, value) in fields {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                body.insert(key.to_string(), serde_json::Value::String(v.to_string()));
            }
        }
        body
    }

    pub fn is_empty(&self) -> bool {
        self.to_body().is_empty()
    }

    pub fn changes_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}
