use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of request a user can file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Leave,
    Overtime,
    #[serde(rename = "Holiday Work")]
    HolidayWork,
    Promotion,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] = [
        RequestKind::Leave,
        RequestKind::Overtime,
        RequestKind::HolidayWork,
        RequestKind::Promotion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Leave => "Leave",
            RequestKind::Overtime => "Overtime",
            RequestKind::HolidayWork => "Holiday Work",
            RequestKind::Promotion => "Promotion",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = String;

    /// Accepts the wire name in any case, with spaces, dashes or underscores
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "leave" => Ok(RequestKind::Leave),
            "overtime" => Ok(RequestKind::Overtime),
            "holidaywork" => Ok(RequestKind::HolidayWork),
            "promotion" => Ok(RequestKind::Promotion),
            _ => Err(format!("unknown request kind: {}", s)),
        }
    }
}

/// A request record as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: u64,
    /// Kind as reported by the server; may include kinds this client doesn't know
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub status: String,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: u64,
}

/// Body of `POST /api/requests`
#[derive(Debug, Clone, Serialize)]
pub(crate) struct NewRequest<'a> {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub reason: &'a str,
    pub date: String,
}

impl<'a> NewRequest<'a> {
    pub fn new(kind: RequestKind, reason: &'a str, date: DateTime<Utc>) -> Self {
        Self {
            kind,
            reason,
            date: format_request_date(date),
        }
    }
}

/// ISO-8601 in UTC with millisecond fractional seconds, e.g. `2026-01-20T10:00:00.000Z`
pub fn format_request_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}
