use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LeaveRequest;

/// One check-in or check-out recorded by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceLog {
    pub id: u64,
    #[serde(default)]
    pub user_id: u64,
    pub device_id: u64,
    /// "IN" or "OUT"
    #[serde(rename = "type")]
    pub direction: String,
    pub lat: f64,
    pub lng: f64,
    pub created_at: DateTime<Utc>,
}

/// Reply from `GET /api/history`. Either array may be missing or null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    logs: Option<Vec<AttendanceLog>>,
    #[serde(default)]
    requests: Option<Vec<LeaveRequest>>,
}

impl HistoryResponse {
    pub fn logs(&self) -> &[AttendanceLog] {
        self.logs.as_deref().unwrap_or_default()
    }

    pub fn requests(&self) -> &[LeaveRequest] {
        self.requests.as_deref().unwrap_or_default()
    }

    /// Merge logs and requests into one feed, newest first.
    /// Entries with equal timestamps keep logs ahead of requests.
    pub fn into_entries(self) -> Vec<HistoryEntry> {
        let logs = self.logs.unwrap_or_default().into_iter().map(|log| HistoryEntry {
            time: log.created_at,
            kind: HistoryKind::Attendance {
                direction: log.direction,
                device_id: log.device_id,
            },
        });
        let requests = self.requests.unwrap_or_default().into_iter().map(|req| HistoryEntry {
            time: req.created_at,
            kind: HistoryKind::Request {
                kind: req.kind,
                reason: req.reason,
                status: req.status,
            },
        });

        let mut entries: Vec<HistoryEntry> = logs.chain(requests).collect();
        entries.sort_by(|a, b| b.time.cmp(&a.time));
        entries
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub time: DateTime<Utc>,
    pub kind: HistoryKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryKind {
    Attendance { direction: String, device_id: u64 },
    Request { kind: String, reason: String, status: String },
}
