//! Access store data types

use crate::models::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization for a plate in a lot (owned externally, read-only here)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub plate_id: String,
    pub lot_id: String,
    pub valid_from: DateTime<Utc>,
    /// `None` = no expiry (permanent parking)
    pub valid_until: Option<DateTime<Utc>>,
}

impl AuthorizationRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && self.valid_until.map_or(true, |until| now < until)
    }
}

/// Denylist entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateBlock {
    pub plate_id: String,
    pub lot_id: String,
    pub reason: Option<String>,
    /// `None` = blocked until removed
    pub blocked_until: Option<DateTime<Utc>>,
}

impl PlateBlock {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map_or(true, |until| now < until)
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Completed,
}

impl SessionStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "OPEN",
            SessionStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(SessionStatus::Open),
            "COMPLETED" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// One physical passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub plate_id: String,
    pub lot_id: String,
    /// Lane that opened the session
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub duration_seconds: Option<i64>,
}

impl Session {
    /// Close this session at `exit_time`
    pub fn completed_at(mut self, exit_time: DateTime<Utc>) -> Self {
        self.duration_seconds = Some((exit_time - self.entry_time).num_seconds());
        self.exit_time = Some(exit_time);
        self.status = SessionStatus::Completed;
        self
    }
}

/// Insert request; `session_id` is fixed by the caller so retries are idempotent
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub plate_id: String,
    pub lot_id: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
}

impl NewSession {
    pub fn into_session(self) -> Session {
        Session {
            session_id: self.session_id,
            plate_id: self.plate_id,
            lot_id: self.lot_id,
            direction: self.direction,
            entry_time: self.entry_time,
            exit_time: None,
            status: SessionStatus::Open,
            duration_seconds: None,
        }
    }
}

/// Result of an insert-if-no-OPEN-row
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Session),
    AlreadyOpen(Session),
}

/// Lot occupancy counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyStats {
    pub lot_id: String,
    pub vehicles_inside: i64,
    pub entries_since: i64,
    pub exits_since: i64,
    pub since: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_authorization_window() {
        let now = Utc::now();
        let record = AuthorizationRecord {
            plate_id: "KA01AB1234".into(),
            lot_id: "1".into(),
            valid_from: now - Duration::days(1),
            valid_until: Some(now + Duration::days(1)),
        };
        assert!(record.is_valid_at(now));
        assert!(!record.is_valid_at(now + Duration::days(2)));
        assert!(!record.is_valid_at(now - Duration::days(2)));
    }

    #[test]
    fn test_open_ended_authorization() {
        let now = Utc::now();
        let record = AuthorizationRecord {
            plate_id: "KA01AB1234".into(),
            lot_id: "1".into(),
            valid_from: now,
            valid_until: None,
        };
        assert!(record.is_valid_at(now + Duration::days(3650)));
    }

    #[test]
    fn test_completed_duration() {
        let entry = Utc::now();
        let session = NewSession {
            session_id: "s1".into(),
            plate_id: "KA01AB1234".into(),
            lot_id: "1".into(),
            direction: Direction::Entry,
            entry_time: entry,
        }
        .into_session()
        .completed_at(entry + Duration::seconds(95));
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.duration_seconds, Some(95));
    }
}
