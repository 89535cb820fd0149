//! SessionManager - passage session lifecycle
//!
//! ## Responsibilities
//!
//! - ENTRY: open one session per (plate, lot); duplicates are a logged no-op
//! - EXIT: complete the OPEN session and compute its duration
//! - Retry store faults without creating duplicate rows
//!
//! ## Idempotency
//!
//! The session id and exit time are fixed before the first attempt. A retry
//! that finds its own earlier write already applied reports it as success.

use crate::access_store::{InsertOutcome, NewSession, OccupancyStats, Session, SessionStore};
use crate::error::{Error, Result};
use crate::models::{CanonicalPlate, Direction};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of `open_session`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionOpen {
    Created(Session),
    /// Plate already had an OPEN session in this lot; returned unchanged
    AlreadyOpen(Session),
}

impl SessionOpen {
    pub fn session(&self) -> &Session {
        match self {
            SessionOpen::Created(s) | SessionOpen::AlreadyOpen(s) => s,
        }
    }
}

/// Result of `close_session`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionClose {
    Closed(Session),
    /// Exit without a matching entry
    NotFound,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionManagerConfig {
    /// Bound on each store attempt
    pub store_timeout: Duration,
    /// Attempts per write, including the first
    pub write_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            write_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    config: SessionManagerConfig,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, config: SessionManagerConfig) -> Self {
        Self { sessions, config }
    }

    /// Open a session for an authorized ENTRY
    pub async fn open_session(
        &self,
        plate: &CanonicalPlate,
        lane: Direction,
        lot_id: &str,
    ) -> Result<SessionOpen> {
        let request = NewSession {
            session_id: Uuid::new_v4().to_string(),
            plate_id: plate.as_str().to_string(),
            lot_id: lot_id.to_string(),
            direction: lane,
            entry_time: Utc::now().trunc_subsecs(0),
        };

        let mut attempt = 1;
        loop {
            match self
                .bounded(self.sessions.insert_open_if_absent(request.clone()))
                .await
            {
                Ok(InsertOutcome::Created(session)) => {
                    tracing::info!(
                        lane = %lane,
                        plate = %plate,
                        lot_id = %lot_id,
                        session_id = %session.session_id,
                        "Session opened"
                    );
                    return Ok(SessionOpen::Created(session));
                }
                Ok(InsertOutcome::AlreadyOpen(session))
                    if session.session_id == request.session_id =>
                {
                    // An earlier attempt landed before its reply was lost
                    tracing::info!(
                        lane = %lane,
                        plate = %plate,
                        session_id = %session.session_id,
                        attempt = attempt,
                        "Session opened (confirmed on retry)"
                    );
                    return Ok(SessionOpen::Created(session));
                }
                Ok(InsertOutcome::AlreadyOpen(session)) => {
                    tracing::warn!(
                        lane = %lane,
                        plate = %plate,
                        lot_id = %lot_id,
                        session_id = %session.session_id,
                        entry_time = %session.entry_time,
                        "Entry for plate with open session, no new session created"
                    );
                    return Ok(SessionOpen::AlreadyOpen(session));
                }
                Err(e) => {
                    self.retry_or_fail(e, lane, plate, "open", attempt).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Complete the OPEN session for an authorized EXIT
    pub async fn close_session(
        &self,
        plate: &CanonicalPlate,
        lane: Direction,
        lot_id: &str,
    ) -> Result<SessionClose> {
        let exit_time = Utc::now().trunc_subsecs(0);

        let mut attempt = 1;
        loop {
            let result = self
                .bounded(self.sessions.complete_open(plate.as_str(), lot_id, exit_time))
                .await;

            match result {
                Ok(Some(session)) => {
                    tracing::info!(
                        lane = %lane,
                        plate = %plate,
                        lot_id = %lot_id,
                        session_id = %session.session_id,
                        duration_sec = ?session.duration_seconds,
                        "Session completed"
                    );
                    return Ok(SessionClose::Closed(session));
                }
                Ok(None) => {
                    if attempt > 1 {
                        if let Some(session) = self
                            .confirm_completed(plate.as_str(), lot_id, exit_time)
                            .await?
                        {
                            tracing::info!(
                                lane = %lane,
                                plate = %plate,
                                session_id = %session.session_id,
                                attempt = attempt,
                                "Session completed (confirmed on retry)"
                            );
                            return Ok(SessionClose::Closed(session));
                        }
                    }

                    tracing::warn!(
                        lane = %lane,
                        plate = %plate,
                        lot_id = %lot_id,
                        "Exit without matching entry session"
                    );
                    return Ok(SessionClose::NotFound);
                }
                Err(e) => {
                    self.retry_or_fail(e, lane, plate, "close", attempt).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// OPEN sessions in a lot
    pub async fn open_sessions(&self, lot_id: &str) -> Result<Vec<Session>> {
        self.bounded(self.sessions.list_open(lot_id)).await
    }

    pub async fn occupancy(&self, lot_id: &str, since: DateTime<Utc>) -> Result<OccupancyStats> {
        self.bounded(self.sessions.occupancy(lot_id, since)).await
    }

    async fn confirm_completed(
        &self,
        plate_id: &str,
        lot_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let session = self
            .bounded(self.sessions.find_completed_since(plate_id, lot_id, exit_time))
            .await?;
        Ok(session.filter(|s| s.exit_time == Some(exit_time)))
    }

    /// Sleep before the next attempt, or give up with the error
    async fn retry_or_fail(
        &self,
        error: Error,
        lane: Direction,
        plate: &CanonicalPlate,
        operation: &'static str,
        attempt: u32,
    ) -> Result<()> {
        if error.is_store_unavailable() && attempt < self.config.write_attempts {
            tracing::warn!(
                lane = %lane,
                plate = %plate,
                operation = operation,
                attempt = attempt,
                error = %error,
                "Session write failed, retrying"
            );
            tokio::time::sleep(self.config.retry_backoff).await;
            return Ok(());
        }

        tracing::error!(
            lane = %lane,
            plate = %plate,
            operation = operation,
            attempts = attempt,
            error_code = error.code(),
            error = %error,
            "Session write failed"
        );
        Err(error)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| {
                Error::StoreUnavailable(format!(
                    "session store call exceeded {}ms",
                    self.config.store_timeout.as_millis()
                ))
            })?
    }
}
