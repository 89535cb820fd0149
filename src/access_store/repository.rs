//! AccessStore Repository
//!
//! MySQL access layer. The OPEN-session guard is the UNIQUE index on the
//! generated `open_key` column (see migrations/001_access_control.sql).

use super::types::*;
use super::{AuthorizationStore, SessionStore};
use crate::error::{Error, Result};
use crate::models::Direction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

/// AccessStore repository for database operations
#[derive(Clone)]
pub struct AccessRepository {
    pool: MySqlPool,
}

impl AccessRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    const SESSION_COLUMNS: &'static str = r#"
        session_id, plate_id, lot_id, direction, entry_time, exit_time,
        status, duration_seconds
    "#;

    fn session_from_row(row: &MySqlRow) -> Result<Session> {
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;

        Ok(Session {
            session_id: row.try_get("session_id")?,
            plate_id: row.try_get("plate_id")?,
            lot_id: row.try_get("lot_id")?,
            direction: direction.parse::<Direction>()?,
            entry_time: row.try_get("entry_time")?,
            exit_time: row.try_get("exit_time")?,
            status: SessionStatus::from_db_str(&status)
                .ok_or_else(|| Error::Internal(format!("unknown session status: {}", status)))?,
            duration_seconds: row.try_get("duration_seconds")?,
        })
    }

    async fn find_session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {} FROM parking_sessions WHERE session_id = ?",
            Self::SESSION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }
}

#[async_trait]
impl AuthorizationStore for AccessRepository {
    async fn find_valid_authorization(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT plate_id, lot_id, valid_from, valid_until
            FROM authorizations
            WHERE plate_id = ? AND lot_id = ?
              AND valid_from <= ?
              AND (valid_until IS NULL OR valid_until > ?)
            ORDER BY valid_from DESC
            LIMIT 1
            "#,
        )
        .bind(plate_id)
        .bind(lot_id)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(AuthorizationRecord {
                plate_id: r.try_get("plate_id")?,
                lot_id: r.try_get("lot_id")?,
                valid_from: r.try_get("valid_from")?,
                valid_until: r.try_get("valid_until")?,
            })
        })
        .transpose()
    }

    async fn find_active_block(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PlateBlock>> {
        let row = sqlx::query(
            r#"
            SELECT plate_id, lot_id, reason, blocked_until
            FROM plate_blocks
            WHERE plate_id = ? AND lot_id = ?
              AND (blocked_until IS NULL OR blocked_until > ?)
            LIMIT 1
            "#,
        )
        .bind(plate_id)
        .bind(lot_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(PlateBlock {
                plate_id: r.try_get("plate_id")?,
                lot_id: r.try_get("lot_id")?,
                reason: r.try_get("reason")?,
                blocked_until: r.try_get("blocked_until")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl SessionStore for AccessRepository {
    async fn insert_open_if_absent(&self, session: NewSession) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO parking_sessions (
                session_id, plate_id, lot_id, direction, entry_time, status
            ) VALUES (?, ?, ?, ?, ?, 'OPEN')
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.plate_id)
        .bind(&session.lot_id)
        .bind(session.direction.as_db_str())
        .bind(session.entry_time)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created(session.into_session())),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // Either our own earlier attempt landed or another row is OPEN
                if let Some(own) = self.find_session_by_id(&session.session_id).await? {
                    return Ok(InsertOutcome::Created(own));
                }
                self.find_open(&session.plate_id, &session.lot_id)
                    .await?
                    .map(InsertOutcome::AlreadyOpen)
                    .ok_or_else(|| {
                        Error::Conflict(format!(
                            "open session for {} in lot {} vanished during insert",
                            session.plate_id, session.lot_id
                        ))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete_open(
        &self,
        plate_id: &str,
        lot_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "SELECT {} FROM parking_sessions WHERE plate_id = ? AND lot_id = ? AND status = 'OPEN' FOR UPDATE",
            Self::SESSION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(plate_id)
            .bind(lot_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let completed = Self::session_from_row(&row)?.completed_at(exit_time);

        sqlx::query(
            r#"
            UPDATE parking_sessions
            SET status = 'COMPLETED', exit_time = ?, duration_seconds = ?
            WHERE session_id = ? AND status = 'OPEN'
            "#,
        )
        .bind(exit_time)
        .bind(completed.duration_seconds)
        .bind(&completed.session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(completed))
    }

    async fn find_open(&self, plate_id: &str, lot_id: &str) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {} FROM parking_sessions WHERE plate_id = ? AND lot_id = ? AND status = 'OPEN'",
            Self::SESSION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(plate_id)
            .bind(lot_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn find_completed_since(
        &self,
        plate_id: &str,
        lot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {} FROM parking_sessions WHERE plate_id = ? AND lot_id = ? AND status = 'COMPLETED' AND exit_time >= ? ORDER BY exit_time DESC LIMIT 1",
            Self::SESSION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(plate_id)
            .bind(lot_id)
            .bind(since)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn list_open(&self, lot_id: &str) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {} FROM parking_sessions WHERE lot_id = ? AND status = 'OPEN' ORDER BY entry_time",
            Self::SESSION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(lot_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::session_from_row).collect()
    }

    async fn occupancy(&self, lot_id: &str, since: DateTime<Utc>) -> Result<OccupancyStats> {
        let row = sqlx::query(
            r#"
            SELECT
                CAST(COALESCE(SUM(status = 'OPEN'), 0) AS SIGNED) AS inside,
                CAST(COALESCE(SUM(entry_time >= ?), 0) AS SIGNED) AS entries,
                CAST(COALESCE(SUM(exit_time IS NOT NULL AND exit_time >= ?), 0) AS SIGNED) AS exits
            FROM parking_sessions
            WHERE lot_id = ?
            "#,
        )
        .bind(since)
        .bind(since)
        .bind(lot_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(OccupancyStats {
            lot_id: lot_id.to_string(),
            vehicles_inside: row.try_get("inside")?,
            entries_since: row.try_get("entries")?,
            exits_since: row.try_get("exits")?,
            since,
        })
    }
}
