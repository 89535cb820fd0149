//! In-process access store
//!
//! Same contract as the MySQL repository: a single mutex makes every
//! check-then-write atomic, standing in for the unique index.

use super::types::*;
use super::{AuthorizationStore, SessionStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryInner {
    authorizations: Vec<AuthorizationRecord>,
    blocks: Vec<PlateBlock>,
    sessions: Vec<Session>,
}

/// MemoryAccessStore instance
#[derive(Default)]
pub struct MemoryAccessStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an authorization record
    pub async fn add_authorization(&self, record: AuthorizationRecord) {
        self.inner.lock().await.authorizations.push(record);
    }

    /// Seed a denylist entry
    pub async fn add_block(&self, block: PlateBlock) {
        self.inner.lock().await.blocks.push(block);
    }

    /// All session rows, oldest first
    pub async fn sessions(&self) -> Vec<Session> {
        self.inner.lock().await.sessions.clone()
    }
}

#[async_trait]
impl AuthorizationStore for MemoryAccessStore {
    async fn find_valid_authorization(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .authorizations
            .iter()
            .find(|r| r.plate_id == plate_id && r.lot_id == lot_id && r.is_valid_at(now))
            .cloned())
    }

    async fn find_active_block(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PlateBlock>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .blocks
            .iter()
            .find(|b| b.plate_id == plate_id && b.lot_id == lot_id && b.is_active_at(now))
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryAccessStore {
    async fn insert_open_if_absent(&self, session: NewSession) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.sessions.iter().find(|s| {
            s.status == SessionStatus::Open
                && s.plate_id == session.plate_id
                && s.lot_id == session.lot_id
        }) {
            return Ok(InsertOutcome::AlreadyOpen(existing.clone()));
        }

        let created = session.into_session();
        inner.sessions.push(created.clone());
        Ok(InsertOutcome::Created(created))
    }

    async fn complete_open(
        &self,
        plate_id: &str,
        lot_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.sessions.iter_mut().find(|s| {
            s.status == SessionStatus::Open && s.plate_id == plate_id && s.lot_id == lot_id
        }) else {
            return Ok(None);
        };

        *row = row.clone().completed_at(exit_time);
        Ok(Some(row.clone()))
    }

    async fn find_open(&self, plate_id: &str, lot_id: &str) -> Result<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .find(|s| {
                s.status == SessionStatus::Open && s.plate_id == plate_id && s.lot_id == lot_id
            })
            .cloned())
    }

    async fn find_completed_since(
        &self,
        plate_id: &str,
        lot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .rev()
            .find(|s| {
                s.status == SessionStatus::Completed
                    && s.plate_id == plate_id
                    && s.lot_id == lot_id
                    && s.exit_time.map_or(false, |t| t >= since)
            })
            .cloned())
    }

    async fn list_open(&self, lot_id: &str) -> Result<Vec<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Open && s.lot_id == lot_id)
            .cloned()
            .collect())
    }

    async fn occupancy(&self, lot_id: &str, since: DateTime<Utc>) -> Result<OccupancyStats> {
        let inner = self.inner.lock().await;
        let in_lot = || inner.sessions.iter().filter(|s| s.lot_id == lot_id);

        Ok(OccupancyStats {
            lot_id: lot_id.to_string(),
            vehicles_inside: in_lot().filter(|s| s.status == SessionStatus::Open).count() as i64,
            entries_since: in_lot().filter(|s| s.entry_time >= since).count() as i64,
            exits_since: in_lot()
                .filter(|s| s.exit_time.map_or(false, |t| t >= since))
                .count() as i64,
            since,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Duration;
    use std::sync::Arc;

    fn new_session(id: &str, plate: &str) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            plate_id: plate.to_string(),
            lot_id: "1".to_string(),
            direction: Direction::Entry,
            entry_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_second_open_is_noop() {
        let store = MemoryAccessStore::new();
        let first = store.insert_open_if_absent(new_session("a", "KA01AB1234")).await.unwrap();
        assert!(matches!(first, InsertOutcome::Created(_)));

        let second = store.insert_open_if_absent(new_session("b", "KA01AB1234")).await.unwrap();
        match second {
            InsertOutcome::AlreadyOpen(s) => assert_eq!(s.session_id, "a"),
            other => panic!("expected AlreadyOpen, got {:?}", other),
        }
        assert_eq!(store.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_leave_one_open_row() {
        let store = Arc::new(MemoryAccessStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_open_if_absent(new_session(&format!("s{}", i), "MH02CD5678"))
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), InsertOutcome::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list_open("1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_then_reopen() {
        let store = MemoryAccessStore::new();
        store.insert_open_if_absent(new_session("a", "KA01AB1234")).await.unwrap();
        let closed = store
            .complete_open("KA01AB1234", "1", Utc::now() + Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
        assert!(store.complete_open("KA01AB1234", "1", Utc::now()).await.unwrap().is_none());

        let again = store.insert_open_if_absent(new_session("b", "KA01AB1234")).await.unwrap();
        assert!(matches!(again, InsertOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_expired_block_ignored() {
        let store = MemoryAccessStore::new();
        let now = Utc::now();
        store
            .add_block(PlateBlock {
                plate_id: "KA01AB1234".into(),
                lot_id: "1".into(),
                reason: None,
                blocked_until: Some(now - Duration::minutes(1)),
            })
            .await;
        assert!(store.find_active_block("KA01AB1234", "1", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_occupancy_counts() {
        let store = MemoryAccessStore::new();
        let since = Utc::now() - Duration::hours(1);
        store.insert_open_if_absent(new_session("a", "KA01AB1234")).await.unwrap();
        store.insert_open_if_absent(new_session("b", "MH02CD5678")).await.unwrap();
        store.complete_open("MH02CD5678", "1", Utc::now()).await.unwrap();

        let stats = store.occupancy("1", since).await.unwrap();
        assert_eq!(stats.vehicles_inside, 1);
        assert_eq!(stats.entries_since, 2);
        assert_eq!(stats.exits_since, 1);
    }
}
