//! AccessStore - authorization and session persistence
//!
//! ## Responsibilities
//!
//! - Read authorization records and denylist entries
//! - Insert/complete passage sessions with at most one OPEN row per
//!   (plate, lot), enforced by the store itself
//!
//! ## Backends
//!
//! - `AccessRepository`: MySQL via sqlx (production)
//! - `MemoryAccessStore`: in-process (simulation mode, tests)

mod memory;
mod repository;
mod types;

pub use memory::MemoryAccessStore;
pub use repository::AccessRepository;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read side of the authorization data
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Record for plate+lot whose validity window contains `now`
    async fn find_valid_authorization(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationRecord>>;

    /// Unexpired denylist entry for plate+lot
    async fn find_active_block(
        &self,
        plate_id: &str,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PlateBlock>>;
}

/// Session rows
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomic insert unless an OPEN row exists for plate+lot
    async fn insert_open_if_absent(&self, session: NewSession) -> Result<InsertOutcome>;

    /// Atomically complete the OPEN row for plate+lot, if any
    async fn complete_open(
        &self,
        plate_id: &str,
        lot_id: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    async fn find_open(&self, plate_id: &str, lot_id: &str) -> Result<Option<Session>>;

    /// Latest session for plate+lot completed at or after `since`
    async fn find_completed_since(
        &self,
        plate_id: &str,
        lot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    async fn list_open(&self, lot_id: &str) -> Result<Vec<Session>>;

    async fn occupancy(&self, lot_id: &str, since: DateTime<Utc>) -> Result<OccupancyStats>;
}

/// Both halves, as one shared handle
pub trait AccessStore: AuthorizationStore + SessionStore {}

impl<T: AuthorizationStore + SessionStore> AccessStore for T {}

/// Trait-object handles to one backend, shared by both lanes
#[derive(Clone)]
pub struct StoreHandles {
    pub backend: &'static str,
    pub authorizations: std::sync::Arc<dyn AuthorizationStore>,
    pub sessions: std::sync::Arc<dyn SessionStore>,
}

impl StoreHandles {
    pub fn new<T: AccessStore + 'static>(backend: &'static str, store: std::sync::Arc<T>) -> Self {
        Self {
            backend,
            authorizations: store.clone(),
            sessions: store,
        }
    }
}
