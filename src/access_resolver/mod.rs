//! AuthorizationResolver - plate + lot + direction -> decision
//!
//! ## Responsibilities
//!
//! - Look up a valid authorization record for the plate in the lot
//! - ENTRY: deny while an unexpired denylist entry exists
//! - EXIT: an OPEN session also authorizes (configurable)
//! - Fail closed: any store timeout or error is `Denied(StoreUnavailable)`
//!
//! The resolver never touches hardware or session state.

use crate::access_store::{AuthorizationStore, SessionStore};
use crate::error::{Error, Result};
use crate::models::{CanonicalPlate, Direction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Why an authorized decision was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationBasis {
    /// Valid authorization record
    Record,
    /// Exit allowed on an OPEN session alone
    OpenSession,
}

/// Advisory context handed to the session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHint {
    pub basis: AuthorizationBasis,
    /// OPEN session seen during resolution (EXIT only)
    pub open_session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    NotAuthorized,
    Blocked,
    StoreUnavailable,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NotAuthorized => "NOT_AUTHORIZED",
            DenyReason::Blocked => "BLOCKED",
            DenyReason::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Authorized(SessionHint),
    Denied(DenyReason),
}

impl Decision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Decision::Authorized(_))
    }

    fn denied(reason: DenyReason) -> Self {
        Decision::Denied(reason)
    }
}

/// Resolver policy
#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Hard bound on each store call
    pub store_timeout: Duration,
    /// EXIT with an OPEN session but no valid record is allowed
    pub allow_exit_with_open_session: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            allow_exit_with_open_session: true,
        }
    }
}

pub struct AuthorizationResolver {
    authorizations: Arc<dyn AuthorizationStore>,
    sessions: Arc<dyn SessionStore>,
    config: ResolverConfig,
}

impl AuthorizationResolver {
    pub fn new(
        authorizations: Arc<dyn AuthorizationStore>,
        sessions: Arc<dyn SessionStore>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            authorizations,
            sessions,
            config,
        }
    }

    /// Resolve a decision; never returns an error
    pub async fn resolve(
        &self,
        plate: &CanonicalPlate,
        lot_id: &str,
        direction: Direction,
    ) -> Decision {
        match self.try_resolve(plate.as_str(), lot_id, direction).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    lane = %direction,
                    plate = %plate,
                    lot_id = %lot_id,
                    error_code = e.code(),
                    error = %e,
                    "Authorization lookup failed, denying"
                );
                Decision::denied(DenyReason::StoreUnavailable)
            }
        }
    }

    async fn try_resolve(
        &self,
        plate_id: &str,
        lot_id: &str,
        direction: Direction,
    ) -> Result<Decision> {
        let now = Utc::now();

        match direction {
            Direction::Entry => {
                let block = self
                    .bounded(self.authorizations.find_active_block(plate_id, lot_id, now))
                    .await?;
                if let Some(block) = block {
                    tracing::info!(
                        plate = %plate_id,
                        lot_id = %lot_id,
                        reason = ?block.reason,
                        "Plate on denylist"
                    );
                    return Ok(Decision::denied(DenyReason::Blocked));
                }

                let record = self
                    .bounded(self.authorizations.find_valid_authorization(plate_id, lot_id, now))
                    .await?;
                Ok(match record {
                    Some(_) => Decision::Authorized(SessionHint {
                        basis: AuthorizationBasis::Record,
                        open_session_id: None,
                    }),
                    None => Decision::denied(DenyReason::NotAuthorized),
                })
            }
            Direction::Exit => {
                let record = self
                    .bounded(self.authorizations.find_valid_authorization(plate_id, lot_id, now))
                    .await?;
                let open = self.bounded(self.sessions.find_open(plate_id, lot_id)).await?;
                let open_session_id = open.map(|s| s.session_id);

                if record.is_some() {
                    return Ok(Decision::Authorized(SessionHint {
                        basis: AuthorizationBasis::Record,
                        open_session_id,
                    }));
                }
                match open_session_id {
                    Some(id) if self.config.allow_exit_with_open_session => {
                        tracing::info!(
                            plate = %plate_id,
                            lot_id = %lot_id,
                            session_id = %id,
                            "Exit allowed on open session without valid record"
                        );
                        Ok(Decision::Authorized(SessionHint {
                            basis: AuthorizationBasis::OpenSession,
                            open_session_id: Some(id),
                        }))
                    }
                    _ => Ok(Decision::denied(DenyReason::NotAuthorized)),
                }
            }
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| {
                Error::StoreUnavailable(format!(
                    "store call exceeded {}ms",
                    self.config.store_timeout.as_millis()
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_store::{AuthorizationRecord, MemoryAccessStore, NewSession, PlateBlock};
    use chrono::Duration as ChronoDuration;

    fn plate(text: &str) -> CanonicalPlate {
        CanonicalPlate {
            normalized_text: text.to_string(),
            format_valid: true,
        }
    }

    fn resolver(store: Arc<MemoryAccessStore>, allow_exit: bool) -> AuthorizationResolver {
        AuthorizationResolver::new(
            store.clone(),
            store,
            ResolverConfig {
                store_timeout: Duration::from_millis(200),
                allow_exit_with_open_session: allow_exit,
            },
        )
    }

    async fn authorize(store: &MemoryAccessStore, plate_id: &str) {
        store
            .add_authorization(AuthorizationRecord {
                plate_id: plate_id.into(),
                lot_id: "1".into(),
                valid_from: Utc::now() - ChronoDuration::days(1),
                valid_until: None,
            })
            .await;
    }

    async fn open_session(store: &MemoryAccessStore, plate_id: &str) {
        store
            .insert_open_if_absent(NewSession {
                session_id: "s-1".into(),
                plate_id: plate_id.into(),
                lot_id: "1".into(),
                direction: Direction::Entry,
                entry_time: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_entry_with_valid_record() {
        let store = Arc::new(MemoryAccessStore::new());
        authorize(&store, "KA01AB1234").await;

        let decision = resolver(store, true)
            .resolve(&plate("KA01AB1234"), "1", Direction::Entry)
            .await;
        assert!(decision.is_authorized());
    }

    #[tokio::test]
    async fn test_entry_unknown_plate_denied() {
        let store = Arc::new(MemoryAccessStore::new());
        let decision = resolver(store, true)
            .resolve(&plate("KA01AB1234"), "1", Direction::Entry)
            .await;
        assert_eq!(decision, Decision::denied(DenyReason::NotAuthorized));
    }

    #[tokio::test]
    async fn test_record_in_other_lot_denied() {
        let store = Arc::new(MemoryAccessStore::new());
        authorize(&store, "KA01AB1234").await;
        let decision = resolver(store, true)
            .resolve(&plate("KA01AB1234"), "2", Direction::Entry)
            .await;
        assert!(!decision.is_authorized());
    }

    #[tokio::test]
    async fn test_blocked_plate_denied_on_entry() {
        let store = Arc::new(MemoryAccessStore::new());
        authorize(&store, "KA01AB1234").await;
        store
            .add_block(PlateBlock {
                plate_id: "KA01AB1234".into(),
                lot_id: "1".into(),
                reason: Some("unpaid".into()),
                blocked_until: None,
            })
            .await;

        let decision = resolver(store, true)
            .resolve(&plate("KA01AB1234"), "1", Direction::Entry)
            .await;
        assert_eq!(decision, Decision::denied(DenyReason::Blocked));
    }

    #[tokio::test]
    async fn test_exit_on_open_session_policy() {
        let store = Arc::new(MemoryAccessStore::new());
        open_session(&store, "MH12XY9876").await;

        let allowed = resolver(store.clone(), true)
            .resolve(&plate("MH12XY9876"), "1", Direction::Exit)
            .await;
        assert_eq!(
            allowed,
            Decision::Authorized(SessionHint {
                basis: AuthorizationBasis::OpenSession,
                open_session_id: Some("s-1".into()),
            })
        );

        let strict = resolver(store, false)
            .resolve(&plate("MH12XY9876"), "1", Direction::Exit)
            .await;
        assert_eq!(strict, Decision::denied(DenyReason::NotAuthorized));
    }

    #[tokio::test]
    async fn test_exit_with_record_and_no_session() {
        let store = Arc::new(MemoryAccessStore::new());
        authorize(&store, "KA01AB1234").await;
        let decision = resolver(store, true)
            .resolve(&plate("KA01AB1234"), "1", Direction::Exit)
            .await;
        assert_eq!(
            decision,
            Decision::Authorized(SessionHint {
                basis: AuthorizationBasis::Record,
                open_session_id: None,
            })
        );
    }

    struct HangingStore;

    #[async_trait::async_trait]
    impl AuthorizationStore for HangingStore {
        async fn find_valid_authorization(
            &self,
            _: &str,
            _: &str,
            _: chrono::DateTime<Utc>,
        ) -> Result<Option<AuthorizationRecord>> {
            std::future::pending().await
        }

        async fn find_active_block(
            &self,
            _: &str,
            _: &str,
            _: chrono::DateTime<Utc>,
        ) -> Result<Option<PlateBlock>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_fails_closed() {
        let sessions = Arc::new(MemoryAccessStore::new());
        let resolver = AuthorizationResolver::new(
            Arc::new(HangingStore),
            sessions,
            ResolverConfig {
                store_timeout: Duration::from_millis(200),
                allow_exit_with_open_session: true,
            },
        );

        let started = tokio::time::Instant::now();
        let decision = resolver
            .resolve(&plate("KA01AB1234"), "1", Direction::Entry)
            .await;
        assert_eq!(decision, Decision::denied(DenyReason::StoreUnavailable));
        assert!(started.elapsed() < Duration::from_millis(300));
    }
}
