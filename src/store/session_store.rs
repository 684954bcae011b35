//! Session persistence with a durable primary and an in-process fallback.
//!
//! Writes go to the in-process cache first and are mirrored to the durable
//! backend; reads prefer the durable backend and refresh the cache. The first
//! durable failure trips the selector, after which the process serves entirely
//! from the in-process backend until restart.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::errors::{ConflictError, EngineError, NotFoundError, TowerResult};
use crate::round::types::GameSession;
use crate::store::backend::{MemoryBackend, SessionBackend, StoreError};

const LIVE_PREFIX: &str = "session:live:";
const ARCHIVE_PREFIX: &str = "session:archive:";

fn live_key(id: &str) -> String {
    format!("{}{}", LIVE_PREFIX, id)
}

fn archive_key(id: &str) -> String {
    format!("{}{}", ARCHIVE_PREFIX, id)
}

/// Expiry policy applied by pruning and restoration.
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
    pub max_lifetime: Duration,
    pub idle_window: Duration,
}

impl StorePolicy {
    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self {
            max_lifetime: Duration::seconds(cfg.max_lifetime_secs as i64),
            idle_window: Duration::seconds(cfg.idle_window_secs as i64),
        }
    }
}

/// Explicit, injectable switch between the durable backend and the fallback.
///
/// Trips exactly once per process; tests construct it pre-tripped to force
/// fallback mode deterministically.
#[derive(Debug, Default)]
pub struct BackendSelector {
    degraded: AtomicBool,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forced_fallback() -> Self {
        Self {
            degraded: AtomicBool::new(true),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn trip(&self, backend: &str, detail: &str) {
        if self
            .degraded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::warn!(
                backend,
                detail,
                "durable session backend failed, serving from in-process fallback until restart"
            );
        }
    }
}

pub struct SessionStore {
    durable: Option<Arc<dyn SessionBackend>>,
    fallback: Arc<dyn SessionBackend>,
    selector: BackendSelector,
    policy: StorePolicy,
}

impl SessionStore {
    pub fn new(durable: Option<Arc<dyn SessionBackend>>, policy: StorePolicy) -> Self {
        Self::with_selector(durable, policy, BackendSelector::new())
    }

    pub fn with_selector(
        durable: Option<Arc<dyn SessionBackend>>,
        policy: StorePolicy,
        selector: BackendSelector,
    ) -> Self {
        Self {
            durable,
            fallback: Arc::new(MemoryBackend::new()),
            selector,
            policy,
        }
    }

    pub fn memory_only(policy: StorePolicy) -> Self {
        Self::new(None, policy)
    }

    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    pub fn is_degraded(&self) -> bool {
        self.selector.is_degraded()
    }

    fn durable_ref(&self) -> Option<&Arc<dyn SessionBackend>> {
        if self.selector.is_degraded() {
            None
        } else {
            self.durable.as_ref()
        }
    }

    fn decode(key: &str, bytes: &[u8]) -> TowerResult<GameSession> {
        serde_json::from_slice(bytes).map_err(|e| {
            EngineError::Store(StoreError::Corrupted(format!(
                "failed to decode session at {}: {}",
                key, e
            )))
        })
    }

    fn write_record(&self, key: &str, session: &GameSession) -> TowerResult<()> {
        let bytes = serde_json::to_vec(session).map_err(|e| {
            EngineError::Store(StoreError::Corrupted(format!(
                "failed to encode session {}: {}",
                session.id, e
            )))
        })?;

        // Cache first: fallback mode must always hold the latest copy.
        self.fallback.put(key, &bytes)?;
        if let Some(durable) = self.durable_ref() {
            if let Err(e) = durable.put(key, &bytes) {
                self.selector.trip(durable.name(), &e.to_string());
            }
        }
        Ok(())
    }

    fn read_record(&self, key: &str) -> TowerResult<Option<GameSession>> {
        if let Some(durable) = self.durable_ref() {
            match durable.get(key) {
                Ok(Some(bytes)) => {
                    self.fallback.put(key, &bytes)?;
                    return Ok(Some(Self::decode(key, &bytes)?));
                }
                Ok(None) => return Ok(None),
                Err(e) => self.selector.trip(durable.name(), &e.to_string()),
            }
        }

        match self.fallback.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn delete_record(&self, key: &str) -> TowerResult<()> {
        self.fallback.delete(key)?;
        if let Some(durable) = self.durable_ref() {
            if let Err(e) = durable.delete(key) {
                self.selector.trip(durable.name(), &e.to_string());
            }
        }
        Ok(())
    }

    fn scan_records(&self, prefix: &str) -> TowerResult<Vec<GameSession>> {
        let rows = if let Some(durable) = self.durable_ref() {
            match durable.scan_prefix(prefix) {
                Ok(rows) => rows,
                Err(e) => {
                    self.selector.trip(durable.name(), &e.to_string());
                    self.fallback.scan_prefix(prefix)?
                }
            }
        } else {
            self.fallback.scan_prefix(prefix)?
        };

        let mut sessions = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            match Self::decode(&key, &bytes) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!(key, error = %e, "skipping undecodable session record"),
            }
        }
        Ok(sessions)
    }

    /// Insert a new live session; the id must be unused.
    pub fn create(&self, session: &GameSession) -> TowerResult<()> {
        let key = live_key(&session.id);
        if self.read_record(&key)?.is_some() {
            return Err(ConflictError::SessionExists(session.id.clone()).into());
        }
        self.write_record(&key, session)
    }

    /// Fetch a live session as an isolated copy.
    pub fn get(&self, id: &str) -> TowerResult<GameSession> {
        self.read_record(&live_key(id))?
            .ok_or_else(|| NotFoundError::SessionNotFound(id.to_string()).into())
    }

    pub fn try_get(&self, id: &str) -> TowerResult<Option<GameSession>> {
        self.read_record(&live_key(id))
    }

    pub fn get_archived(&self, id: &str) -> TowerResult<Option<GameSession>> {
        self.read_record(&archive_key(id))
    }

    /// Read-modify-write: re-reads the stored record, applies `mutate`, and
    /// writes back once. A mutation error aborts before any write.
    pub fn update<F>(&self, id: &str, mutate: F) -> TowerResult<GameSession>
    where
        F: FnOnce(&mut GameSession) -> TowerResult<()>,
    {
        let key = live_key(id);
        let mut session = self
            .read_record(&key)?
            .ok_or_else(|| EngineError::from(NotFoundError::SessionNotFound(id.to_string())))?;

        mutate(&mut session)?;
        session.updated_at = Utc::now();

        self.write_record(&key, &session)?;
        Ok(session)
    }

    pub fn remove(&self, id: &str) -> TowerResult<()> {
        self.delete_record(&live_key(id))
    }

    /// Move a session out of the live keyspace into the audit archive.
    pub fn archive(&self, id: &str) -> TowerResult<GameSession> {
        let key = live_key(id);
        let session = self
            .read_record(&key)?
            .ok_or_else(|| EngineError::from(NotFoundError::SessionNotFound(id.to_string())))?;

        self.write_record(&archive_key(id), &session)?;
        self.delete_record(&key)?;
        Ok(session)
    }

    /// Delete live sessions that aged out. Only pending/active records are
    /// eligible; finalized sessions are retained for audit.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> TowerResult<usize> {
        let mut pruned = 0;
        for session in self.scan_records(LIVE_PREFIX)? {
            if !session.status.is_live() {
                continue;
            }
            let lifetime_expired = now >= session.expires_at;
            let idle_expired = now - session.updated_at >= self.policy.idle_window;
            if lifetime_expired || idle_expired {
                self.delete_record(&live_key(&session.id))?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "pruned expired sessions");
        }
        Ok(pruned)
    }

    /// Recover the user's single most recent pending/active session,
    /// refreshing its absolute expiry.
    pub fn restore_latest_for_user(&self, address: &str) -> TowerResult<GameSession> {
        let mut candidates: Vec<GameSession> = self
            .scan_records(LIVE_PREFIX)?
            .into_iter()
            .filter(|s| s.status.is_live() && s.user_address == address)
            .collect();
        candidates.sort_by_key(|s| s.updated_at);

        let latest = candidates.pop().ok_or_else(|| {
            EngineError::from(NotFoundError::NoRestorableSession(address.to_string()))
        })?;

        let lifetime = self.policy.max_lifetime;
        self.update(&latest.id, |s| {
            s.expires_at = Utc::now() + lifetime;
            Ok(())
        })
    }

    /// Archived sessions for a player, newest first.
    pub fn recent_for_user(&self, address: &str, limit: usize) -> TowerResult<Vec<GameSession>> {
        let mut sessions: Vec<GameSession> = self
            .scan_records(ARCHIVE_PREFIX)?
            .into_iter()
            .filter(|s| s.user_address == address)
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    pub fn count_live(&self) -> TowerResult<usize> {
        Ok(self.scan_records(LIVE_PREFIX)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::seeds::generate_seeds;
    use crate::round::types::SessionStatus;
    use std::sync::atomic::AtomicUsize;

    fn policy() -> StorePolicy {
        StorePolicy {
            max_lifetime: Duration::hours(24),
            idle_window: Duration::minutes(15),
        }
    }

    fn session(id: &str, address: &str) -> GameSession {
        GameSession::pending(
            id.to_string(),
            address.to_string(),
            3,
            generate_seeds(None).unwrap(),
            None,
            vec![],
            Duration::hours(24),
        )
    }

    struct FailingBackend;

    impl SessionBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Unavailable {
                backend: "failing",
                detail: "injected".to_string(),
            })
        }
        fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                backend: "failing",
                detail: "injected".to_string(),
            })
        }
        fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                backend: "failing",
                detail: "injected".to_string(),
            })
        }
        fn scan_prefix(&self, _prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
            Err(StoreError::Unavailable {
                backend: "failing",
                detail: "injected".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        calls: AtomicUsize,
    }

    impl SessionBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }
        fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value)
        }
        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(key)
        }
        fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.scan_prefix(prefix)
        }
    }

    #[test]
    fn test_create_get_and_duplicate() {
        let store = SessionStore::memory_only(policy());
        store.create(&session("a", "p1")).unwrap();

        let loaded = store.get("a").unwrap();
        assert_eq!(loaded.user_address, "p1");

        let err = store.create(&session("a", "p1")).unwrap_err();
        assert_eq!(err.code(), "SESSION_EXISTS");
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let store = SessionStore::memory_only(policy());
        let err = store.get("nope").unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn test_copy_on_read_isolation() {
        let store = SessionStore::memory_only(policy());
        store.create(&session("a", "p1")).unwrap();

        let mut first = store.get("a").unwrap();
        first.user_address = "tampered".to_string();
        first.current_multiplier = 99.0;

        let second = store.get("a").unwrap();
        assert_eq!(second.user_address, "p1");
        assert_eq!(second.current_multiplier, 1.0);
    }

    #[test]
    fn test_update_applies_and_bumps_updated_at() {
        let store = SessionStore::memory_only(policy());
        store.create(&session("a", "p1")).unwrap();
        let before = store.get("a").unwrap().updated_at;

        let updated = store
            .update("a", |s| {
                s.status = SessionStatus::Active;
                Ok(())
            })
            .unwrap();

        assert_eq!(updated.status, SessionStatus::Active);
        assert!(updated.updated_at >= before);
        assert_eq!(store.get("a").unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn test_update_guard_error_leaves_record_untouched() {
        let store = SessionStore::memory_only(policy());
        store.create(&session("a", "p1")).unwrap();

        let err = store
            .update("a", |s| {
                s.status = SessionStatus::Lost;
                Err(ConflictError::AlreadySubmitted.into())
            })
            .unwrap_err();

        assert_eq!(err.code(), "ALREADY_SUBMITTED");
        assert_eq!(store.get("a").unwrap().status, SessionStatus::Pending);
    }

    #[test]
    fn test_archive_moves_out_of_live_keyspace() {
        let store = SessionStore::memory_only(policy());
        store.create(&session("a", "p1")).unwrap();

        store.archive("a").unwrap();

        assert_eq!(store.get("a").unwrap_err().code(), "SESSION_NOT_FOUND");
        let archived = store.get_archived("a").unwrap().unwrap();
        assert_eq!(archived.id, "a");
    }

    #[test]
    fn test_prune_deletes_only_live_statuses() {
        let store = SessionStore::memory_only(policy());
        let now = Utc::now();

        let mut expired_active = session("expired", "p1");
        expired_active.status = SessionStatus::Active;
        expired_active.expires_at = now - Duration::minutes(1);
        store.create(&expired_active).unwrap();

        let mut old_lost = session("lost", "p1");
        old_lost.status = SessionStatus::Lost;
        old_lost.expires_at = now - Duration::hours(30);
        old_lost.updated_at = now - Duration::hours(30);
        store.create(&old_lost).unwrap();

        let mut fresh = session("fresh", "p1");
        fresh.status = SessionStatus::Active;
        store.create(&fresh).unwrap();

        let pruned = store.prune_expired(now).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.get("expired").unwrap_err().code(), "SESSION_NOT_FOUND");
        assert!(store.get("lost").is_ok());
        assert!(store.get("fresh").is_ok());
    }

    #[test]
    fn test_prune_applies_idle_window() {
        let store = SessionStore::memory_only(policy());
        let now = Utc::now();

        let mut idle = session("idle", "p1");
        idle.status = SessionStatus::Active;
        idle.expires_at = now + Duration::hours(10);
        idle.updated_at = now - Duration::minutes(20);
        store.create(&idle).unwrap();

        assert_eq!(store.prune_expired(now).unwrap(), 1);
    }

    #[test]
    fn test_restore_picks_most_recent_and_refreshes_expiry() {
        let store = SessionStore::memory_only(policy());
        let now = Utc::now();

        let mut older = session("older", "p1");
        older.status = SessionStatus::Active;
        older.updated_at = now - Duration::minutes(10);
        older.expires_at = now + Duration::minutes(5);
        store.create(&older).unwrap();

        let mut newer = session("newer", "p1");
        newer.status = SessionStatus::Active;
        newer.updated_at = now - Duration::minutes(1);
        newer.expires_at = now + Duration::minutes(5);
        store.create(&newer).unwrap();

        let mut other = session("other", "p2");
        other.status = SessionStatus::Active;
        store.create(&other).unwrap();

        let restored = store.restore_latest_for_user("p1").unwrap();
        assert_eq!(restored.id, "newer");
        assert!(restored.expires_at > now + Duration::hours(23));

        let err = store.restore_latest_for_user("p3").unwrap_err();
        assert_eq!(err.code(), "NO_RESTORABLE_SESSION");
    }

    #[test]
    fn test_recent_for_user_newest_first() {
        let store = SessionStore::memory_only(policy());
        let now = Utc::now();

        for (id, age_mins) in [("first", 30), ("second", 20), ("third", 10)] {
            let mut s = session(id, "p1");
            s.status = SessionStatus::Submitted;
            s.updated_at = now - Duration::minutes(age_mins);
            store.create(&s).unwrap();
            store.archive(id).unwrap();
        }

        let recent = store.recent_for_user("p1", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "third");
        assert_eq!(recent[1].id, "second");
    }

    #[test]
    fn test_first_durable_failure_trips_sticky_fallback() {
        let store = SessionStore::new(Some(Arc::new(FailingBackend)), policy());
        assert!(!store.is_degraded());

        store.create(&session("a", "p1")).unwrap();
        assert!(store.is_degraded());

        // Served entirely from the fallback afterwards.
        assert_eq!(store.get("a").unwrap().id, "a");
        store.create(&session("b", "p1")).unwrap();
        assert_eq!(store.count_live().unwrap(), 2);
    }

    #[test]
    fn test_forced_fallback_never_touches_durable() {
        let counting = Arc::new(CountingBackend::default());
        let durable: Arc<dyn SessionBackend> = counting.clone();
        let store =
            SessionStore::with_selector(Some(durable), policy(), BackendSelector::forced_fallback());

        store.create(&session("a", "p1")).unwrap();
        store.get("a").unwrap();
        store.prune_expired(Utc::now()).unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_through_cache_survives_later_durable_loss() {
        let durable = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(Some(durable.clone()), policy());

        store.create(&session("a", "p1")).unwrap();
        // Durable copy disappears behind the store's back.
        durable.delete(&live_key("a")).unwrap();

        // Durable-first read reports the honest state.
        assert_eq!(store.get("a").unwrap_err().code(), "SESSION_NOT_FOUND");
    }
}
