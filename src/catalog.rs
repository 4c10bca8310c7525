//! Remote services catalog: fetch, TTL-based refresh, and stale fallback.
//!
//! The catalog groups domains into named services ("Dropbox" and its many
//! domains). It is fetched from a remote provider, cached for 24 hours,
//! persisted through the key-value store, and degrades to stale or persisted
//! data on network failure. Fetch errors are logged and retried after a
//! fixed delay; they are never surfaced to callers. Reads never wait on the
//! network: a due refresh runs on a background thread while the current
//! snapshot is returned immediately.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ExclusionsError, Result};
use crate::storage::{self, KvStore};

/// How long a fetched catalog stays fresh.
pub const SERVICES_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fixed delay before retrying a failed fetch. Not exponential: repeated
/// failures reschedule the same delay indefinitely, keeping the catalog
/// eventually consistent without user action.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Storage key for the persisted cache record.
pub const SERVICES_CACHE_KEY: &str = "exclusions.services";

/// Upper bound on a single catalog request, connection included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Millisecond time source, injectable so TTL and retry behavior are
/// testable without sleeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A service category as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCategory {
    pub id: String,
    pub name: String,
}

/// One catalog-defined service: a named bundle of domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawService {
    pub service_id: String,
    pub service_name: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub categories: Vec<ServiceCategory>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub modified_time: String,
}

/// Persisted cache record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicesCacheRecord {
    services: HashMap<String, RawService>,
    fetched_at_ms: u64,
}

/// Fetch cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Fetching,
    Success,
    Failure,
}

/// Remote catalog source.
pub trait ServicesProvider: Send + Sync {
    fn get_exclusions_services(&self) -> Result<HashMap<String, RawService>>;
}

/// Default provider fetching a JSON index over HTTP.
pub struct HttpServicesProvider {
    agent: ureq::Agent,
    url: String,
}

impl HttpServicesProvider {
    pub fn new(url: impl Into<String>) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(FETCH_TIMEOUT))
            .build()
            .new_agent();
        Self {
            agent,
            url: url.into(),
        }
    }
}

#[derive(Deserialize)]
struct ServicesIndex {
    services: Vec<RawService>,
}

impl ServicesProvider for HttpServicesProvider {
    fn get_exclusions_services(&self) -> Result<HashMap<String, RawService>> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| ExclusionsError::CatalogFetch(format!("request failed: {}", e)))?;
        let (_, body) = response.into_parts();
        let mut text = String::new();
        body.into_reader()
            .read_to_string(&mut text)
            .map_err(|e| ExclusionsError::CatalogFetch(format!("read failed: {}", e)))?;
        let index: ServicesIndex = serde_json::from_str(&text)
            .map_err(|e| ExclusionsError::CatalogFetch(format!("invalid payload: {}", e)))?;
        Ok(index
            .services
            .into_iter()
            .map(|s| (s.service_id.clone(), s))
            .collect())
    }
}

struct CatalogInner {
    services: HashMap<String, RawService>,
    fetched_at_ms: Option<u64>,
    phase: FetchPhase,
    next_retry_at_ms: Option<u64>,
}

/// Services catalog manager with TTL refresh and stale-is-better-than-none
/// fallback. All state is behind `Arc`s, so a clone shares the same catalog
/// and a due refresh can run off-thread without blocking readers.
pub struct ServicesManager {
    provider: Arc<dyn ServicesProvider>,
    storage: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    inner: Arc<RwLock<CatalogInner>>,
}

impl Clone for ServicesManager {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl ServicesManager {
    pub fn new(provider: Box<dyn ServicesProvider>, storage: Arc<dyn KvStore>) -> Self {
        Self {
            provider: Arc::from(provider),
            storage,
            clock: Arc::new(SystemClock),
            inner: Arc::new(RwLock::new(CatalogInner {
                services: HashMap::new(),
                fetched_at_ms: None,
                phase: FetchPhase::Idle,
                next_retry_at_ms: None,
            })),
        }
    }

    /// Replace the time source (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the persisted record so the catalog is available right away,
    /// then refresh in the background if it is due.
    pub fn init(&self) {
        match storage::read_value::<ServicesCacheRecord>(self.storage.as_ref(), SERVICES_CACHE_KEY)
        {
            Ok(Some(record)) => {
                info!(
                    "loaded {} services from persisted catalog",
                    record.services.len()
                );
                let mut inner = self.inner.write();
                if inner.services.is_empty() {
                    inner.services = record.services;
                    inner.fetched_at_ms = Some(record.fetched_at_ms);
                }
            }
            Ok(None) => debug!("no persisted services catalog"),
            Err(e) => warn!("failed to load persisted services catalog: {}", e),
        }
        self.refresh_in_background();
    }

    /// Spawn a background refresh if one is due. Never blocks the caller;
    /// the in-flight guard in `update_if_stale` dedups concurrent triggers.
    pub fn refresh_in_background(&self) {
        {
            let inner = self.inner.read();
            if !Self::should_fetch(&inner, self.clock.now_ms()) {
                return;
            }
        }
        let manager = self.clone();
        std::thread::spawn(move || {
            manager.update_if_stale();
        });
    }

    /// Fetch the catalog if it is stale (or a scheduled retry is due).
    /// Returns whether a fetch was actually performed. A trigger while a
    /// fetch is in flight is a no-op.
    pub fn update_if_stale(&self) -> bool {
        let started_at = self.clock.now_ms();
        {
            let mut inner = self.inner.write();
            if !Self::should_fetch(&inner, started_at) {
                return false;
            }
            inner.phase = FetchPhase::Fetching;
        }

        let result = self.provider.get_exclusions_services();
        let mut inner = self.inner.write();
        match result {
            Ok(services) => {
                // Last-fetch-wins by timestamp: a slow fetch that completes
                // after a fresher result landed must not overwrite it.
                let fresher_exists = inner.fetched_at_ms.map_or(false, |t| t > started_at);
                if fresher_exists {
                    debug!("discarding out-of-date catalog fetch result");
                } else {
                    let record = ServicesCacheRecord {
                        services: services.clone(),
                        fetched_at_ms: started_at,
                    };
                    if let Err(e) = storage::write_value(
                        self.storage.as_ref(),
                        SERVICES_CACHE_KEY,
                        &record,
                    ) {
                        warn!("failed to persist services catalog: {}", e);
                    }
                    info!("services catalog updated: {} services", services.len());
                    inner.services = services;
                    inner.fetched_at_ms = Some(started_at);
                }
                inner.phase = FetchPhase::Success;
                inner.next_retry_at_ms = None;
            }
            Err(e) => {
                // Keep whatever catalog was previously available.
                warn!("services catalog fetch failed: {}", e);
                inner.phase = FetchPhase::Failure;
                inner.next_retry_at_ms =
                    Some(self.clock.now_ms() + FETCH_RETRY_DELAY.as_millis() as u64);
            }
        }
        true
    }

    fn should_fetch(inner: &CatalogInner, now_ms: u64) -> bool {
        if inner.phase == FetchPhase::Fetching {
            return false;
        }
        if let Some(retry_at) = inner.next_retry_at_ms {
            return now_ms >= retry_at;
        }
        match inner.fetched_at_ms {
            None => true,
            Some(fetched_at) => {
                now_ms.saturating_sub(fetched_at) > SERVICES_CACHE_TTL.as_millis() as u64
            }
        }
    }

    /// The best currently-available catalog. A due refresh is kicked off in
    /// the background; the read itself never waits on the network.
    pub fn get_services(&self) -> HashMap<String, RawService> {
        self.refresh_in_background();
        self.services_snapshot()
    }

    /// The current catalog without triggering any fetch.
    pub fn services_snapshot(&self) -> HashMap<String, RawService> {
        self.inner.read().services.clone()
    }

    /// Look up a single service without triggering any fetch.
    pub fn get_service(&self, service_id: &str) -> Option<RawService> {
        self.inner.read().services.get(service_id).cloned()
    }

    pub fn phase(&self) -> FetchPhase {
        self.inner.read().phase
    }

    pub fn last_fetched_at_ms(&self) -> Option<u64> {
        self.inner.read().fetched_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::mpsc;

    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn new(start_ms: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(start_ms)))
        }

        fn advance(&self, delta_ms: u64) {
            self.0.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct ScriptedProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ScriptedProvider {
        fn ok() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }
        }

        fn call_count(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    impl ServicesProvider for ScriptedProvider {
        fn get_exclusions_services(&self) -> Result<HashMap<String, RawService>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExclusionsError::CatalogFetch("connection refused".into()));
            }
            let svc = RawService {
                service_id: "github".into(),
                service_name: "GitHub".into(),
                icon_url: String::new(),
                categories: vec![],
                domains: vec!["github.com".into(), "github.io".into()],
                modified_time: String::new(),
            };
            Ok(HashMap::from([("github".to_string(), svc)]))
        }
    }

    fn manager_with(
        provider: ScriptedProvider,
        clock: Arc<ManualClock>,
    ) -> (ServicesManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = ServicesManager::new(Box::new(provider), store.clone())
            .with_clock(clock as Arc<dyn Clock>);
        (manager, store)
    }

    #[test]
    fn test_update_if_stale_fetches_once_within_ttl() {
        let clock = ManualClock::new(1_000);
        let provider = ScriptedProvider::ok();
        let calls = provider.call_count();
        let (manager, _) = manager_with(provider, clock.clone());

        assert!(manager.update_if_stale());
        clock.advance(60 * 60 * 1000); // one hour
        assert!(!manager.update_if_stale());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.phase(), FetchPhase::Success);
    }

    #[test]
    fn test_update_if_stale_refetches_after_ttl() {
        let clock = ManualClock::new(1_000);
        let provider = ScriptedProvider::ok();
        let calls = provider.call_count();
        let (manager, _) = manager_with(provider, clock.clone());

        assert!(manager.update_if_stale());
        clock.advance(SERVICES_CACHE_TTL.as_millis() as u64 + 1);
        assert!(manager.update_if_stale());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_schedules_fixed_retry() {
        let clock = ManualClock::new(1_000);
        let (manager, _) = manager_with(ScriptedProvider::failing(), clock.clone());

        assert!(manager.update_if_stale());
        assert_eq!(manager.phase(), FetchPhase::Failure);

        // Not due yet
        clock.advance(FETCH_RETRY_DELAY.as_millis() as u64 - 1);
        assert!(!manager.update_if_stale());

        // Due; fails again and reschedules
        clock.advance(2);
        assert!(manager.update_if_stale());
        assert_eq!(manager.phase(), FetchPhase::Failure);
    }

    #[test]
    fn test_failure_keeps_previous_catalog() {
        let clock = ManualClock::new(1_000);
        let store = Arc::new(MemoryStore::new());

        // Seed with a successful fetch.
        let manager = ServicesManager::new(Box::new(ScriptedProvider::ok()), store.clone())
            .with_clock(clock.clone() as Arc<dyn Clock>);
        manager.update_if_stale();
        assert_eq!(manager.services_snapshot().len(), 1);

        // Second manager over the same store with a broken provider: the
        // persisted record is served and survives a later failed refresh.
        let manager = ServicesManager::new(Box::new(ScriptedProvider::failing()), store)
            .with_clock(clock.clone() as Arc<dyn Clock>);
        manager.init();
        assert_eq!(manager.services_snapshot().len(), 1);

        clock.advance(SERVICES_CACHE_TTL.as_millis() as u64 + 1);
        assert!(manager.update_if_stale());
        assert_eq!(manager.phase(), FetchPhase::Failure);
        assert_eq!(manager.services_snapshot().len(), 1);
        assert!(manager.get_service("github").is_some());
    }

    #[test]
    fn test_reads_do_not_refetch_fresh_catalog() {
        let clock = ManualClock::new(1_000);
        let provider = ScriptedProvider::ok();
        let calls = provider.call_count();
        let store = Arc::new(MemoryStore::new());
        let manager = ServicesManager::new(Box::new(provider), store)
            .with_clock(clock as Arc<dyn Clock>);

        manager.update_if_stale();
        let _ = manager.get_services();
        let _ = manager.get_services();
        // One fetch; subsequent reads found the catalog fresh and spawned
        // no refresh.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.last_fetched_at_ms(), Some(1_000));
    }

    struct StalledProvider {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl ServicesProvider for StalledProvider {
        fn get_exclusions_services(&self) -> Result<HashMap<String, RawService>> {
            // Blocks until the test releases (or drops) the sender.
            let _ = self.gate.lock().recv();
            Err(ExclusionsError::CatalogFetch("aborted".into()))
        }
    }

    #[test]
    fn test_stale_reads_return_snapshot_without_waiting_on_fetch() {
        let clock = ManualClock::new(1_000);
        let store = Arc::new(MemoryStore::new());

        // Seed the persisted record through a working manager.
        let manager = ServicesManager::new(Box::new(ScriptedProvider::ok()), store.clone())
            .with_clock(clock.clone() as Arc<dyn Clock>);
        manager.update_if_stale();

        let (tx, rx) = mpsc::channel::<()>();
        let stalled = StalledProvider {
            gate: Mutex::new(rx),
        };
        let manager = ServicesManager::new(Box::new(stalled), store)
            .with_clock(clock.clone() as Arc<dyn Clock>);
        manager.init();
        clock.advance(SERVICES_CACHE_TTL.as_millis() as u64 + 1);

        // The refresh is due but hangs inside the provider; the read still
        // returns the persisted catalog immediately.
        let services = manager.get_services();
        assert_eq!(services.len(), 1);
        assert!(manager.get_service("github").is_some());
        drop(tx);
    }
}
