//! # WaveKit SW
//!
//! Service worker runtime for WaveKit. Hosts one worker registration per
//! scope, runs the install step that pre-populates a named cache container
//! from the worker's asset manifest, and intercepts outbound fetches with
//! cache-first, network-fallback semantics.
//!
//! ## Features
//!
//! - **Registrations**: One [`Registration`] per scope with the usual
//!   installing / waiting / active worker slots.
//! - **Lifecycle**: Workers move Parsed → Installing → Installed →
//!   Activating → Activated, or to Redundant on failure or replacement.
//! - **Pre-caching**: Install fetches the whole manifest concurrently and
//!   commits it as a single batch. One failed entry discards the batch.
//! - **Interception**: [`ServiceWorkerHost::handle_fetch`] answers from the
//!   cache when it can and delegates the request to the network when it
//!   cannot, returning the network response as-is.
//! - **Events**: State transitions stream to the host over an unbounded
//!   channel for UI surfaces and tests.
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost
//!     ├── Registration (per scope)
//!     │       ├── installing / waiting / active  (ServiceWorker)
//!     │       └── WorkerConfig  (scope, cache name, manifest)
//!     ├── CacheStorage  (shared, behind RwLock)
//!     └── Fetcher  (network seam)
//! ```
//!
//! The cache name and manifest live in [`WorkerConfig`], which both the
//! install step and any interception-time tooling read. Nothing else names
//! the container, so renaming a cache is a one-line config change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use hashbrown::HashMap;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use wavekit_cache::{CacheStorage, CachedResponse, ResourceKey};
use wavekit_fetch::{FetchError, Fetcher, Request, Response};

// ==================== Error Types ====================

/// Errors from registration, lifecycle, and fetch handling.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("No registration for scope: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid manifest entry '{entry}': {reason}")]
    InvalidManifestEntry { entry: String, reason: String },

    #[error("Pre-cache fetch of {url} failed")]
    Precache {
        url: Url,
        #[source]
        source: FetchError,
    },

    #[error("Pre-cache fetch of {url} returned status {status}")]
    PrecacheStatus { url: Url, status: u16 },

    #[error("Network fetch failed: {0}")]
    Network(#[from] FetchError),
}

// ==================== Worker Identity ====================

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Worker State ====================

/// Lifecycle state of a single worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Registered but the install step has not started.
    #[default]
    Parsed,
    /// Install step running; the pre-cache batch is in flight.
    Installing,
    /// Install finished; worker is waiting to activate.
    Installed,
    /// Activation in progress.
    Activating,
    /// Worker controls fetches for its scope.
    Activated,
    /// Worker was replaced, failed to install, or was unregistered.
    Redundant,
}

// ==================== Worker Config ====================

/// Configuration shared by the install step and fetch interception.
///
/// The cache container name appears here and nowhere else, so the install
/// writer and any cache tooling stay on the same container by construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scope URL the worker controls. Manifest paths resolve against it.
    pub scope: Url,
    /// Name of the cache container the install step populates.
    pub cache_name: String,
    /// Asset manifest: paths or absolute URLs fetched at install time.
    pub precache: Vec<String>,
}

impl WorkerConfig {
    pub fn new(scope: Url, cache_name: impl Into<String>) -> Self {
        Self {
            scope,
            cache_name: cache_name.into(),
            precache: Vec::new(),
        }
    }

    /// Sets the asset manifest fetched at install time.
    pub fn with_precache<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Resolves every manifest entry against the scope. Fails on the first
    /// entry that does not parse; nothing is fetched in that case.
    fn resolve_manifest(&self) -> Result<Vec<Url>, SwError> {
        self.precache
            .iter()
            .map(|entry| {
                self.scope
                    .join(entry)
                    .map_err(|e| SwError::InvalidManifestEntry {
                        entry: entry.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }
}

// ==================== Service Worker ====================

/// A single worker version inside a registration slot.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: WorkerId,
    pub config: WorkerConfig,
    pub state: WorkerState,
    /// Failure message when the worker went redundant during install.
    pub error: Option<String>,
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            id: WorkerId::new(),
            config,
            state: WorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: WorkerState) {
        debug!(
            worker = self.id.raw(),
            from = ?self.state,
            to = ?state,
            "Worker state change"
        );
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

// ==================== Registration ====================

/// A worker registration for one scope.
///
/// At most one worker occupies each slot: `installing` while the install
/// step runs, `waiting` once installed, `active` once activated.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Stages a new worker version in the installing slot, replacing any
    /// version already there.
    pub fn update(&mut self, config: WorkerConfig) -> WorkerId {
        if let Some(old) = self.installing.take() {
            debug!(
                scope = %self.scope,
                worker = old.id.raw(),
                "Replacing staged worker before it installed"
            );
        }
        let worker = ServiceWorker::new(config);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Moves the installing worker to the waiting slot after a successful
    /// install. A worker already waiting is replaced and goes redundant.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Installed);
            if let Some(mut old) = self.waiting.take() {
                old.set_state(WorkerState::Redundant);
            }
            self.waiting = Some(worker);
        }
    }

    /// Promotes the waiting worker to active. The previously active worker
    /// goes redundant.
    pub fn activate(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            worker.set_state(WorkerState::Activating);
            if let Some(mut old) = self.active.take() {
                old.set_state(WorkerState::Redundant);
            }
            worker.set_state(WorkerState::Activated);
            self.active = Some(worker);
        }
    }

    /// Marks every worker in the registration redundant.
    pub fn unregister(&mut self) {
        for slot in [&mut self.installing, &mut self.waiting, &mut self.active] {
            if let Some(worker) = slot {
                worker.set_state(WorkerState::Redundant);
            }
        }
    }

    /// Ids of all workers currently occupying slots.
    fn worker_ids(&self) -> Vec<WorkerId> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .filter_map(|slot| slot.as_ref().map(|w| w.id))
            .collect()
    }
}

/// Point-in-time view of a registration's slots, for hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSnapshot {
    pub scope: String,
    pub installing: Option<WorkerState>,
    pub waiting: Option<WorkerState>,
    pub active: Option<WorkerState>,
}

// ==================== Fetch Event ====================

/// An outbound request passing through the worker's fetch interception.
///
/// The request is not consumed by a cache hit; on a miss it is forwarded
/// to the network exactly as received.
#[derive(Debug)]
pub struct FetchEvent {
    pub request: Request,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    /// Convenience for the common page-asset case.
    pub fn get(url: Url) -> Self {
        Self::new(Request::get(url))
    }

    /// Cache lookup identity for this request: method plus URL with the
    /// fragment stripped.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.request.method.as_str(), &self.request.url)
    }
}

// ==================== Served Response ====================

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

/// Response handed back to the caller of [`ServiceWorkerHost::handle_fetch`].
///
/// Cache hits and network responses collapse into the same shape; `source`
/// records which path produced it.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl ServedResponse {
    fn from_cached(entry: &CachedResponse) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            source: ResponseSource::Cache,
        }
    }

    fn from_network(response: &Response) -> Self {
        Self {
            status: response.status.as_u16(),
            headers: capture_headers(&response.headers),
            body: response.body.to_vec(),
            source: ResponseSource::Network,
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers.get(&name).map(String::as_str)
    }
}

/// Flattens a header map into owned pairs with lowercase names. Values that
/// are not valid UTF-8 are skipped; repeated names keep the last value.
fn capture_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

// ==================== Events ====================

/// Lifecycle notifications streamed to the host.
#[derive(Debug, Clone)]
pub enum SwEvent {
    /// A new worker version was staged for a scope.
    UpdateFound { scope: String },
    /// A worker changed state.
    StateChange {
        scope: String,
        worker_id: WorkerId,
        state: WorkerState,
    },
}

// ==================== Service Worker Host ====================

/// Owns registrations and the shared cache storage, and runs the install
/// and fetch-interception paths against a pluggable [`Fetcher`].
pub struct ServiceWorkerHost {
    registrations: Arc<RwLock<HashMap<String, Registration>>>,
    /// Shared cache storage. Exposed so hosts can inspect or clear caches.
    pub caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: mpsc::UnboundedSender<SwEvent>,
}

impl ServiceWorkerHost {
    /// Creates a host and the receiving end of its event stream.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> (Self, mpsc::UnboundedReceiver<SwEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let host = Self {
            registrations: Arc::new(RwLock::new(HashMap::new())),
            caches: Arc::new(RwLock::new(CacheStorage::new())),
            fetcher,
            event_tx,
        };
        (host, event_rx)
    }

    /// Registers a worker for the config's scope, staging it in the
    /// installing slot. Returns the scope key used by the other operations.
    ///
    /// Registering the same scope again stages a new worker version; the
    /// replaced one never ran and is simply dropped.
    pub async fn register(&self, config: WorkerConfig) -> Result<String, SwError> {
        if config.scope.cannot_be_a_base() {
            return Err(SwError::RegistrationFailed(format!(
                "scope '{}' cannot serve as a base for manifest paths",
                config.scope
            )));
        }
        if config.cache_name.is_empty() {
            return Err(SwError::RegistrationFailed(
                "cache name must not be empty".to_string(),
            ));
        }

        let scope_key = config.scope.to_string();
        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_key.clone())
                .or_insert_with(|| Registration::new(config.scope.clone()));
            let worker_id = registration.update(config);
            info!(scope = %scope_key, worker = worker_id.raw(), "Registered worker version");
        }
        self.emit(SwEvent::UpdateFound {
            scope: scope_key.clone(),
        });
        Ok(scope_key)
    }

    /// Runs the install step for the scope's staged worker.
    ///
    /// Every manifest entry is fetched concurrently; responses are staged
    /// off to the side and committed to the named cache container in one
    /// batch only after all of them succeeded. Any failure, transport or
    /// non-2xx status alike, discards the whole batch and leaves the worker
    /// redundant. The container itself is opened up front, so after a
    /// failed install it exists but holds none of the batch's entries.
    ///
    /// The future resolves only once the batch is committed or discarded,
    /// so awaiting it extends the install step over the full pre-cache.
    pub async fn install(&self, scope: &str) -> Result<(), SwError> {
        let (worker_id, config) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| SwError::NotFound(scope.to_string()))?;
            let worker = registration.installing.as_mut().ok_or_else(|| {
                SwError::InvalidState(format!("no staged worker for scope {scope}"))
            })?;
            if worker.state != WorkerState::Parsed {
                return Err(SwError::InvalidState(format!(
                    "worker {} already started installing ({:?})",
                    worker.id.raw(),
                    worker.state
                )));
            }
            worker.set_state(WorkerState::Installing);
            (worker.id, worker.config.clone())
        };
        self.emit(SwEvent::StateChange {
            scope: scope.to_string(),
            worker_id,
            state: WorkerState::Installing,
        });

        // The container is created before any fetch, matching the order of
        // an open-then-populate install. Opening is idempotent.
        self.caches.write().await.open(&config.cache_name);

        match self.precache(&config).await {
            Ok(entries) => {
                let mut registrations = self.registrations.write().await;
                let registration = registrations
                    .get_mut(scope)
                    .ok_or_else(|| SwError::NotFound(scope.to_string()))?;
                if registration.installing.as_ref().map(|w| w.id) != Some(worker_id) {
                    warn!(
                        scope,
                        worker = worker_id.raw(),
                        "Install abandoned; worker was replaced mid-install"
                    );
                    return Err(SwError::InvalidState(format!(
                        "worker {} was replaced during install",
                        worker_id.raw()
                    )));
                }
                {
                    let mut storage = self.caches.write().await;
                    storage.open(&config.cache_name).put_batch(entries);
                }
                registration.install_complete();
                drop(registrations);
                info!(scope, cache = %config.cache_name, "Install complete");
                self.emit(SwEvent::StateChange {
                    scope: scope.to_string(),
                    worker_id,
                    state: WorkerState::Installed,
                });
                Ok(())
            }
            Err(e) => {
                let mut registrations = self.registrations.write().await;
                if let Some(registration) = registrations.get_mut(scope) {
                    if registration.installing.as_ref().map(|w| w.id) == Some(worker_id) {
                        if let Some(mut worker) = registration.installing.take() {
                            worker.error = Some(e.to_string());
                            worker.set_state(WorkerState::Redundant);
                        }
                        drop(registrations);
                        self.emit(SwEvent::StateChange {
                            scope: scope.to_string(),
                            worker_id,
                            state: WorkerState::Redundant,
                        });
                    }
                }
                warn!(scope, error = %e, "Install failed; batch discarded");
                Err(e)
            }
        }
    }

    /// Fetches the whole manifest concurrently and stages the entries.
    ///
    /// The first failure cancels the remaining fetches and nothing already
    /// staged becomes visible.
    async fn precache(&self, config: &WorkerConfig) -> Result<Vec<CachedResponse>, SwError> {
        let urls = config.resolve_manifest()?;
        debug!(
            cache = %config.cache_name,
            entries = urls.len(),
            "Pre-caching asset manifest"
        );
        let fetches = urls.into_iter().map(|url| {
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                let key = ResourceKey::get(&url);
                let response = fetcher
                    .fetch(Request::get(url.clone()))
                    .await
                    .map_err(|source| SwError::Precache {
                        url: url.clone(),
                        source,
                    })?;
                if !response.ok() {
                    return Err(SwError::PrecacheStatus {
                        url,
                        status: response.status.as_u16(),
                    });
                }
                debug!(key = %key, bytes = response.body.len(), "Pre-cached");
                Ok(CachedResponse::new(
                    &key,
                    response.status.as_u16(),
                    capture_headers(&response.headers),
                    response.body.to_vec(),
                ))
            }
        });
        try_join_all(fetches).await
    }

    /// Promotes the scope's waiting worker to active.
    pub async fn activate(&self, scope: &str) -> Result<(), SwError> {
        let (promoted, demoted) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| SwError::NotFound(scope.to_string()))?;
            let promoted = registration.waiting.as_ref().map(|w| w.id).ok_or_else(|| {
                SwError::InvalidState(format!("no installed worker waiting for scope {scope}"))
            })?;
            let demoted = registration.active.as_ref().map(|w| w.id);
            registration.activate();
            (promoted, demoted)
        };
        if let Some(worker_id) = demoted {
            self.emit(SwEvent::StateChange {
                scope: scope.to_string(),
                worker_id,
                state: WorkerState::Redundant,
            });
        }
        self.emit(SwEvent::StateChange {
            scope: scope.to_string(),
            worker_id: promoted,
            state: WorkerState::Activated,
        });
        info!(scope, worker = promoted.raw(), "Worker activated");
        Ok(())
    }

    /// Removes the scope's registration, marking its workers redundant.
    /// Cached entries are not touched.
    pub async fn unregister(&self, scope: &str) -> bool {
        let removed = {
            let mut registrations = self.registrations.write().await;
            registrations.remove(scope)
        };
        match removed {
            Some(mut registration) => {
                let ids = registration.worker_ids();
                registration.unregister();
                for worker_id in ids {
                    self.emit(SwEvent::StateChange {
                        scope: scope.to_string(),
                        worker_id,
                        state: WorkerState::Redundant,
                    });
                }
                info!(scope, "Unregistered");
                true
            }
            None => false,
        }
    }

    /// Answers an intercepted fetch: cache first, network fallback.
    ///
    /// The lookup walks every cache container. On a hit the stored response
    /// is served and the network is never consulted; a hit is never
    /// revalidated. On a miss the request goes to the network exactly as
    /// received and the response is returned without being cached. Network
    /// responses pass through whatever their status; only transport
    /// failures surface as errors.
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<ServedResponse, SwError> {
        let key = event.key();
        {
            let caches = self.caches.read().await;
            if let Some(entry) = caches.match_request(&key) {
                debug!(key = %key, "Fetch served from cache");
                return Ok(ServedResponse::from_cached(entry));
            }
        }
        debug!(key = %key, "Cache miss; going to network");
        let response = self.fetcher.fetch(event.request).await?;
        Ok(ServedResponse::from_network(&response))
    }

    /// Scope keys of all current registrations.
    pub async fn scopes(&self) -> Vec<String> {
        let registrations = self.registrations.read().await;
        registrations.keys().cloned().collect()
    }

    /// Slot states for one registration, if it exists.
    pub async fn snapshot(&self, scope: &str) -> Option<RegistrationSnapshot> {
        let registrations = self.registrations.read().await;
        registrations.get(scope).map(|r| RegistrationSnapshot {
            scope: scope.to_string(),
            installing: r.installing.as_ref().map(|w| w.state),
            waiting: r.waiting.as_ref().map(|w| w.state),
            active: r.active.as_ref().map(|w| w.state),
        })
    }

    fn emit(&self, event: SwEvent) {
        // Receiver may be gone; lifecycle still proceeds.
        let _ = self.event_tx.send(event);
    }
}

// ==================== Tests ====================
