use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::derivative::{Derivative, DerivativeKey};
use super::eviction::{EvictionPolicy, LruBytePolicy, DEFAULT_CACHE_CAPACITY};
use crate::error::PipelineError;
use crate::store::{AssetId, AssetListener};
use crate::transcode::TransformSpec;

type Shared = Option<Result<Derivative, PipelineError>>;

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Already cached
    Hit,
    /// This caller started the computation
    Miss,
    /// Another caller's computation was in flight and was shared
    Joined,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Joined => "joined",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub capacity_bytes: Option<usize>,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub shared: u64,
    pub evictions: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    shared: AtomicU64,
    evictions: AtomicU64,
    discarded: AtomicU64,
}

struct Flight {
    id: u64,
    rx: watch::Receiver<Shared>,
}

struct Inner {
    entries: HashMap<DerivativeKey, Derivative>,
    by_asset: HashMap<AssetId, HashSet<TransformSpec>>,
    policy: Box<dyn EvictionPolicy>,
    in_flight: HashMap<DerivativeKey, Flight>,
    next_flight: u64,
}

impl Inner {
    /// Store an entry and apply eviction. Returns the number evicted.
    fn insert(&mut self, key: DerivativeKey, derivative: Derivative) -> usize {
        let size = derivative.content_length();
        if self.entries.insert(key.clone(), derivative).is_some() {
            self.policy.on_remove(&key);
        }
        self.policy.on_insert(&key, size);
        self.by_asset
            .entry(key.asset_id.clone())
            .or_default()
            .insert(key.spec);

        let victims = self.policy.evict();
        for victim in &victims {
            self.forget(victim);
        }
        victims.len()
    }

    /// Drop an entry the policy has already let go of.
    fn forget(&mut self, key: &DerivativeKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if let Some(specs) = self.by_asset.get_mut(&key.asset_id) {
            specs.remove(&key.spec);
            if specs.is_empty() {
                self.by_asset.remove(&key.asset_id);
            }
        }
        removed
    }
}

/// Pending result of [`DerivativeCache::lookup`].
pub struct PendingDerivative {
    status: CacheStatus,
    state: PendingState,
}

enum PendingState {
    Ready(Derivative),
    Waiting(watch::Receiver<Shared>),
}

impl PendingDerivative {
    pub fn status(&self) -> CacheStatus {
        self.status
    }

    /// Wait for the shared computation to finish.
    ///
    /// Dropping the future does not cancel the computation; other waiters
    /// and the cache still receive its result.
    pub async fn wait(self) -> Result<Derivative, PipelineError> {
        match self.state {
            PendingState::Ready(derivative) => Ok(derivative),
            PendingState::Waiting(mut rx) => {
                let shared = rx.wait_for(Option::is_some).await.map_err(|_| {
                    PipelineError::Internal("derivative computation abandoned".to_string())
                })?;
                (*shared).clone().unwrap_or_else(|| {
                    Err(PipelineError::Internal(
                        "derivative computation produced no result".to_string(),
                    ))
                })
            }
        }
    }
}

/// Derivative cache with single-flight computation.
///
/// At most one computation per key runs at a time; concurrent callers for
/// the same key share its result. Only successful results are stored.
/// Eviction is delegated to an [`EvictionPolicy`]. Evicted bytes that were
/// already handed out stay valid because [`bytes::Bytes`] is
/// reference-counted.
///
/// The internal mutex guards bookkeeping only and is never held while a
/// derivative is being computed.
#[derive(Clone)]
pub struct DerivativeCache {
    inner: Arc<Mutex<Inner>>,
    counters: Arc<Counters>,
}

impl DerivativeCache {
    /// Create a cache with the default LRU byte capacity (256MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a cache with an LRU byte capacity.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_policy(Box::new(LruBytePolicy::new(max_size)))
    }

    pub fn with_policy(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                by_asset: HashMap::new(),
                policy,
                in_flight: HashMap::new(),
                next_flight: 0,
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Return the cached derivative, or compute it once.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: DerivativeKey,
        compute: F,
    ) -> Result<(Derivative, CacheStatus), PipelineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Derivative, PipelineError>> + Send + 'static,
    {
        let pending = self.lookup(key, compute).await;
        let status = pending.status();
        pending.wait().await.map(|derivative| (derivative, status))
    }

    /// Resolve a key to a hit, a new computation, or a join.
    ///
    /// `compute` is only invoked when this call becomes the leader. It runs
    /// in its own task so a caller that goes away does not cancel it.
    pub async fn lookup<F, Fut>(&self, key: DerivativeKey, compute: F) -> PendingDerivative
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Derivative, PipelineError>> + Send + 'static,
    {
        let mut inner = self.inner.lock().await;

        if let Some(derivative) = inner.entries.get(&key).cloned() {
            inner.policy.on_access(&key);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(asset_id = %key.asset_id, "Derivative cache hit");
            return PendingDerivative {
                status: CacheStatus::Hit,
                state: PendingState::Ready(derivative),
            };
        }

        if let Some(flight) = inner.in_flight.get(&key) {
            self.counters.shared.fetch_add(1, Ordering::Relaxed);
            debug!(asset_id = %key.asset_id, "Joining in-flight derivative computation");
            return PendingDerivative {
                status: CacheStatus::Joined,
                state: PendingState::Waiting(flight.rx.clone()),
            };
        }

        let flight_id = inner.next_flight;
        inner.next_flight += 1;
        let (tx, rx) = watch::channel(None);
        inner.in_flight.insert(
            key.clone(),
            Flight {
                id: flight_id,
                rx: rx.clone(),
            },
        );
        drop(inner);

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(asset_id = %key.asset_id, "Derivative cache miss");

        let shared = Arc::clone(&self.inner);
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            // Inner task turns a panicking computation into an error
            let result = match tokio::spawn(compute()).await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::Internal(format!(
                    "derivative computation failed: {}",
                    e
                ))),
            };

            {
                let mut inner = shared.lock().await;
                let current = inner
                    .in_flight
                    .get(&key)
                    .is_some_and(|flight| flight.id == flight_id);

                if current {
                    inner.in_flight.remove(&key);
                    if let Ok(derivative) = &result {
                        let evicted = inner.insert(key.clone(), derivative.clone());
                        if evicted > 0 {
                            counters
                                .evictions
                                .fetch_add(evicted as u64, Ordering::Relaxed);
                        }
                    }
                } else if result.is_ok() {
                    counters.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        asset_id = %key.asset_id,
                        "Discarding derivative of invalidated asset"
                    );
                }
            }

            if let Err(e) = &result {
                warn!(asset_id = %key.asset_id, error = %e, "Derivative computation failed");
            }
            tx.send_replace(Some(result));
        });

        PendingDerivative {
            status: CacheStatus::Miss,
            state: PendingState::Waiting(rx),
        }
    }

    /// Get a cached derivative without computing.
    pub async fn get(&self, key: &DerivativeKey) -> Option<Derivative> {
        let mut inner = self.inner.lock().await;
        let derivative = inner.entries.get(key).cloned();
        if derivative.is_some() {
            inner.policy.on_access(key);
        }
        derivative
    }

    pub async fn contains(&self, key: &DerivativeKey) -> bool {
        self.inner.lock().await.entries.contains_key(key)
    }

    /// Drop every derivative of an asset.
    ///
    /// In-flight computations for the asset are detached: current waiters
    /// still get their result, but it is not stored.
    pub async fn invalidate_asset(&self, asset_id: &AssetId) -> usize {
        let mut inner = self.inner.lock().await;

        let specs = inner.by_asset.remove(asset_id).unwrap_or_default();
        let mut removed = 0;
        for spec in specs {
            let key = DerivativeKey::new(asset_id.clone(), spec);
            if inner.entries.remove(&key).is_some() {
                inner.policy.on_remove(&key);
                removed += 1;
            }
        }

        let before = inner.in_flight.len();
        inner.in_flight.retain(|key, _| &key.asset_id != asset_id);
        let detached = before - inner.in_flight.len();

        debug!(asset_id = %asset_id, removed, detached, "Invalidated derivatives");
        removed
    }

    /// Remove everything. In-flight computations are detached.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let keys: Vec<_> = inner.entries.keys().cloned().collect();
        for key in &keys {
            inner.policy.on_remove(key);
        }
        inner.entries.clear();
        inner.by_asset.clear();
        inner.in_flight.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Total bytes held, as tracked by the eviction policy.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.policy.size()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.policy.size(),
            capacity_bytes: inner.policy.capacity(),
            in_flight: inner.in_flight.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            shared: self.counters.shared.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

impl Default for DerivativeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetListener for DerivativeCache {
    async fn asset_deleted(&self, id: &AssetId) {
        self.invalidate_asset(id).await;
    }
}
