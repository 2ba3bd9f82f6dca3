//! Derivative cache.
//!
//! Maps (asset id, transform spec) to generated derivatives.
//!
//! # Single-flight
//!
//! The first caller for a key becomes the leader and its computation runs
//! in a detached task. Callers arriving while it runs receive a
//! `tokio::sync::watch` receiver for the same result instead of starting
//! their own. Failures are broadcast to waiters but never stored.
//!
//! # Eviction
//!
//! Eviction is delegated to an [`EvictionPolicy`]; the default
//! [`LruBytePolicy`] bounds total bytes and evicts least-recently-used
//! entries first.
//!
//! # Invalidation
//!
//! [`DerivativeCache`] implements [`AssetListener`](crate::store::AssetListener),
//! so registering it with the asset store drops derivatives when their
//! source is deleted, including ones still being computed.

mod derivative;
mod derivative_cache;
mod eviction;

pub use derivative::{Derivative, DerivativeKey};
pub use derivative_cache::{CacheStats, CacheStatus, DerivativeCache, PendingDerivative};
pub use eviction::{EvictionPolicy, LruBytePolicy, DEFAULT_CACHE_CAPACITY};
