//! Pluggable eviction for the derivative cache.

use lru::LruCache;

use super::derivative::DerivativeKey;

/// Default cache capacity: 256MB
pub const DEFAULT_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Decides which derivatives leave the cache.
///
/// The cache calls these hooks while holding its lock, so implementations
/// must not block. Keys returned by [`evict`](Self::evict) are already
/// forgotten by the policy; the cache only drops the entries.
pub trait EvictionPolicy: Send {
    fn on_insert(&mut self, key: &DerivativeKey, size: usize);

    fn on_access(&mut self, key: &DerivativeKey);

    fn on_remove(&mut self, key: &DerivativeKey);

    /// Victims to drop right now.
    fn evict(&mut self) -> Vec<DerivativeKey>;

    /// Bytes currently tracked.
    fn size(&self) -> usize;

    /// Byte budget, if the policy has one.
    fn capacity(&self) -> Option<usize>;
}

/// Least-recently-used eviction bounded by total bytes.
///
/// An entry larger than the whole budget is evicted as soon as it is
/// inserted.
pub struct LruBytePolicy {
    order: LruCache<DerivativeKey, usize>,
    max_size: usize,
    current_size: usize,
}

impl LruBytePolicy {
    pub fn new(max_size: usize) -> Self {
        Self {
            order: LruCache::unbounded(),
            max_size,
            current_size: 0,
        }
    }
}

impl Default for LruBytePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl EvictionPolicy for LruBytePolicy {
    fn on_insert(&mut self, key: &DerivativeKey, size: usize) {
        if let Some(old) = self.order.put(key.clone(), size) {
            self.current_size = self.current_size.saturating_sub(old);
        }
        self.current_size += size;
    }

    fn on_access(&mut self, key: &DerivativeKey) {
        // Promote to most recently used
        self.order.get(key);
    }

    fn on_remove(&mut self, key: &DerivativeKey) {
        if let Some(size) = self.order.pop(key) {
            self.current_size = self.current_size.saturating_sub(size);
        }
    }

    fn evict(&mut self) -> Vec<DerivativeKey> {
        let mut victims = Vec::new();
        while self.current_size > self.max_size {
            match self.order.pop_lru() {
                Some((key, size)) => {
                    self.current_size = self.current_size.saturating_sub(size);
                    victims.push(key);
                }
                None => break,
            }
        }
        victims
    }

    fn size(&self) -> usize {
        self.current_size
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.max_size)
    }
}
