//! Typed in-memory caches with TTL and single-flight recomputation.
//!
//! `Singular<T>` holds one value per name; `SetCache<T>` holds a keyed family
//! of values under one name. Both serialize concurrent recomputation of the
//! same slot through an async mutex: the first caller computes, later callers
//! see the stored value.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T: Clone> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: if ttl.is_zero() {
                None
            } else {
                Some(Instant::now() + ttl)
            },
        }
    }

    fn live_value(&self) -> Option<T> {
        match self.expires_at {
            Some(deadline) if Instant::now() >= deadline => None,
            _ => Some(self.value.clone()),
        }
    }
}

/// A named slot holding a single cached value.
pub struct Singular<T> {
    name: &'static str,
    slot: Mutex<Option<Entry<T>>>,
    gate: tokio::sync::Mutex<()>,
}

impl<T: Clone> Singular<T> {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            slot: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the value if present and not expired.
    pub fn get(&self) -> Option<T> {
        self.slot
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Entry::live_value)
    }

    /// A zero `ttl` means the entry never expires.
    pub fn set(&self, value: T, ttl: Duration) {
        *self.slot.lock().unwrap() = Some(Entry::new(value, ttl));
    }

    pub fn delete(&self) {
        *self.slot.lock().unwrap() = None;
    }

    /// Single-flight read-through: returns the cached value, or computes,
    /// stores and returns it. The boolean reports whether `compute` ran.
    /// A failing `compute` stores nothing and propagates its error.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        ttl: Duration,
        compute: F,
    ) -> Result<(T, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get() {
            return Ok((value, false));
        }
        let _guard = self.gate.lock().await;
        if let Some(value) = self.get() {
            return Ok((value, false));
        }
        let value = compute().await?;
        self.set(value.clone(), ttl);
        Ok((value, true))
    }
}

/// A named family of cached values, keyed by an opaque string.
pub struct SetCache<T> {
    name: &'static str,
    entries: Mutex<HashMap<String, Entry<T>>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<T: Clone> SetCache<T> {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            entries: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .and_then(Entry::live_value)
    }

    pub fn set(&self, key: &str, value: T, ttl: Duration) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), Entry::new(value, ttl));
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Drops every key under this name.
    pub fn flush(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn gate_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap();
        gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Single-flight read-through per key; see [`Singular::get_or_compute`].
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<(T, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok((value, false));
        }
        let gate = self.gate_for(key);
        let _guard = gate.lock().await;
        if let Some(value) = self.get(key) {
            return Ok((value, false));
        }
        let value = compute().await?;
        self.set(key, value.clone(), ttl);
        Ok((value, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn singular_roundtrip_and_delete() {
        let cache: Arc<Singular<i64>> = Singular::new("test");
        assert_eq!(cache.get(), None);
        cache.set(42, Duration::from_secs(60));
        assert_eq!(cache.get(), Some(42));
        cache.delete();
        assert_eq!(cache.get(), None);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache: Arc<Singular<i64>> = Singular::new("test");
        cache.set(1, Duration::from_millis(20));
        assert_eq!(cache.get(), Some(1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(), None);
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let cache: Arc<Singular<i64>> = Singular::new("test");
        cache.set(1, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(), Some(1));
    }

    #[tokio::test]
    async fn concurrent_get_or_compute_runs_compute_once() {
        let cache: Arc<SetCache<String>> = SetCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let (value, _) = cache
                    .get_or_compute("k", Duration::from_secs(60), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::convert::Infallible>("computed".to_string())
                    })
                    .await
                    .unwrap();
                value
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_compute_stores_nothing_and_allows_retry() {
        let cache: Arc<Singular<i64>> = Singular::new("test");
        let result = cache
            .get_or_compute(Duration::from_secs(60), || async { Err::<i64, _>("boom") })
            .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(cache.get(), None);

        let (value, recomputed) = cache
            .get_or_compute(Duration::from_secs(60), || async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(recomputed);
    }

    #[tokio::test]
    async fn get_or_compute_reports_cache_hit() {
        let cache: Arc<SetCache<i64>> = SetCache::new("test");
        cache.set("k", 9, Duration::from_secs(60));
        let (value, recomputed) = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                Ok::<_, std::convert::Infallible>(0)
            })
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert!(!recomputed);
    }

    #[tokio::test]
    async fn flush_drops_every_key() {
        let cache: Arc<SetCache<i64>> = SetCache::new("test");
        cache.set("a", 1, Duration::from_secs(60));
        cache.set("b", 2, Duration::from_secs(60));
        cache.flush();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }
}
