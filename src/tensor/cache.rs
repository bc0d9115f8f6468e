use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

#[derive(Debug)]
struct CacheItem<V> {
    value: Arc<V>,
    instant: Instant,
}

impl<V> CacheItem<V> {
    fn new(value: Arc<V>) -> Self {
        Self {
            value,
            instant: Instant::now(),
        }
    }

    fn count(&self) -> usize {
        Arc::strong_count(&self.value)
    }
}

/// A cache that evicts items nobody else holds once they have been idle for `duration`.
#[derive(Debug, Clone)]
pub struct ResourceCache<K, V> {
    duration: Duration,
    map: Arc<Mutex<HashMap<K, CacheItem<V>>>>,
}

impl<K, V> Default for ResourceCache<K, V> {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(1),
            map: Default::default(),
        }
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: PartialEq + Eq + Hash,
{
    /// Note: If `duration` is 0, the cache won't evict any items.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            map: Default::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, CacheItem<V>>> {
        self.map.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Checkout the item with the given key. If the item doesn't exist, `f` is called to construct it.
    pub fn checkout(&self, key: K, f: impl FnOnce() -> V) -> Arc<V> {
        match self.try_checkout(key, || Ok::<_, std::convert::Infallible>(f())) {
            Ok(value) => value,
            Err(err) => match err {},
        }
    }

    /// Like [`checkout`](Self::checkout), but construction may fail; failures are not cached.
    pub fn try_checkout<E>(&self, key: K, f: impl FnOnce() -> Result<V, E>) -> Result<Arc<V>, E> {
        let mut map = self.lock();
        if !self.duration.is_zero() {
            let duration = self.duration;
            map.retain(|_, item| item.count() > 1 || item.instant.elapsed() < duration);
        }

        let value = match map.remove(&key) {
            Some(CacheItem { value, .. }) => {
                log::trace!("resource cache hit");
                value
            }
            None => Arc::new(f()?),
        };
        map.insert(key, CacheItem::new(value.clone()));
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the cache.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
