use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Bounded cache of immutable values loaded on first use.
///
/// The lock is not held while loading, so concurrent misses for the same
/// key may both read; the first insert wins and later readers share it.
pub struct LoadingCache<K, V> {
    entries: Mutex<LruCache<K, Arc<V>>>,
}

impl<K: Hash + Eq + Clone, V> LoadingCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_or_load<E>(
        &self,
        key: &K,
        load: impl FnOnce() -> Result<Option<V>, E>,
    ) -> Result<Option<Arc<V>>, E> {
        if let Some(value) = self.lock().get(key) {
            return Ok(Some(Arc::clone(value)));
        }
        let Some(value) = load()? else {
            return Ok(None);
        };
        let mut entries = self.lock();
        if let Some(existing) = entries.get(key) {
            return Ok(Some(Arc::clone(existing)));
        }
        let value = Arc::new(value);
        entries.put(key.clone(), Arc::clone(&value));
        Ok(Some(value))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Arc<V>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn loads_once_and_evicts_lru() {
        let cache: LoadingCache<u32, String> = LoadingCache::new(2);
        let loads = Cell::new(0);
        let load = |value: &str| {
            loads.set(loads.get() + 1);
            Ok::<_, ()>(Some(value.to_string()))
        };

        assert_eq!(cache.get_or_load(&1, || load("one")).unwrap().as_deref().map(String::as_str), Some("one"));
        assert_eq!(cache.get_or_load(&1, || load("again")).unwrap().as_deref().map(String::as_str), Some("one"));
        assert_eq!(loads.get(), 1);

        cache.get_or_load(&2, || load("two")).unwrap();
        cache.get_or_load(&3, || load("three")).unwrap();
        assert_eq!(cache.len(), 2);
        cache.get_or_load(&1, || load("reloaded")).unwrap();
        assert_eq!(loads.get(), 4);
    }

    #[test]
    fn misses_are_not_cached() {
        let cache: LoadingCache<u32, String> = LoadingCache::new(4);
        assert!(cache.get_or_load(&1, || Ok::<_, ()>(None)).unwrap().is_none());
        assert!(cache.is_empty());
        let err = cache.get_or_load(&1, || Err::<Option<String>, _>("boom"));
        assert_eq!(err.unwrap_err(), "boom");
    }
}
