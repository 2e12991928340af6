use super::{BundleQuery, BundleQueryEngine, CacheSizes};
use crate::context::QueryContext;
use crate::error::{Error, Result, UpstreamExt};
use crate::observe::{MetricsRegistry, Observed, Observer};
use crate::store::{BundleProvider, BundleReader, ReaderSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

struct Entry {
    query: Arc<dyn BundleQuery>,
    reader: Arc<dyn BundleReader>,
}

/// Opens one engine per dump and keeps it for reuse, so the per-engine
/// caches survive across requests.
pub struct EngineProvider {
    source: Arc<dyn ReaderSource>,
    cache_sizes: CacheSizes,
    observer: Option<Observer>,
    engines: Mutex<HashMap<i64, Entry>>,
}

impl EngineProvider {
    pub fn new(source: Arc<dyn ReaderSource>, cache_sizes: CacheSizes) -> Self {
        Self {
            source,
            cache_sizes,
            observer: None,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Wraps every engine handed out in an [`Observed`] interceptor.
    pub fn with_observer(mut self, metrics: Arc<MetricsRegistry>, slow_threshold: Duration) -> Self {
        self.observer = Some(Observer::new("bundle", metrics, slow_threshold));
        self
    }

    fn close_all(&self) {
        let entries: Vec<(i64, Entry)> = self.lock().drain().collect();
        for (dump_id, entry) in entries {
            close_reader(dump_id, &entry.reader);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, Entry>> {
        match self.engines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl BundleProvider for EngineProvider {
    fn open(&self, ctx: &QueryContext, dump_id: i64) -> Result<Option<Arc<dyn BundleQuery>>> {
        if let Some(entry) = self.lock().get(&dump_id) {
            return Ok(Some(Arc::clone(&entry.query)));
        }

        ctx.check()?;
        let Some(reader) = self
            .source
            .open_reader(ctx, dump_id)
            .upstream("reader_source.open_reader")?
        else {
            return Ok(None);
        };

        let engine = match BundleQueryEngine::open(ctx, dump_id, Arc::clone(&reader), self.cache_sizes) {
            Ok(engine) => engine,
            Err(Error::BundleUnavailable(_)) => {
                close_reader(dump_id, &reader);
                return Ok(None);
            }
            Err(err) => {
                close_reader(dump_id, &reader);
                return Err(err);
            }
        };
        let query: Arc<dyn BundleQuery> = match &self.observer {
            Some(observer) => Arc::new(Observed::new(
                Arc::new(engine) as Arc<dyn BundleQuery>,
                observer.clone(),
            )),
            None => Arc::new(engine),
        };

        let mut engines = self.lock();
        if let Some(existing) = engines.get(&dump_id) {
            // Another request opened the same dump first.
            let winner = Arc::clone(&existing.query);
            drop(engines);
            close_reader(dump_id, &reader);
            return Ok(Some(winner));
        }
        debug!(dump_id, "opened bundle");
        engines.insert(
            dump_id,
            Entry {
                query: Arc::clone(&query),
                reader,
            },
        );
        Ok(Some(query))
    }

    /// Drops the cached engine for a dump and closes its reader. Queries
    /// still holding the engine fail with `BundleUnavailable`.
    fn evict(&self, dump_id: i64) {
        let entry = self.lock().remove(&dump_id);
        if let Some(entry) = entry {
            debug!(dump_id, "evicted bundle");
            close_reader(dump_id, &entry.reader);
        }
    }
}

impl Drop for EngineProvider {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn close_reader(dump_id: i64, reader: &Arc<dyn BundleReader>) {
    if let Err(err) = reader.close() {
        warn!(dump_id, error = %format!("{err:#}"), "failed to close bundle reader");
    }
}
