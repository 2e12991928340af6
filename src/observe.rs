//! Timing and error accounting around the query interfaces.
//!
//! [`Observed`] wraps any [`BundleQuery`] or [`CodeIntelApi`] and records
//! each call under `<scope>.<operation>` in a shared [`MetricsRegistry`].

use crate::bundle::BundleQuery;
use crate::context::QueryContext;
use crate::cursor::Cursor;
use crate::error::Result;
use crate::model::{
    CodeIntelligenceRange, Diagnostic, Dump, HoverResult, Location, MonikerData, MonikerTable,
    PackageInformationData, QualifiedMoniker, Range, ResolvedCodeIntelligenceRange,
    ResolvedDiagnostic, ResolvedLocation,
};
use crate::resolver::{CodeIntelApi, ReferencePage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn};

#[derive(Debug, Default)]
pub struct OperationMetrics {
    calls: AtomicU64,
    errors: AtomicU64,
    slow: AtomicU64,
    total_micros: AtomicU64,
}

impl OperationMetrics {
    fn record(&self, elapsed: Duration, failed: bool, slow: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    pub name: String,
    pub calls: u64,
    pub errors: u64,
    pub slow: u64,
    pub total_micros: u64,
}

/// Named operation counters. Each name is registered once; later lookups
/// return the same counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    operations: Mutex<BTreeMap<String, Arc<OperationMetrics>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(&self, name: &str) -> Arc<OperationMetrics> {
        let mut operations = match self.operations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = operations.get(name) {
            return Arc::clone(existing);
        }
        let metrics = Arc::new(OperationMetrics::default());
        operations.insert(name.to_string(), Arc::clone(&metrics));
        metrics
    }

    pub fn snapshot(&self) -> Vec<OperationSnapshot> {
        let operations = match self.operations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        operations
            .iter()
            .map(|(name, metrics)| OperationSnapshot {
                name: name.clone(),
                calls: metrics.calls(),
                errors: metrics.errors(),
                slow: metrics.slow.load(Ordering::Relaxed),
                total_micros: metrics.total_micros.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct Observer {
    scope: &'static str,
    metrics: Arc<MetricsRegistry>,
    slow_threshold: Duration,
}

impl Observer {
    pub fn new(scope: &'static str, metrics: Arc<MetricsRegistry>, slow_threshold: Duration) -> Self {
        Self {
            scope,
            metrics,
            slow_threshold,
        }
    }

    pub fn observe<T>(&self, op: &'static str, call: impl FnOnce() -> Result<T>) -> Result<T> {
        let name = format!("{}.{}", self.scope, op);
        let metrics = self.metrics.operation(&name);
        let span = info_span!("observe", op = %name);
        let _guard = span.enter();

        let start = Instant::now();
        let result = call();
        let elapsed = start.elapsed();
        let slow = elapsed >= self.slow_threshold;
        metrics.record(elapsed, result.is_err(), slow);

        if slow {
            info!(elapsed_ms = elapsed.as_millis() as u64, "slow operation {name}");
        }
        if let Err(err) = &result {
            warn!(code = err.code(), error = %err, "{name} failed");
        }
        result
    }
}

pub struct Observed<T: ?Sized> {
    inner: Arc<T>,
    observer: Observer,
}

impl<T: ?Sized> Observed<T> {
    pub fn new(inner: Arc<T>, observer: Observer) -> Self {
        Self { inner, observer }
    }
}

impl<T: BundleQuery + ?Sized> BundleQuery for Observed<T> {
    fn dump_id(&self) -> i64 {
        self.inner.dump_id()
    }

    fn exists(&self, ctx: &QueryContext, path: &str) -> Result<bool> {
        self.observer.observe("exists", || self.inner.exists(ctx, path))
    }

    fn ranges(
        &self,
        ctx: &QueryContext,
        path: &str,
        start_line: u32,
        end_line: u32,
    ) -> Result<Vec<CodeIntelligenceRange>> {
        self.observer
            .observe("ranges", || self.inner.ranges(ctx, path, start_line, end_line))
    }

    fn definitions(&self, ctx: &QueryContext, path: &str, line: u32, character: u32)
    -> Result<Vec<Location>> {
        self.observer
            .observe("definitions", || self.inner.definitions(ctx, path, line, character))
    }

    fn references(&self, ctx: &QueryContext, path: &str, line: u32, character: u32)
    -> Result<Vec<Location>> {
        self.observer
            .observe("references", || self.inner.references(ctx, path, line, character))
    }

    fn hover(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(String, Range)>> {
        self.observer
            .observe("hover", || self.inner.hover(ctx, path, line, character))
    }

    fn diagnostics(
        &self,
        ctx: &QueryContext,
        prefix: &str,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<Diagnostic>, usize)> {
        self.observer
            .observe("diagnostics", || self.inner.diagnostics(ctx, prefix, skip, take))
    }

    fn monikers_by_position(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Vec<MonikerData>>> {
        self.observer.observe("monikers_by_position", || {
            self.inner.monikers_by_position(ctx, path, line, character)
        })
    }

    fn moniker_results(
        &self,
        ctx: &QueryContext,
        table: MonikerTable,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<Location>, usize)> {
        self.observer.observe("moniker_results", || {
            self.inner
                .moniker_results(ctx, table, scheme, identifier, skip, take)
        })
    }

    fn package_information(
        &self,
        ctx: &QueryContext,
        path: &str,
        package_information_id: &str,
    ) -> Result<Option<PackageInformationData>> {
        self.observer.observe("package_information", || {
            self.inner.package_information(ctx, path, package_information_id)
        })
    }
}

impl<T: CodeIntelApi + ?Sized> CodeIntelApi for Observed<T> {
    fn find_closest_dumps(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        path: &str,
        exact_path: bool,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>> {
        self.observer.observe("find_closest_dumps", || {
            self.inner
                .find_closest_dumps(ctx, repository_id, commit, path, exact_path, indexer)
        })
    }

    fn ranges(
        &self,
        ctx: &QueryContext,
        file: &str,
        start_line: u32,
        end_line: u32,
        dump_id: i64,
    ) -> Result<Vec<ResolvedCodeIntelligenceRange>> {
        self.observer.observe("ranges", || {
            self.inner.ranges(ctx, file, start_line, end_line, dump_id)
        })
    }

    fn definitions(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Vec<ResolvedLocation>> {
        self.observer.observe("definitions", || {
            self.inner.definitions(ctx, file, line, character, dump_id)
        })
    }

    fn references(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        limit: usize,
        cursor: Cursor,
    ) -> Result<ReferencePage> {
        self.observer.observe("references", || {
            self.inner.references(ctx, repository_id, commit, limit, cursor)
        })
    }

    fn hover(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Option<HoverResult>> {
        self.observer
            .observe("hover", || self.inner.hover(ctx, file, line, character, dump_id))
    }

    fn diagnostics(
        &self,
        ctx: &QueryContext,
        prefix: &str,
        dump_id: i64,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<ResolvedDiagnostic>, usize)> {
        self.observer.observe("diagnostics", || {
            self.inner.diagnostics(ctx, prefix, dump_id, skip, take)
        })
    }

    fn dependencies(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Vec<Vec<QualifiedMoniker>>> {
        self.observer.observe("dependencies", || {
            self.inner.dependencies(ctx, file, line, character, dump_id)
        })
    }

    fn decode_or_create_cursor(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
        dump_id: i64,
        raw: Option<&str>,
    ) -> Result<Cursor> {
        self.observer.observe("decode_or_create_cursor", || {
            self.inner
                .decode_or_create_cursor(ctx, path, line, character, dump_id, raw)
        })
    }
}
