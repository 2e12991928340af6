//! Cross-dump query orchestration.
//!
//! The resolver finds the dumps that can answer a query, translates
//! repository paths into bundle paths and back, and falls back to moniker
//! lookups in other dumps when a dump has no local answer.

mod references;

use crate::bundle::BundleQuery;
use crate::context::QueryContext;
use crate::cursor::{Cursor, PositionCursor};
use crate::error::{Error, Result, UpstreamExt};
use crate::model::{
    Dump, HoverResult, MonikerData, MonikerKind, MonikerTable, QualifiedMoniker,
    ResolvedCodeIntelligenceRange, ResolvedDiagnostic, ResolvedLocation,
};
use crate::store::{BundleProvider, CommitUpdater, Store};
use crate::util::{anchor_path, path_in_bundle, resolve_locations};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

pub use references::ReferencePageResolver;

/// One page of a cross-dump reference search and the cursor that resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferencePage {
    pub locations: Vec<ResolvedLocation>,
    pub cursor: Cursor,
}

impl ReferencePage {
    /// The token to pass back for the next page, if any remain.
    pub fn next_cursor(&self) -> Option<String> {
        (!self.cursor.is_done()).then(|| self.cursor.encode())
    }
}

pub trait CodeIntelApi: Send + Sync {
    fn find_closest_dumps(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        path: &str,
        exact_path: bool,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>>;

    fn ranges(
        &self,
        ctx: &QueryContext,
        file: &str,
        start_line: u32,
        end_line: u32,
        dump_id: i64,
    ) -> Result<Vec<ResolvedCodeIntelligenceRange>>;

    fn definitions(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Vec<ResolvedLocation>>;

    fn references(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        limit: usize,
        cursor: Cursor,
    ) -> Result<ReferencePage>;

    fn hover(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Option<HoverResult>>;

    fn diagnostics(
        &self,
        ctx: &QueryContext,
        prefix: &str,
        dump_id: i64,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<ResolvedDiagnostic>, usize)>;

    fn dependencies(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Vec<Vec<QualifiedMoniker>>>;

    fn decode_or_create_cursor(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
        dump_id: i64,
        raw: Option<&str>,
    ) -> Result<Cursor>;
}

pub struct CrossIndexResolver {
    store: Arc<dyn Store>,
    bundles: Arc<dyn BundleProvider>,
    commit_updater: Arc<dyn CommitUpdater>,
    remote_dump_limit: usize,
}

impl CrossIndexResolver {
    pub fn new(
        store: Arc<dyn Store>,
        bundles: Arc<dyn BundleProvider>,
        commit_updater: Arc<dyn CommitUpdater>,
        remote_dump_limit: usize,
    ) -> Self {
        Self {
            store,
            bundles,
            commit_updater,
            remote_dump_limit: remote_dump_limit.max(1),
        }
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn remote_dump_limit(&self) -> usize {
        self.remote_dump_limit
    }

    pub(crate) fn dump(&self, ctx: &QueryContext, dump_id: i64) -> Result<Dump> {
        ctx.check()?;
        self.store
            .get_dump_by_id(ctx, dump_id)
            .upstream("store.get_dump_by_id")?
            .ok_or(Error::MissingDump(dump_id))
    }

    /// The engine for a dump, or `None` with a warning when its data is gone.
    pub(crate) fn bundle(&self, ctx: &QueryContext, dump: &Dump) -> Result<Option<Arc<dyn BundleQuery>>> {
        ctx.check()?;
        let bundle = self.bundles.open(ctx, dump.id)?;
        if bundle.is_none() {
            warn!(dump_id = dump.id, repository_id = dump.repository_id, "bundle unavailable, skipping dump");
        }
        Ok(bundle)
    }

    /// Treats a bundle that went away mid-query like one that was never
    /// there: its cached engine is dropped and the answer is empty.
    pub(crate) fn or_empty<T: Default>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(Error::BundleUnavailable(dump_id)) => {
                warn!(dump_id, "bundle became unavailable, dropping cached engine");
                self.bundles.evict(dump_id);
                Ok(T::default())
            }
            other => other,
        }
    }

    /// Brings the commit graph up to date when the commit is new to a known
    /// repository.
    fn update_commits(&self, ctx: &QueryContext, repository_id: i64, commit: &str) -> Result<()> {
        ctx.check()?;
        if self
            .store
            .has_commit(ctx, repository_id, commit)
            .upstream("store.has_commit")?
        {
            return Ok(());
        }
        ctx.check()?;
        if !self
            .store
            .has_repository(ctx, repository_id)
            .upstream("store.has_repository")?
        {
            return Ok(());
        }
        ctx.check()?;
        let store = self.store.as_ref();
        let is_commit_known = || store.has_commit(ctx, repository_id, commit);
        self.commit_updater
            .update(ctx, repository_id, &is_commit_known)
            .upstream("commit_updater.update")
    }

    /// Resolves a moniker through the dump that provides its package.
    pub(crate) fn lookup_moniker(
        &self,
        ctx: &QueryContext,
        bundle: &dyn BundleQuery,
        path: &str,
        moniker: &MonikerData,
        table: MonikerTable,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<ResolvedLocation>, usize)> {
        let Some(package_id) = moniker.package_information_id.as_deref() else {
            return Ok((Vec::new(), 0));
        };
        let Some(package) = bundle.package_information(ctx, path, package_id)? else {
            warn!(dump_id = bundle.dump_id(), package_id, "package information not found");
            return Ok((Vec::new(), 0));
        };

        ctx.check()?;
        let Some(target) = self
            .store
            .get_package(ctx, &moniker.scheme, &package.name, &package.version)
            .upstream("store.get_package")?
        else {
            return Ok((Vec::new(), 0));
        };
        let Some(target_bundle) = self.bundle(ctx, &target)? else {
            return Ok((Vec::new(), 0));
        };

        let (locations, count) = self.or_empty(target_bundle.moniker_results(
            ctx,
            table,
            &moniker.scheme,
            &moniker.identifier,
            skip,
            take,
        ))?;
        Ok((resolve_locations(&target, locations), count))
    }

    fn definitions_in(
        &self,
        ctx: &QueryContext,
        dump: &Dump,
        bundle: &dyn BundleQuery,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<ResolvedLocation>> {
        let local = bundle.definitions(ctx, path, line, character)?;
        if !local.is_empty() {
            return Ok(resolve_locations(dump, local));
        }

        let groups = bundle.monikers_by_position(ctx, path, line, character)?;
        let Some(group) = groups.into_iter().next() else {
            return Ok(Vec::new());
        };
        first_non_empty(group, |moniker| {
            if moniker.kind == MonikerKind::Import {
                let (locations, _) =
                    self.lookup_moniker(ctx, bundle, path, &moniker, MonikerTable::Definitions, 0, None)?;
                return Ok(locations);
            }
            let (locations, _) = bundle.moniker_results(
                ctx,
                MonikerTable::Definitions,
                &moniker.scheme,
                &moniker.identifier,
                0,
                None,
            )?;
            Ok(resolve_locations(dump, locations))
        })
    }

    /// Local hover text, else the hover at the definition, possibly in
    /// another dump.
    fn hover_in(
        &self,
        ctx: &QueryContext,
        dump: &Dump,
        bundle: &dyn BundleQuery,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<HoverResult>> {
        if let Some((text, range)) = bundle.hover(ctx, path, line, character)? {
            return Ok(Some(HoverResult {
                dump: dump.clone(),
                text,
                range,
            }));
        }

        let definitions = self.definitions_in(ctx, dump, bundle, path, line, character)?;
        let Some(definition) = definitions.into_iter().next() else {
            return Ok(None);
        };
        let target = definition.dump;
        let Some(target_bundle) = self.bundle(ctx, &target)? else {
            return Ok(None);
        };
        let start = definition.range.start;
        let found = self.or_empty(target_bundle.hover(
            ctx,
            path_in_bundle(&target.root, &definition.path),
            start.line,
            start.character,
        ))?;
        Ok(found.map(|(text, range)| HoverResult {
            dump: target,
            text,
            range,
        }))
    }

    /// Moniker groups at a position, each moniker paired with its package.
    fn qualified_monikers(
        &self,
        ctx: &QueryContext,
        bundle: &dyn BundleQuery,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Vec<QualifiedMoniker>>> {
        let groups = bundle.monikers_by_position(ctx, path, line, character)?;
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let mut qualified = Vec::with_capacity(group.len());
            for moniker in group {
                let package = match moniker.package_information_id.as_deref() {
                    Some(id) => bundle.package_information(ctx, path, id)?,
                    None => None,
                };
                qualified.push(QualifiedMoniker { moniker, package });
            }
            out.push(qualified);
        }
        Ok(out)
    }
}

/// Tries candidates in order and returns the first non-empty answer.
fn first_non_empty<C, T>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: impl FnMut(C) -> Result<Vec<T>>,
) -> Result<Vec<T>> {
    for candidate in candidates {
        let found = attempt(candidate)?;
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

impl CodeIntelApi for CrossIndexResolver {
    fn find_closest_dumps(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        path: &str,
        exact_path: bool,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>> {
        self.update_commits(ctx, repository_id, commit)?;

        ctx.check()?;
        let candidates = self
            .store
            .find_closest_dumps(ctx, repository_id, commit, path, exact_path, indexer)
            .upstream("store.find_closest_dumps")?;
        if !exact_path {
            return Ok(candidates);
        }

        let mut dumps = Vec::with_capacity(candidates.len());
        for dump in candidates {
            let Some(bundle) = self.bundle(ctx, &dump)? else {
                continue;
            };
            if self.or_empty(bundle.exists(ctx, path_in_bundle(&dump.root, path)))? {
                dumps.push(dump);
            }
        }
        Ok(dumps)
    }

    fn ranges(
        &self,
        ctx: &QueryContext,
        file: &str,
        start_line: u32,
        end_line: u32,
        dump_id: i64,
    ) -> Result<Vec<ResolvedCodeIntelligenceRange>> {
        let dump = self.dump(ctx, dump_id)?;
        let Some(bundle) = self.bundle(ctx, &dump)? else {
            return Ok(Vec::new());
        };
        let ranges =
            self.or_empty(bundle.ranges(ctx, path_in_bundle(&dump.root, file), start_line, end_line))?;
        Ok(ranges
            .into_iter()
            .map(|range| ResolvedCodeIntelligenceRange {
                range: range.range,
                definitions: resolve_locations(&dump, range.definitions),
                references: resolve_locations(&dump, range.references),
                hover_text: range.hover_text,
            })
            .collect())
    }

    fn definitions(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Vec<ResolvedLocation>> {
        let dump = self.dump(ctx, dump_id)?;
        let Some(bundle) = self.bundle(ctx, &dump)? else {
            return Ok(Vec::new());
        };
        let path = path_in_bundle(&dump.root, file);
        self.or_empty(self.definitions_in(ctx, &dump, bundle.as_ref(), path, line, character))
    }

    fn references(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        limit: usize,
        cursor: Cursor,
    ) -> Result<ReferencePage> {
        ReferencePageResolver::new(self, repository_id, commit, limit).resolve_page(ctx, cursor)
    }

    fn hover(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Option<HoverResult>> {
        let dump = self.dump(ctx, dump_id)?;
        let Some(bundle) = self.bundle(ctx, &dump)? else {
            return Ok(None);
        };
        let path = path_in_bundle(&dump.root, file);
        self.or_empty(self.hover_in(ctx, &dump, bundle.as_ref(), path, line, character))
    }

    fn diagnostics(
        &self,
        ctx: &QueryContext,
        prefix: &str,
        dump_id: i64,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<ResolvedDiagnostic>, usize)> {
        let dump = self.dump(ctx, dump_id)?;
        let Some(bundle) = self.bundle(ctx, &dump)? else {
            return Ok((Vec::new(), 0));
        };
        let (diagnostics, total) =
            self.or_empty(bundle.diagnostics(ctx, path_in_bundle(&dump.root, prefix), skip, take))?;
        let resolved = diagnostics
            .into_iter()
            .map(|mut diagnostic| {
                diagnostic.path = anchor_path(&dump.root, &diagnostic.path);
                ResolvedDiagnostic {
                    dump: dump.clone(),
                    diagnostic,
                }
            })
            .collect();
        Ok((resolved, total))
    }

    fn dependencies(
        &self,
        ctx: &QueryContext,
        file: &str,
        line: u32,
        character: u32,
        dump_id: i64,
    ) -> Result<Vec<Vec<QualifiedMoniker>>> {
        let dump = self.dump(ctx, dump_id)?;
        let Some(bundle) = self.bundle(ctx, &dump)? else {
            return Ok(Vec::new());
        };
        let path = path_in_bundle(&dump.root, file);
        self.or_empty(self.qualified_monikers(ctx, bundle.as_ref(), path, line, character))
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
        if let Some(raw) = raw.filter(|raw| !raw.is_empty()) {
            return Cursor::decode(raw);
        }

        let dump = self.dump(ctx, dump_id)?;
        let path = path_in_bundle(&dump.root, path).to_string();
        let monikers = match self.bundle(ctx, &dump)? {
            Some(bundle) => self
                .or_empty(bundle.monikers_by_position(ctx, &path, line, character))?
                .into_iter()
                .flatten()
                .collect(),
            None => Vec::new(),
        };
        Ok(Cursor::SameDump(PositionCursor {
            dump_id,
            path,
            line,
            character,
            monikers,
            skip_results: 0,
        }))
    }
}
