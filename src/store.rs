//! Contracts for the collaborators the query engine and resolver read from.
//!
//! Implementations return `anyhow::Result`; the resolver wraps failures with
//! the operation name before surfacing them.

use crate::bloom::IdentifierFilter;
use crate::context::QueryContext;
use crate::error::Result as QueryResult;
use crate::model::{DocumentData, Dump, Location, MetaData, MonikerTable, ResultChunkData};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A dump that references a package, with the identifiers it uses from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub dump_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<IdentifierFilter>,
}

/// Pages through the package references matching a query.
pub trait ReferencePager {
    fn page_from_offset(&self, ctx: &QueryContext, offset: usize) -> Result<Vec<PackageReference>>;
}

/// Cross-dump metadata: dumps, commits, packages and package references.
pub trait Store: Send + Sync {
    fn get_dump_by_id(&self, ctx: &QueryContext, id: i64) -> Result<Option<Dump>>;

    /// Candidate dumps whose root is compatible with `path`, in store order.
    fn find_closest_dumps(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        path: &str,
        exact_path: bool,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>>;

    fn has_commit(&self, ctx: &QueryContext, repository_id: i64, commit: &str) -> Result<bool>;

    fn has_repository(&self, ctx: &QueryContext, repository_id: i64) -> Result<bool>;

    /// The dump that provides the given package.
    fn get_package(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<Dump>>;

    /// References to a package from dumps of the same repository visible at `commit`.
    fn same_repo_pager<'a>(
        &'a self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        scheme: &str,
        name: &str,
        version: &str,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager + 'a>)>;

    /// References to a package from dumps of every other repository.
    fn package_reference_pager<'a>(
        &'a self,
        ctx: &QueryContext,
        scheme: &str,
        name: &str,
        version: &str,
        repository_id: i64,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager + 'a>)>;
}

/// Brings a repository's commit graph up to date. Only invoked when the
/// queried commit is unknown but the repository is.
pub trait CommitUpdater: Send + Sync {
    fn update(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        is_commit_known: &dyn Fn() -> Result<bool>,
    ) -> Result<()>;
}

/// Raw access to one dump's stored symbol table.
///
/// A reader whose data went away after it was opened (closed, evicted,
/// file deleted) fails with [`crate::Error::BundleUnavailable`].
pub trait BundleReader: Send + Sync {
    /// `Ok(None)` when the bundle carries no metadata row.
    fn read_meta(&self, ctx: &QueryContext) -> Result<Option<MetaData>>;

    fn read_document(&self, ctx: &QueryContext, path: &str) -> Result<Option<DocumentData>>;

    fn read_result_chunk(&self, ctx: &QueryContext, index: usize) -> Result<Option<ResultChunkData>>;

    /// Rows of the definitions or references table for a moniker, plus the
    /// total row count. `take = None` reads every row after `skip`.
    fn read_monikers(
        &self,
        ctx: &QueryContext,
        table: MonikerTable,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<Location>, usize)>;

    fn read_definitions(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<Location>, usize)> {
        self.read_monikers(ctx, MonikerTable::Definitions, scheme, identifier, skip, take)
    }

    fn read_references(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<Location>, usize)> {
        self.read_monikers(ctx, MonikerTable::References, scheme, identifier, skip, take)
    }

    /// Document paths starting with `prefix`, sorted.
    fn paths_with_prefix(&self, ctx: &QueryContext, prefix: &str) -> Result<Vec<String>>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens readers for dumps. `Ok(None)` means the dump's data is gone.
pub trait ReaderSource: Send + Sync {
    fn open_reader(&self, ctx: &QueryContext, dump_id: i64) -> Result<Option<Arc<dyn BundleReader>>>;
}

/// Hands out query engines per dump. `Ok(None)` means the bundle is unavailable.
pub trait BundleProvider: Send + Sync {
    fn open(
        &self,
        ctx: &QueryContext,
        dump_id: i64,
    ) -> QueryResult<Option<Arc<dyn crate::bundle::BundleQuery>>>;

    /// Forgets any engine held for the dump; the next `open` starts fresh.
    fn evict(&self, dump_id: i64);
}
