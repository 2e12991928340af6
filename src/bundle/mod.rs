//! Per-dump query engine.
//!
//! A bundle is one dump's symbol table: documents keyed by bundle-relative
//! path, plus a definition/reference result table sharded into result chunks
//! by [`hash_key`]. The engine answers positional and moniker queries against
//! it, caching documents and chunks it has already read.

pub mod builder;
pub mod cache;
pub mod hash;
pub mod provider;
pub mod ranges;

use crate::context::QueryContext;
use crate::error::{Error, MissingKind, Result, UpstreamExt};
use crate::model::{
    CodeIntelligenceRange, Diagnostic, DocumentData, Id, Location, MonikerData, MonikerTable,
    PackageInformationData, Range, RangeData, ResultChunkData, sort_locations,
};
use crate::store::BundleReader;
use cache::LoadingCache;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub use builder::{BundleBuilder, BundleData, MonikerRow};
pub use hash::hash_key;
pub use provider::EngineProvider;

/// The query contract of a single bundle.
pub trait BundleQuery: Send + Sync {
    fn dump_id(&self) -> i64;

    fn exists(&self, ctx: &QueryContext, path: &str) -> Result<bool>;

    /// Ranges that start or end within `[start_line, end_line)`.
    fn ranges(
        &self,
        ctx: &QueryContext,
        path: &str,
        start_line: u32,
        end_line: u32,
    ) -> Result<Vec<CodeIntelligenceRange>>;

    fn definitions(&self, ctx: &QueryContext, path: &str, line: u32, character: u32)
    -> Result<Vec<Location>>;

    fn references(&self, ctx: &QueryContext, path: &str, line: u32, character: u32)
    -> Result<Vec<Location>>;

    fn hover(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(String, Range)>>;

    /// Diagnostics of every document under `prefix`, paged over the
    /// concatenation in path order. The count is the unpaged total.
    fn diagnostics(
        &self,
        ctx: &QueryContext,
        prefix: &str,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<Diagnostic>, usize)>;

    /// One moniker group per enclosing range, outermost first.
    fn monikers_by_position(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Vec<MonikerData>>>;

    fn moniker_results(
        &self,
        ctx: &QueryContext,
        table: MonikerTable,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<Location>, usize)>;

    fn package_information(
        &self,
        ctx: &QueryContext,
        path: &str,
        package_information_id: &str,
    ) -> Result<Option<PackageInformationData>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizes {
    pub documents: usize,
    pub result_chunks: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            documents: 256,
            result_chunks: 256,
        }
    }
}

pub struct BundleQueryEngine {
    dump_id: i64,
    reader: Arc<dyn BundleReader>,
    num_result_chunks: usize,
    documents: LoadingCache<String, DocumentData>,
    result_chunks: LoadingCache<usize, ResultChunkData>,
}

impl BundleQueryEngine {
    /// Reads the bundle metadata once; the chunk count is fixed from here on.
    pub fn open(
        ctx: &QueryContext,
        dump_id: i64,
        reader: Arc<dyn BundleReader>,
        cache_sizes: CacheSizes,
    ) -> Result<Self> {
        ctx.check()?;
        let meta = reader
            .read_meta(ctx)
            .upstream("reader.read_meta")?
            .ok_or_else(|| Error::malformed(dump_id, MissingKind::Metadata, "meta"))?;
        if meta.num_result_chunks == 0 {
            return Err(Error::malformed(dump_id, MissingKind::Metadata, "num_result_chunks"));
        }
        Ok(Self {
            dump_id,
            reader,
            num_result_chunks: meta.num_result_chunks,
            documents: LoadingCache::new(cache_sizes.documents),
            result_chunks: LoadingCache::new(cache_sizes.result_chunks),
        })
    }

    fn document(&self, ctx: &QueryContext, path: &str) -> Result<Option<Arc<DocumentData>>> {
        ctx.check()?;
        self.documents
            .get_or_load(&path.to_string(), || self.reader.read_document(ctx, path))
            .upstream("reader.read_document")
    }

    fn result_chunk(&self, ctx: &QueryContext, index: usize) -> Result<Option<Arc<ResultChunkData>>> {
        ctx.check()?;
        self.result_chunks
            .get_or_load(&index, || self.reader.read_result_chunk(ctx, index))
            .upstream("reader.read_result_chunk")
    }

    fn ranges_at(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(Arc<DocumentData>, Vec<RangeData>)>> {
        let Some(document) = self.document(ctx, path)? else {
            return Ok(None);
        };
        let found = ranges::find_ranges(&document.ranges, line, character);
        Ok(Some((document, found)))
    }

    /// The (path, range id) pairs a definition or reference result points at.
    fn result_by_id(&self, ctx: &QueryContext, id: &str) -> Result<Vec<(String, Id)>> {
        let index = hash_key(id, self.num_result_chunks);
        let chunk = self
            .result_chunk(ctx, index)?
            .ok_or_else(|| Error::malformed(self.dump_id, MissingKind::ResultChunk, index.to_string()))?;
        let pairs = chunk
            .document_id_range_ids
            .get(id)
            .ok_or_else(|| Error::malformed(self.dump_id, MissingKind::Result, id))?;

        pairs
            .iter()
            .map(|pair| {
                let path = chunk.document_paths.get(&pair.document_id).ok_or_else(|| {
                    Error::malformed(self.dump_id, MissingKind::DocumentPath, pair.document_id.as_str())
                })?;
                Ok((path.clone(), pair.range_id.clone()))
            })
            .collect()
    }

    /// Reads final range coordinates, opening each document once.
    fn convert_to_locations(
        &self,
        ctx: &QueryContext,
        results: Vec<(String, Id)>,
    ) -> Result<Vec<Location>> {
        let mut grouped: BTreeMap<String, Vec<Id>> = BTreeMap::new();
        for (path, range_id) in results {
            grouped.entry(path).or_default().push(range_id);
        }

        let mut locations = Vec::new();
        for (path, range_ids) in grouped {
            let document = self
                .document(ctx, &path)?
                .ok_or_else(|| Error::malformed(self.dump_id, MissingKind::Document, path.as_str()))?;
            for range_id in range_ids {
                let range = document
                    .ranges
                    .get(&range_id)
                    .ok_or_else(|| Error::malformed(self.dump_id, MissingKind::Range, range_id.as_str()))?;
                locations.push(Location::new(path.clone(), range.range()));
            }
        }
        sort_locations(&mut locations);
        Ok(locations)
    }

    fn resolve_result(&self, ctx: &QueryContext, id: &str) -> Result<Vec<Location>> {
        let results = self.result_by_id(ctx, id)?;
        self.convert_to_locations(ctx, results)
    }

    fn hover_text<'a>(&self, document: &'a DocumentData, id: &str) -> Result<&'a str> {
        document
            .hover_results
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| Error::malformed(self.dump_id, MissingKind::HoverResult, id))
    }
}

impl BundleQuery for BundleQueryEngine {
    fn dump_id(&self) -> i64 {
        self.dump_id
    }

    fn exists(&self, ctx: &QueryContext, path: &str) -> Result<bool> {
        Ok(self.document(ctx, path)?.is_some())
    }

    fn ranges(
        &self,
        ctx: &QueryContext,
        path: &str,
        start_line: u32,
        end_line: u32,
    ) -> Result<Vec<CodeIntelligenceRange>> {
        let Some(document) = self.document(ctx, path)? else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<&RangeData> = document
            .ranges
            .values()
            .filter(|range| ranges::range_intersects_span(range, start_line, end_line))
            .collect();
        selected.sort_by_key(|range| (range.start_line, range.start_character, range.end_line, range.end_character));

        let result_ids: BTreeSet<&str> = selected
            .iter()
            .flat_map(|range| {
                range
                    .definition_result_id
                    .as_deref()
                    .into_iter()
                    .chain(range.reference_result_id.as_deref())
            })
            .collect();

        let mut locations: HashMap<&str, Vec<Location>> = HashMap::new();
        for id in result_ids {
            locations.insert(id, self.resolve_result(ctx, id)?);
        }

        let mut out = Vec::with_capacity(selected.len());
        for range in selected {
            let definitions = range
                .definition_result_id
                .as_deref()
                .and_then(|id| locations.get(id))
                .cloned()
                .unwrap_or_default();
            // Only same-file references: consumers use these for highlighting.
            let references: Vec<Location> = range
                .reference_result_id
                .as_deref()
                .and_then(|id| locations.get(id))
                .map(|all| all.iter().filter(|loc| loc.path == path).cloned().collect())
                .unwrap_or_default();
            let hover_text = match range.hover_result_id.as_deref() {
                Some(id) => self.hover_text(&document, id)?.to_string(),
                None => String::new(),
            };
            out.push(CodeIntelligenceRange {
                range: range.range(),
                definitions,
                references,
                hover_text,
            });
        }
        Ok(out)
    }

    fn definitions(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        let Some((_, found)) = self.ranges_at(ctx, path, line, character)? else {
            return Ok(Vec::new());
        };
        match found.iter().find_map(|range| range.definition_result_id.as_deref()) {
            Some(id) => self.resolve_result(ctx, id),
            None => Ok(Vec::new()),
        }
    }

    fn references(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>> {
        let Some((_, found)) = self.ranges_at(ctx, path, line, character)? else {
            return Ok(Vec::new());
        };
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for id in found.iter().filter_map(|range| range.reference_result_id.as_deref()) {
            for location in self.resolve_result(ctx, id)? {
                if seen.insert(location.clone()) {
                    all.push(location);
                }
            }
        }
        Ok(all)
    }

    fn hover(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<(String, Range)>> {
        let Some((document, found)) = self.ranges_at(ctx, path, line, character)? else {
            return Ok(None);
        };
        for range in &found {
            if let Some(id) = range.hover_result_id.as_deref() {
                let text = self.hover_text(&document, id)?;
                return Ok(Some((text.to_string(), range.range())));
            }
        }
        Ok(None)
    }

    fn diagnostics(
        &self,
        ctx: &QueryContext,
        prefix: &str,
        skip: usize,
        take: usize,
    ) -> Result<(Vec<Diagnostic>, usize)> {
        ctx.check()?;
        let paths = self
            .reader
            .paths_with_prefix(ctx, prefix)
            .upstream("reader.paths_with_prefix")?;

        let mut total = 0;
        let mut page = Vec::new();
        for path in paths {
            let document = self
                .document(ctx, &path)?
                .ok_or_else(|| Error::malformed(self.dump_id, MissingKind::Document, path.as_str()))?;
            for data in &document.diagnostics {
                if total >= skip && page.len() < take {
                    page.push(Diagnostic::from_data(&path, data));
                }
                total += 1;
            }
        }
        Ok((page, total))
    }

    fn monikers_by_position(
        &self,
        ctx: &QueryContext,
        path: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Vec<MonikerData>>> {
        let Some((document, found)) = self.ranges_at(ctx, path, line, character)? else {
            return Ok(Vec::new());
        };
        found
            .iter()
            .map(|range| {
                range
                    .moniker_ids
                    .iter()
                    .map(|id| {
                        document
                            .monikers
                            .get(id)
                            .cloned()
                            .ok_or_else(|| Error::malformed(self.dump_id, MissingKind::Moniker, id.as_str()))
                    })
                    .collect()
            })
            .collect()
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
        ctx.check()?;
        self.reader
            .read_monikers(ctx, table, scheme, identifier, skip, take)
            .upstream("reader.read_monikers")
    }

    fn package_information(
        &self,
        ctx: &QueryContext,
        path: &str,
        package_information_id: &str,
    ) -> Result<Option<PackageInformationData>> {
        let Some(document) = self.document(ctx, path)? else {
            return Ok(None);
        };
        Ok(document.package_information.get(package_information_id).cloned())
    }
}
