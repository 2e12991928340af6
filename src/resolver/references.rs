use super::{CrossIndexResolver, ReferencePage};
use crate::bloom::apply_bloom_filter;
use crate::context::QueryContext;
use crate::cursor::{Cursor, MonikerCursor, PackageCursor, PositionCursor};
use crate::error::{Result, UpstreamExt};
use crate::model::{Location, MonikerKind, MonikerTable, Range, ResolvedLocation};
use crate::util::resolve_locations;
use std::collections::HashSet;
use tracing::debug;

/// Drives a reference search cursor through its phases until a page is full.
pub struct ReferencePageResolver<'a> {
    resolver: &'a CrossIndexResolver,
    repository_id: i64,
    commit: &'a str,
    limit: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    SameRepo,
    RemoteRepo,
}

type Step = (Vec<ResolvedLocation>, Cursor);

impl<'a> ReferencePageResolver<'a> {
    pub fn new(resolver: &'a CrossIndexResolver, repository_id: i64, commit: &'a str, limit: usize) -> Self {
        Self {
            resolver,
            repository_id,
            commit,
            limit,
        }
    }

    pub fn resolve_page(&self, ctx: &QueryContext, mut cursor: Cursor) -> Result<ReferencePage> {
        let mut locations = Vec::new();
        let mut remaining = self.limit;

        while remaining > 0 && !cursor.is_done() {
            ctx.check()?;
            let phase = cursor.phase();
            // The dump the cursor is anchored in went away: nothing left to
            // resume from.
            let (found, next) = self
                .resolver
                .or_empty(self.step(ctx, cursor, remaining).map(Some))?
                .unwrap_or((Vec::new(), Cursor::Done));
            if next.phase() != phase {
                debug!(from = phase, to = next.phase(), found = found.len(), "reference cursor advanced");
            }
            remaining = remaining.saturating_sub(found.len());
            locations.extend(found);
            cursor = next;
        }

        Ok(ReferencePage { locations, cursor })
    }

    fn step(&self, ctx: &QueryContext, cursor: Cursor, limit: usize) -> Result<Step> {
        match cursor {
            Cursor::SameDump(c) => self.same_dump(ctx, c, limit),
            Cursor::SameDumpMonikers(c) => self.same_dump_monikers(ctx, c, limit),
            Cursor::DefinitionMonikers(c) => self.definition_monikers(ctx, c, limit),
            Cursor::SameRepo(c) => self.via_reference_pager(ctx, c, limit, Scope::SameRepo),
            Cursor::RemoteRepo(c) => self.via_reference_pager(ctx, c, limit, Scope::RemoteRepo),
            Cursor::Done => Ok((Vec::new(), Cursor::Done)),
        }
    }

    fn same_dump(&self, ctx: &QueryContext, c: PositionCursor, limit: usize) -> Result<Step> {
        let dump = self.resolver.dump(ctx, c.dump_id)?;
        let Some(bundle) = self.resolver.bundle(ctx, &dump)? else {
            return Ok((Vec::new(), Cursor::Done));
        };
        let locations = bundle.references(ctx, &c.path, c.line, c.character)?;

        // Offsets come from caller-held tokens and may be arbitrarily large.
        let next_skip = c.skip_results.saturating_add(limit);
        let start = c.skip_results.min(locations.len());
        let end = next_skip.min(locations.len());
        let page = resolve_locations(&dump, locations[start..end].to_vec());

        let next = if next_skip <= locations.len() {
            Cursor::SameDump(PositionCursor {
                skip_results: next_skip,
                ..c
            })
        } else {
            Cursor::SameDumpMonikers(PositionCursor { skip_results: 0, ..c })
        };
        Ok((page, next))
    }

    fn same_dump_monikers(&self, ctx: &QueryContext, c: PositionCursor, limit: usize) -> Result<Step> {
        let dump = self.resolver.dump(ctx, c.dump_id)?;
        let Some(bundle) = self.resolver.bundle(ctx, &dump)? else {
            return Ok((Vec::new(), Cursor::Done));
        };

        // Moniker rows can repeat locations already reported from the
        // reference result.
        let local: HashSet<(String, Range)> = bundle
            .references(ctx, &c.path, c.line, c.character)?
            .into_iter()
            .map(|location| (location.path, location.range))
            .collect();

        let mut found = Vec::new();
        let mut more = false;
        for moniker in &c.monikers {
            let (results, count) = bundle.moniker_results(
                ctx,
                MonikerTable::References,
                &moniker.scheme,
                &moniker.identifier,
                c.skip_results,
                Some(limit),
            )?;
            if results.is_empty() {
                continue;
            }
            found = results
                .into_iter()
                .filter(|location: &Location| !local.contains(&(location.path.clone(), location.range)))
                .collect();
            more = c.skip_results.saturating_add(limit) < count;
            break;
        }

        let page = resolve_locations(&dump, found);
        let next = if more {
            Cursor::SameDumpMonikers(PositionCursor {
                skip_results: c.skip_results.saturating_add(limit),
                ..c
            })
        } else {
            Cursor::DefinitionMonikers(MonikerCursor {
                dump_id: c.dump_id,
                path: c.path,
                monikers: c.monikers,
                skip_results: 0,
            })
        };
        Ok((page, next))
    }

    fn definition_monikers(&self, ctx: &QueryContext, c: MonikerCursor, limit: usize) -> Result<Step> {
        let dump = self.resolver.dump(ctx, c.dump_id)?;
        let Some(bundle) = self.resolver.bundle(ctx, &dump)? else {
            return Ok((Vec::new(), Cursor::Done));
        };

        // The package of the first qualified moniker is what other dumps are
        // searched for once this phase is exhausted.
        let mut after = Cursor::Done;
        for moniker in &c.monikers {
            let Some(package_id) = moniker.package_information_id.as_deref() else {
                continue;
            };
            if let Some(package) = bundle.package_information(ctx, &c.path, package_id)? {
                after = Cursor::SameRepo(PackageCursor {
                    dump_id: c.dump_id,
                    scheme: moniker.scheme.clone(),
                    identifier: moniker.identifier.clone(),
                    name: package.name,
                    version: package.version,
                    ..PackageCursor::default()
                });
                break;
            }
        }

        let mut found = None;
        for moniker in c.monikers.iter().filter(|m| m.kind == MonikerKind::Import) {
            let (locations, count) = self.resolver.lookup_moniker(
                ctx,
                bundle.as_ref(),
                &c.path,
                moniker,
                MonikerTable::References,
                c.skip_results,
                Some(limit),
            )?;
            if !locations.is_empty() {
                found = Some((locations, count));
                break;
            }
        }

        let Some((locations, count)) = found else {
            return Ok((Vec::new(), after));
        };
        let seen = c.skip_results.saturating_add(locations.len());
        if seen < count {
            let next = Cursor::DefinitionMonikers(MonikerCursor {
                skip_results: seen,
                ..c
            });
            return Ok((locations, next));
        }
        Ok((locations, after))
    }

    /// Visits the dumps that reference the cursor's package, one batch at a
    /// time, paging through each dump's moniker references.
    fn via_reference_pager(
        &self,
        ctx: &QueryContext,
        mut c: PackageCursor,
        limit: usize,
        scope: Scope,
    ) -> Result<Step> {
        let remote_dump_limit = self.resolver.remote_dump_limit();
        if c.dump_ids.is_empty() {
            ctx.check()?;
            let store = self.resolver.store();
            let (total, pager) = match scope {
                Scope::SameRepo => store
                    .same_repo_pager(
                        ctx,
                        self.repository_id,
                        self.commit,
                        &c.scheme,
                        &c.name,
                        &c.version,
                        remote_dump_limit,
                    )
                    .upstream("store.same_repo_pager")?,
                Scope::RemoteRepo => store
                    .package_reference_pager(
                        ctx,
                        &c.scheme,
                        &c.name,
                        &c.version,
                        self.repository_id,
                        remote_dump_limit,
                    )
                    .upstream("store.package_reference_pager")?,
            };

            let mut offset = c.skip_dumps_when_batching;
            let mut kept = Vec::new();
            while kept.len() < remote_dump_limit && offset < total {
                ctx.check()?;
                let page = pager
                    .page_from_offset(ctx, offset)
                    .upstream("pager.page_from_offset")?;
                if page.is_empty() {
                    break;
                }
                let (matching, scanned) =
                    apply_bloom_filter(page, &c.identifier, remote_dump_limit - kept.len());
                kept.extend(matching);
                offset = offset.saturating_add(scanned);
            }

            if kept.is_empty() {
                return Ok((Vec::new(), self.after_scope(&c, scope)));
            }
            debug!(
                scope = scope.name(),
                dumps = kept.len(),
                offset,
                total,
                "fetched batch of referencing dumps"
            );
            c.dump_ids = kept.iter().map(|reference| reference.dump_id).collect();
            c.skip_dumps_when_batching = offset;
            c.total_dumps_when_batching = total;
            c.skip_dumps_in_batch = 0;
            c.skip_results_in_dump = 0;
        }

        let batch = c.dump_ids.clone();
        for (i, &dump_id) in batch.iter().enumerate() {
            if i < c.skip_dumps_in_batch || dump_id == c.dump_id {
                continue;
            }
            ctx.check()?;
            let Some(dump) = self
                .resolver
                .store()
                .get_dump_by_id(ctx, dump_id)
                .upstream("store.get_dump_by_id")?
            else {
                continue;
            };
            let Some(bundle) = self.resolver.bundle(ctx, &dump)? else {
                continue;
            };

            // The result offset only belongs to the dump the cursor stopped in.
            let skip = if i == c.skip_dumps_in_batch { c.skip_results_in_dump } else { 0 };
            let (results, count) = self.resolver.or_empty(bundle.moniker_results(
                ctx,
                MonikerTable::References,
                &c.scheme,
                &c.identifier,
                skip,
                Some(limit),
            ))?;
            if results.is_empty() {
                continue;
            }

            let seen = skip.saturating_add(results.len());
            let page = resolve_locations(&dump, results);
            let next = if seen < count {
                PackageCursor {
                    skip_dumps_in_batch: i,
                    skip_results_in_dump: seen,
                    ..c
                }
                .into_scope(scope)
            } else if i + 1 < batch.len() {
                PackageCursor {
                    skip_dumps_in_batch: i + 1,
                    skip_results_in_dump: 0,
                    ..c
                }
                .into_scope(scope)
            } else {
                self.next_batch(c, scope)
            };
            return Ok((page, next));
        }

        Ok((Vec::new(), self.next_batch(c, scope)))
    }

    fn next_batch(&self, c: PackageCursor, scope: Scope) -> Cursor {
        if c.skip_dumps_when_batching < c.total_dumps_when_batching {
            PackageCursor {
                dump_ids: Vec::new(),
                skip_dumps_in_batch: 0,
                skip_results_in_dump: 0,
                ..c
            }
            .into_scope(scope)
        } else {
            self.after_scope(&c, scope)
        }
    }

    fn after_scope(&self, c: &PackageCursor, scope: Scope) -> Cursor {
        match scope {
            Scope::SameRepo => Cursor::RemoteRepo(c.restart()),
            Scope::RemoteRepo => Cursor::Done,
        }
    }
}

impl Scope {
    fn name(self) -> &'static str {
        match self {
            Scope::SameRepo => "same-repo",
            Scope::RemoteRepo => "remote-repo",
        }
    }
}

impl PackageCursor {
    fn into_scope(self, scope: Scope) -> Cursor {
        match scope {
            Scope::SameRepo => Cursor::SameRepo(self),
            Scope::RemoteRepo => Cursor::RemoteRepo(self),
        }
    }
}
