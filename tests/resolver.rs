use codenav::QueryContext;
use codenav::bundle::{BundleBuilder, CacheSizes, EngineProvider};
use codenav::error::Error;
use codenav::memory::{MemoryReaderSource, MemoryStore, RecordingCommitUpdater};
use codenav::model::{
    DiagnosticData, Dump, Location, MonikerData, MonikerKind, MonikerTable,
    PackageInformationData, Range, RangeData,
};
use codenav::resolver::{CodeIntelApi, CrossIndexResolver};
use std::sync::Arc;

fn dump(id: i64, repository_id: i64, commit: &str, root: &str) -> Dump {
    Dump {
        id,
        repository_id,
        commit: commit.to_string(),
        root: root.to_string(),
        indexer: "lsif-go".to_string(),
    }
}

fn moniker(kind: MonikerKind, identifier: &str, package: Option<&str>) -> MonikerData {
    MonikerData {
        kind,
        scheme: "gomod".to_string(),
        identifier: identifier.to_string(),
        package_information_id: package.map(str::to_string),
    }
}

fn with_monikers(mut range: RangeData, ids: &[&str]) -> RangeData {
    range.moniker_ids = ids.iter().map(|id| id.to_string()).collect();
    range
}

struct Fixture {
    store: Arc<MemoryStore>,
    source: Arc<MemoryReaderSource>,
    updater: Arc<RecordingCommitUpdater>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_updater(Arc::new(MemoryStore::new()), RecordingCommitUpdater::new())
    }

    fn with_updater(store: Arc<MemoryStore>, updater: RecordingCommitUpdater) -> Self {
        Self {
            store,
            source: Arc::new(MemoryReaderSource::new()),
            updater: Arc::new(updater),
        }
    }

    fn resolver(&self) -> CrossIndexResolver {
        let bundles = Arc::new(EngineProvider::new(self.source.clone(), CacheSizes::default()));
        CrossIndexResolver::new(self.store.clone(), bundles, self.updater.clone(), 10)
    }
}

/// Dump 1 imports `leftpad.Pad` from the `leftpad@1.0` package provided by
/// dump 2 (another repository, rooted at `lib/`).
fn cross_repo_fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.store.add_dump(dump(1, 1, "c1", ""));
    fixture.store.add_dump(dump(2, 2, "x1", "lib/"));
    fixture.store.add_package("gomod", "leftpad", "1.0", 2);

    let mut app = BundleBuilder::new(2);
    app.range(
        "main.go",
        "r1",
        with_monikers(RangeData::new(3, 0, 3, 5), &["m0", "m1"]),
    )
    // Unqualified import: no package information, contributes nothing.
    .moniker("main.go", "m0", moniker(MonikerKind::Import, "leftpad.Pad", None))
    .moniker("main.go", "m1", moniker(MonikerKind::Import, "leftpad.Pad", Some("p1")))
    .package_information(
        "main.go",
        "p1",
        PackageInformationData {
            name: "leftpad".to_string(),
            version: "1.0".to_string(),
        },
    )
    .range(
        "main.go",
        "r2",
        with_monikers(RangeData::new(7, 0, 7, 4), &["m2"]),
    )
    .moniker("main.go", "m2", moniker(MonikerKind::Export, "app.Run", None))
    .moniker_row(
        MonikerTable::Definitions,
        "gomod",
        "app.Run",
        Location::new("run.go", Range::new(1, 5, 1, 8)),
    );
    fixture.source.insert(1, app.build());

    let mut lib = BundleBuilder::new(2);
    lib.range(
        "pad.go",
        "r1",
        RangeData {
            hover_result_id: Some("h1".to_string()),
            ..RangeData::new(10, 5, 10, 8)
        },
    )
    .hover("pad.go", "h1", "func Pad(s string) string")
    .moniker_row(
        MonikerTable::Definitions,
        "gomod",
        "leftpad.Pad",
        Location::new("pad.go", Range::new(10, 5, 10, 8)),
    );
    fixture.source.insert(2, lib.build());
    fixture
}

#[test]
fn definitions_follow_import_monikers_into_the_package_dump() {
    let fixture = cross_repo_fixture();
    let resolver = fixture.resolver();
    let found = resolver
        .definitions(&QueryContext::new(), "main.go", 3, 2, 1)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].dump.id, 2);
    assert_eq!(found[0].path, "lib/pad.go");
    assert_eq!(found[0].range, Range::new(10, 5, 10, 8));
}

#[test]
fn definitions_use_export_monikers_within_the_dump() {
    let fixture = cross_repo_fixture();
    let found = fixture
        .resolver()
        .definitions(&QueryContext::new(), "main.go", 7, 1, 1)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].dump.id, 1);
    assert_eq!(found[0].path, "run.go");
}

#[test]
fn hover_falls_back_to_the_definition() {
    let fixture = cross_repo_fixture();
    let hover = fixture
        .resolver()
        .hover(&QueryContext::new(), "main.go", 3, 2, 1)
        .unwrap()
        .unwrap();
    assert_eq!(hover.dump.id, 2);
    assert_eq!(hover.text, "func Pad(s string) string");
    assert_eq!(hover.range, Range::new(10, 5, 10, 8));
}

#[test]
fn dependencies_attach_package_information() {
    let fixture = cross_repo_fixture();
    let groups = fixture
        .resolver()
        .dependencies(&QueryContext::new(), "main.go", 3, 2, 1)
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert!(groups[0][0].package.is_none());
    assert_eq!(groups[0][1].package.as_ref().unwrap().name, "leftpad");
    assert_eq!(groups[0][1].moniker.identifier, "leftpad.Pad");
}

#[test]
fn unknown_dump_is_an_error() {
    let fixture = cross_repo_fixture();
    let err = fixture
        .resolver()
        .definitions(&QueryContext::new(), "main.go", 3, 2, 99)
        .unwrap_err();
    assert!(matches!(err, Error::MissingDump(99)));
    assert_eq!(err.code(), "missing_dump");
}

#[test]
fn unavailable_bundle_yields_empty_results() {
    let fixture = cross_repo_fixture();
    fixture.store.add_dump(dump(5, 1, "c1", "gone/"));
    let resolver = fixture.resolver();
    let ctx = QueryContext::new();

    assert!(resolver.definitions(&ctx, "gone/a.go", 1, 1, 5).unwrap().is_empty());
    assert!(resolver.hover(&ctx, "gone/a.go", 1, 1, 5).unwrap().is_none());
    assert!(resolver.ranges(&ctx, "gone/a.go", 0, 10, 5).unwrap().is_empty());
    let (diagnostics, total) = resolver.diagnostics(&ctx, "gone", 5, 0, 10).unwrap();
    assert!(diagnostics.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn missing_package_dump_yields_no_definitions() {
    let fixture = cross_repo_fixture();
    fixture.source.remove(2);
    let found = fixture
        .resolver()
        .definitions(&QueryContext::new(), "main.go", 3, 2, 1)
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn cancelled_queries_fail_fast() {
    let fixture = cross_repo_fixture();
    let ctx = QueryContext::new();
    ctx.cancel();
    let err = fixture
        .resolver()
        .definitions(&ctx, "main.go", 3, 2, 1)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(fixture.source.opens(), 0);
}

#[test]
fn closest_dumps_sync_unknown_commits_and_check_exact_paths() {
    let store = Arc::new(MemoryStore::new());
    store.add_commit(1, "c2", &["c1"]);
    store.add_dump(dump(1, 1, "c1", ""));
    store.add_dump(dump(4, 1, "c1", "lib/"));
    let updater = RecordingCommitUpdater::with_pending(store.clone(), 1, &[("c3", &["c2"][..])]);
    let fixture = Fixture::with_updater(store, updater);

    let mut root = BundleBuilder::new(1);
    root.document("main.go");
    fixture.source.insert(1, root.build());
    let mut lib = BundleBuilder::new(1);
    lib.document("util.go");
    fixture.source.insert(4, lib.build());

    let resolver = fixture.resolver();
    let ctx = QueryContext::new();

    let loose = resolver
        .find_closest_dumps(&ctx, 1, "c3", "lib/util.go", false, None)
        .unwrap();
    assert_eq!(loose.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1, 4]);
    assert_eq!(fixture.updater.calls(), vec![1]);
    assert_eq!(fixture.source.opens(), 0);

    let exact = resolver
        .find_closest_dumps(&ctx, 1, "c3", "lib/util.go", true, None)
        .unwrap();
    assert_eq!(exact.iter().map(|d| d.id).collect::<Vec<_>>(), vec![4]);
    // c3 is known now, so no second update.
    assert_eq!(fixture.updater.calls(), vec![1]);

    let filtered = resolver
        .find_closest_dumps(&ctx, 1, "c3", "lib/util.go", false, Some("scip-go"))
        .unwrap();
    assert!(filtered.is_empty());
}

#[test]
fn closest_dumps_skip_update_for_unknown_repositories() {
    let fixture = Fixture::new();
    let dumps = fixture
        .resolver()
        .find_closest_dumps(&QueryContext::new(), 77, "c1", "a.go", false, None)
        .unwrap();
    assert!(dumps.is_empty());
    assert!(fixture.updater.calls().is_empty());
}

#[test]
fn diagnostics_are_paged_and_anchored_at_the_dump_root() {
    let fixture = Fixture::new();
    fixture.store.add_dump(dump(42, 1, "c1", "sub1/"));
    let mut builder = BundleBuilder::new(1);
    for (path, line) in [("a.go", 1), ("a.go", 2), ("a.go", 3), ("b.go", 4), ("b.go", 5)] {
        builder.diagnostic(
            path,
            DiagnosticData {
                severity: 2,
                message: format!("issue {line}"),
                start_line: line,
                end_line: line,
                end_character: 1,
                ..DiagnosticData::default()
            },
        );
    }
    fixture.source.insert(42, builder.build());

    let (diagnostics, total) = fixture
        .resolver()
        .diagnostics(&QueryContext::new(), "sub1", 42, 1, 3)
        .unwrap();
    assert_eq!(total, 5);
    let lines: Vec<u32> = diagnostics.iter().map(|d| d.diagnostic.start_line).collect();
    assert_eq!(lines, vec![2, 3, 4]);
    let paths: Vec<&str> = diagnostics
        .iter()
        .map(|d| d.diagnostic.path.as_str())
        .collect();
    assert_eq!(paths, vec!["sub1/a.go", "sub1/a.go", "sub1/b.go"]);
    assert!(diagnostics.iter().all(|d| d.dump.id == 42));
}

#[test]
fn ranges_are_anchored_at_the_dump_root() {
    let fixture = Fixture::new();
    fixture.store.add_dump(dump(7, 1, "c1", "svc/"));
    let mut builder = BundleBuilder::new(1);
    builder
        .range(
            "api.go",
            "r1",
            RangeData {
                definition_result_id: Some("d1".to_string()),
                ..RangeData::new(2, 0, 2, 6)
            },
        )
        .result("d1", &[("api.go", "r1")]);
    fixture.source.insert(7, builder.build());

    let ranges = fixture
        .resolver()
        .ranges(&QueryContext::new(), "svc/api.go", 0, 5, 7)
        .unwrap();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].definitions[0].path, "svc/api.go");
    assert_eq!(ranges[0].definitions[0].dump.id, 7);
}

#[test]
fn bundle_lost_after_opening_is_evicted_and_skipped() {
    let fixture = cross_repo_fixture();
    let resolver = fixture.resolver();
    let ctx = QueryContext::new();
    assert!(resolver.hover(&ctx, "main.go", 3, 2, 1).unwrap().is_some());
    assert_eq!(fixture.source.opens(), 2);

    let removed = fixture.source.remove(2).unwrap();
    assert!(removed.is_closed());

    // The cached engine for dump 2 now fails underneath the resolver.
    let (diagnostics, total) = resolver.diagnostics(&ctx, "lib", 2, 0, 10).unwrap();
    assert!(diagnostics.is_empty());
    assert_eq!(total, 0);

    // Evicted, so the next lookup asks the source again and finds nothing.
    assert!(resolver.hover(&ctx, "main.go", 3, 2, 1).unwrap().is_none());
    assert_eq!(fixture.source.opens(), 3);
}

#[test]
fn definitions_come_from_the_first_group_only() {
    let fixture = Fixture::new();
    fixture.store.add_dump(dump(3, 1, "c1", ""));
    let mut builder = BundleBuilder::new(1);
    builder
        .range(
            "a.go",
            "outer",
            with_monikers(RangeData::new(4, 0, 4, 30), &["m1", "m2"]),
        )
        .range(
            "a.go",
            "inner",
            with_monikers(RangeData::new(4, 10, 4, 14), &["m3"]),
        )
        .range(
            "a.go",
            "other",
            with_monikers(RangeData::new(9, 0, 9, 5), &["m4", "m2"]),
        )
        .moniker("a.go", "m1", moniker(MonikerKind::Export, "a.First", None))
        .moniker("a.go", "m2", moniker(MonikerKind::Export, "a.Second", None))
        .moniker("a.go", "m3", moniker(MonikerKind::Export, "a.Inner", None))
        .moniker("a.go", "m4", moniker(MonikerKind::Export, "a.Fourth", None));
    for (identifier, path, line) in [
        ("a.Second", "second.go", 1),
        ("a.Inner", "inner.go", 2),
        ("a.Fourth", "fourth.go", 3),
    ] {
        builder.moniker_row(
            MonikerTable::Definitions,
            "gomod",
            identifier,
            Location::new(path, Range::new(line, 0, line, 1)),
        );
    }
    fixture.source.insert(3, builder.build());

    let resolver = fixture.resolver();
    let ctx = QueryContext::new();
    let paths = |line, character| -> Vec<String> {
        resolver
            .definitions(&ctx, "a.go", line, character, 3)
            .unwrap()
            .into_iter()
            .map(|loc| loc.path)
            .collect()
    };

    // a.First has no rows, so a.Second answers; the inner group is never tried.
    assert_eq!(paths(4, 12), vec!["second.go"]);
    // a.Fourth answers first and a.Second is not added to it.
    assert_eq!(paths(9, 2), vec!["fourth.go"]);
}

#[test]
fn closest_dumps_keep_store_order() {
    let store = Arc::new(MemoryStore::new());
    store.add_commit(1, "c2", &["c1"]);
    store.add_commit(1, "c1", &[]);
    // Nearest commit first, so ids come back out of order.
    store.add_dump(dump(9, 1, "c2", "lib/"));
    store.add_dump(dump(3, 1, "c1", ""));
    store.add_dump(dump(5, 1, "c1", "lib/sub/"));
    let fixture = Fixture::with_updater(store, RecordingCommitUpdater::new());
    for (id, path) in [(9, "sub/x.go"), (3, "other.go"), (5, "x.go")] {
        let mut builder = BundleBuilder::new(1);
        builder.document(path);
        fixture.source.insert(id, builder.build());
    }

    let resolver = fixture.resolver();
    let ctx = QueryContext::new();
    let ids = |exact_path| -> Vec<i64> {
        resolver
            .find_closest_dumps(&ctx, 1, "c2", "lib/sub/x.go", exact_path, None)
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect()
    };
    assert_eq!(ids(false), vec![9, 3, 5]);
    assert_eq!(ids(true), vec![9, 5]);
}
