use codenav::QueryContext;
use codenav::bloom::IdentifierFilter;
use codenav::bundle::{BundleBuilder, BundleData, BundleQuery, BundleQueryEngine, CacheSizes, EngineProvider};
use codenav::cursor::Cursor;
use codenav::memory::{MemoryBundle, MemoryReaderSource, MemoryStore, RecordingCommitUpdater};
use codenav::model::{
    Dump, Location, MonikerData, MonikerKind, MonikerTable, PackageInformationData, Range,
    RangeData,
};
use codenav::resolver::{CodeIntelApi, CrossIndexResolver};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

const PAD: &str = "leftpad.Pad";

/// A file with `functions` definitions, each referenced from every other.
fn dense_bundle(functions: u32) -> BundleData {
    let mut builder = BundleBuilder::new(16);
    for f in 0..functions {
        let def = format!("def{f}");
        let refs = format!("ref{f}");
        let range_id = format!("r{f}");
        builder.range(
            "main.go",
            &range_id,
            RangeData {
                definition_result_id: Some(def.clone()),
                reference_result_id: Some(refs.clone()),
                ..RangeData::new(f * 10, 0, f * 10, 8)
            },
        );
        builder.result(&def, &[("main.go", range_id.as_str())]);
        let mut targets = vec![("main.go".to_string(), range_id.clone())];
        for u in 0..functions {
            let use_id = format!("u{f}_{u}");
            builder.range(
                "main.go",
                &use_id,
                RangeData {
                    definition_result_id: Some(def.clone()),
                    reference_result_id: Some(refs.clone()),
                    ..RangeData::new(u * 10 + 1 + f % 8, 4, u * 10 + 1 + f % 8, 9)
                },
            );
            targets.push(("main.go".to_string(), use_id));
        }
        let pairs: Vec<(&str, &str)> = targets
            .iter()
            .map(|(path, id)| (path.as_str(), id.as_str()))
            .collect();
        builder.result(&refs, &pairs);
    }
    builder.build()
}

fn bench_engine(c: &mut Criterion) {
    let data = dense_bundle(40);
    let ctx = QueryContext::new();

    c.bench_function("engine_definitions_warm", |b| {
        let engine =
            BundleQueryEngine::open(&ctx, 1, Arc::new(MemoryBundle::new(1, data.clone())), CacheSizes::default())
                .unwrap();
        b.iter(|| black_box(engine.definitions(&ctx, "main.go", black_box(51), 6).unwrap()))
    });

    c.bench_function("engine_references_cold", |b| {
        b.iter(|| {
            let engine = BundleQueryEngine::open(
                &ctx,
                1,
                Arc::new(MemoryBundle::new(1, data.clone())),
                CacheSizes::default(),
            )
            .unwrap();
            black_box(engine.references(&ctx, "main.go", 0, 2).unwrap())
        })
    });

    c.bench_function("engine_ranges_window", |b| {
        let engine =
            BundleQueryEngine::open(&ctx, 1, Arc::new(MemoryBundle::new(1, data.clone())), CacheSizes::default())
                .unwrap();
        b.iter(|| black_box(engine.ranges(&ctx, "main.go", 0, 100).unwrap()))
    });
}

/// One package dump plus `consumers` remote dumps that reference it.
fn remote_world(consumers: i64) -> CrossIndexResolver {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemoryReaderSource::new());
    store.add_dump(Dump {
        id: 1,
        repository_id: 1,
        commit: "c1".to_string(),
        root: String::new(),
        indexer: "lsif-go".to_string(),
    });
    store.add_package("gomod", "leftpad", "1.0", 1);

    let mut lib = BundleBuilder::new(4);
    lib.range(
        "pad.go",
        "r1",
        RangeData {
            moniker_ids: vec!["m1".to_string()],
            ..RangeData::new(0, 5, 0, 8)
        },
    )
    .moniker(
        "pad.go",
        "m1",
        MonikerData {
            kind: MonikerKind::Export,
            scheme: "gomod".to_string(),
            identifier: PAD.to_string(),
            package_information_id: Some("p1".to_string()),
        },
    )
    .package_information(
        "pad.go",
        "p1",
        PackageInformationData {
            name: "leftpad".to_string(),
            version: "1.0".to_string(),
        },
    );
    source.insert(1, lib.build());

    let uses = IdentifierFilter::from_identifiers([PAD], 0.01);
    let other = IdentifierFilter::from_identifiers(["strings.Repeat"], 0.01);
    for id in 2..consumers + 2 {
        store.add_dump(Dump {
            id,
            repository_id: id,
            commit: format!("x{id}"),
            root: String::new(),
            indexer: "lsif-go".to_string(),
        });
        let filter = if id % 3 == 0 { other.clone() } else { uses.clone() };
        store.add_package_reference(id, "gomod", "leftpad", "1.0", Some(filter));

        let mut consumer = BundleBuilder::new(1);
        for line in 0..5 {
            consumer.moniker_row(
                MonikerTable::References,
                "gomod",
                PAD,
                Location::new("main.go", Range::new(line, 0, line, 3)),
            );
        }
        source.insert(id, consumer.build());
    }

    let bundles = Arc::new(EngineProvider::new(source, CacheSizes::default()));
    CrossIndexResolver::new(store, bundles, Arc::new(RecordingCommitUpdater::new()), 20)
}

fn drain_references(resolver: &CrossIndexResolver, limit: usize) -> usize {
    let ctx = QueryContext::new();
    let mut cursor = resolver
        .decode_or_create_cursor(&ctx, "pad.go", 0, 6, 1, None)
        .unwrap();
    let mut total = 0;
    while !cursor.is_done() {
        let page = resolver.references(&ctx, 1, "c1", limit, cursor).unwrap();
        total += page.locations.len();
        cursor = match page.next_cursor() {
            Some(token) => Cursor::decode(&token).unwrap(),
            None => Cursor::Done,
        };
    }
    total
}

fn bench_reference_paging(c: &mut Criterion) {
    let mut group = c.benchmark_group("references_remote");
    for consumers in [10, 100] {
        let resolver = remote_world(consumers);
        for limit in [10, 100] {
            group.bench_with_input(
                BenchmarkId::new(format!("dumps_{consumers}"), limit),
                &limit,
                |b, &limit| b.iter(|| black_box(drain_references(&resolver, limit))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_engine, bench_reference_paging);
criterion_main!(benches);
