use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use depot::principal::{Principal, StaticPrincipalResolver};
use depot::query::{PropSelector, Query, Search};
use depot::repository::Repository;
use depot::resource::{PropName, PropertySet, Value};
use depot::types::PROP_TITLE;
use depot::Uri;

const WORDS: &[&str] = &["alpha", "bravo", "carbon", "delta", "ember", "fjord", "gamma", "helix"];

/// Repository with `docs` documents spread over 16 collections, titled with
/// seeded random words.
fn seeded_repository(docs: usize, seed: u64) -> Repository {
    let repo = Repository::builder()
        .with_resolver(StaticPrincipalResolver::new().with_user("anna"))
        .build();
    let system = Principal::system();
    let mut rng = StdRng::seed_from_u64(seed);
    let folders = 16usize;
    for f in 0..folders {
        let target = format!("/col{f:02}");
        repo.create_collection(&system, &Uri::parse(&target).unwrap(), &PropertySet::new())
            .unwrap();
    }
    for i in 0..docs {
        let f = rng.gen_range(0..folders);
        let target = format!("/col{f:02}/doc{i:05}.txt");
        let word = WORDS[rng.gen_range(0..WORDS.len())];
        let mut props = PropertySet::new();
        props.set(PropName::default_ns(PROP_TITLE), Value::String(format!("{word} {i}")));
        repo.create_document(&system, &Uri::parse(&target).unwrap(), word.as_bytes(), None, &props)
            .unwrap();
    }
    repo
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_rebuild");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(10);

    for &n in &[1_000usize, 5_000] {
        let repo = seeded_repository(n, 0x5EED_0001 ^ n as u64);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("full", n), &n, |b, _| {
            b.iter(|| {
                let indexed = repo.rebuild_index(None).unwrap();
                criterion::black_box(indexed);
            });
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let n = 5_000usize;
    let repo = seeded_repository(n, 0x5EED_0002);
    repo.rebuild_index(None).unwrap();

    let search = Search::new(Query::And(vec![
        Query::UriPrefix { uri: "/col03".to_string(), inverted: false },
        Query::PropertyPrefix {
            prop: PropSelector::prop(PropName::default_ns(PROP_TITLE)),
            prefix: "alpha".to_string(),
            inverted: false,
        },
    ]));
    let anna = Principal::user("anna");
    let system = Principal::system();

    let mut group = c.benchmark_group("index_search");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(30);
    group.throughput(Throughput::Elements(n as u64));

    // anna's searches carry the authorization filter, system's do not
    group.bench_with_input(BenchmarkId::new("filtered_prefix", n), &n, |b, _| {
        b.iter(|| {
            let results = repo.search(Some(&anna), &search).unwrap();
            criterion::black_box(results.hits.len());
        });
    });
    group.bench_with_input(BenchmarkId::new("system_prefix", n), &n, |b, _| {
        b.iter(|| {
            let results = repo.search(Some(&system), &search).unwrap();
            criterion::black_box(results.hits.len());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_rebuild, bench_search);
criterion_main!(benches);
