use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use philosobabel_rs::{BuiltinTerms, SearchConfig, TermIndex, TermSource};

fn load(name: &str) -> TermSource {
    BuiltinTerms::source(name).expect("built-in source present")
}

fn bench_build(c: &mut Criterion) {
    for name in BuiltinTerms::names() {
        let source = load(name);
        c.bench_with_input(BenchmarkId::new("index_build", name), &source, |b, source| {
            b.iter(|| {
                let index = TermIndex::build(source);
                black_box(index.len());
            });
        });
    }
}

fn bench_search(c: &mut Criterion) {
    let index = TermIndex::build(&load("philosophy"));
    let word = SearchConfig::default();
    let definitions = SearchConfig::word_or_definition();
    const QUERIES: &[&str] = &["ism", "free", "exist"];
    for &query in QUERIES {
        c.bench_with_input(BenchmarkId::new("search_word", query), &query, |b, &query| {
            b.iter(|| black_box(index.search(query, &word).len()));
        });
        c.bench_with_input(
            BenchmarkId::new("search_definition", query),
            &query,
            |b, &query| {
                b.iter(|| black_box(index.search(query, &definitions).len()));
            },
        );
    }
}

fn bench_prefix_and_suggest(c: &mut Criterion) {
    let index = TermIndex::build(&load("science"));
    let config = SearchConfig::default();
    // Warm the lazily built prefix map.
    black_box(index.prefix("a", 1));
    c.bench_function("prefix_lookup::e_10", |b| {
        b.iter(|| black_box(index.prefix("e", 10).len()));
    });
    c.bench_function("suggest::entrophy", |b| {
        b.iter(|| black_box(index.suggest("entrophy", &config, 5).len()));
    });
}

criterion_group!(benches, bench_build, bench_search, bench_prefix_and_suggest);
criterion_main!(benches);
