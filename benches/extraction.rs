use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use sandfilter::config::FilterConfig;
use sandfilter::extract::urls::extract_urls;
use sandfilter::extract::walker::collect_attachments;
use sandfilter::parser::mime::parse_message;
use sandfilter::workspace::Workspace;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn bench_url_extraction(c: &mut Criterion) {
    let raw = fixture("urls.eml").repeat(50);

    c.bench_function("extract_urls", |b| b.iter(|| extract_urls(&raw, &[])));
}

fn bench_parse_and_walk(c: &mut Criterion) {
    let raw = fixture("nested_rfc822.eml");
    let root = tempfile::tempdir().unwrap();
    let config = FilterConfig::default();

    c.bench_function("parse_and_walk_nested", |b| {
        b.iter(|| {
            let ws = Workspace::create(root.path()).unwrap();
            let parsed = parse_message(&ws, &raw).unwrap();
            let found = collect_attachments(&config, &ws, &parsed.tree).unwrap();
            ws.remove().unwrap();
            found.len()
        })
    });
}

criterion_group!(benches, bench_url_extraction, bench_parse_and_walk);
criterion_main!(benches);
