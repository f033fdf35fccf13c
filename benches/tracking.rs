//! 归因核心性能基准测试

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;

use caliban::storage::MemorySessionStore;
use caliban::tracking::{
    AttributionEngine, ParamClassifier, RequestContext, SessionRecord, TrackerSettings,
    TrackingOptions,
};
use caliban::utils::QueryParams;

const LANDING_QUERY: &str = "utm_source=google&utm_medium=cpc&utm_campaign=spring&gclid=abc123\
&fbclid=zzz&src=newsletter&page=3&variant=b&gauid=GA1.2.345";

// ============== ParamClassifier 基准测试 ==============

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracking/classifier");

    let classifier = ParamClassifier::new("_cbnsid")
        .with_first_attribution(["gclid", "msclkid"])
        .with_ignore(["fbclid"])
        .with_campaign_start(["utm_campaign", "gclid", "msclkid"]);
    let query = QueryParams::parse(LANDING_QUERY);

    group.bench_function("parse_query", |b| {
        b.iter(|| QueryParams::parse(black_box(LANDING_QUERY)));
    });

    group.bench_function("remainder", |b| {
        b.iter(|| classifier.remainder(black_box(&query)));
    });

    group.bench_function("campaign_start", |b| {
        b.iter(|| classifier.is_campaign_start(black_box(&query)));
    });

    group.finish();
}

// ============== SessionRecord 编解码基准测试 ==============

fn sample_record() -> SessionRecord {
    let mut record = SessionRecord::new();
    record.set_always("id", "9f3c2a1b0e8d7c6b5a49");
    record.set_always("created_at", 1_700_000_000i64);
    record.set_always("updated_at", 1_700_000_600i64);
    record.set_always("duration", 600);
    record.set_always("landing_uri", "https://shop.example/landing?utm_source=google");
    record.set_always("utm_source", "google");
    record.set_always("utm_medium", "cpc");
    record.set_always("gauid", "a_17000000001234567");
    record.merge_append(
        "linked_sessions",
        vec![json!({"id": "old", "updated_at": "1699999000", "gauid": "a_1"})],
    );
    record
}

fn bench_record_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracking/record");

    let record = sample_record();
    let json = record.to_json();
    let hexed = hex::encode(&json);

    group.bench_function("to_json", |b| {
        b.iter(|| black_box(&record).to_json());
    });

    group.bench_function("parse_json", |b| {
        b.iter(|| SessionRecord::parse_stored(black_box(&json)));
    });

    group.bench_function("parse_hex", |b| {
        b.iter(|| SessionRecord::parse_stored(black_box(&hexed)));
    });

    group.bench_function("parse_malformed", |b| {
        b.iter(|| SessionRecord::from_prior_or_empty(black_box(Some("not-json-not-hex"))));
    });

    group.finish();
}

// ============== AttributionEngine 基准测试 ==============

fn bench_engine_track(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracking/engine");

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let engine = AttributionEngine::new(
        Arc::new(MemorySessionStore::new(100_000)),
        TrackerSettings::default(),
    );
    let opts = TrackingOptions::new();
    let landing = RequestContext::new(format!("https://shop.example/?{}", LANDING_QUERY));

    group.bench_function("landing", |b| {
        b.to_async(&runtime)
            .iter(|| engine.track(black_box(&landing), black_box(&opts)));
    });

    let session_id = runtime.block_on(engine.track(&landing, &opts)).session_id;
    let continuation = RequestContext::new("https://shop.example/cart?src=banner")
        .with_cookie("_cbnsid", session_id);

    group.bench_function("continuation", |b| {
        b.to_async(&runtime)
            .iter(|| engine.track(black_box(&continuation), black_box(&opts)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_classifier,
    bench_record_codec,
    bench_engine_track
);
criterion_main!(benches);
