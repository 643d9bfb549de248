// Criterion benchmarks for Job Ingest

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use job_ingest::core::{content_fingerprint, Matcher, Normalizer};
use job_ingest::models::{Listing, Source, UserProfile};
use serde_json::{json, Value};
use uuid::Uuid;

const TITLES: &[&str] = &["Backend Engineer", "Rust Developer", "Data Engineer", "Site Reliability Engineer"];
const CITIES: &[&str] = &["Berlin", "Munich", "Hamburg", "Remote"];

fn create_listing(id: usize) -> Listing {
    let now = Utc::now();
    Listing {
        id: Uuid::new_v4(),
        source: Source::Generic,
        source_id: id.to_string(),
        title: TITLES[id % TITLES.len()].to_string(),
        company: format!("company {}", id % 50),
        location: CITIES[id % CITIES.len()].to_lowercase(),
        remote: id % CITIES.len() == 3,
        salary_min: Some(60_000 + (id % 40) as i64 * 1_000),
        salary_max: Some(90_000 + (id % 40) as i64 * 1_000),
        description: "Design and operate Rust and Go services on Kubernetes with PostgreSQL and Kafka".to_string(),
        posted_at: now,
        is_open: true,
        content_fingerprint: id.to_string(),
        embedding: None,
        version: 1,
        first_seen_at: now,
        last_seen_at: now,
        stale: false,
    }
}

fn create_profile() -> UserProfile {
    UserProfile {
        id: "bench".to_string(),
        skills: vec!["rust".to_string(), "kubernetes".to_string(), "postgresql".to_string(), "kafka".to_string()],
        desired_titles: vec!["Backend Engineer".to_string(), "Rust Developer".to_string()],
        desired_locations: vec!["Berlin".to_string()],
        accepts_remote: true,
        salary_floor: Some(80_000),
        auto_apply_threshold: 0.7,
        blacklisted_companies: vec!["company 7".to_string()],
        blacklisted_titles: vec![],
        embedding: None,
        active: true,
        updated_at: Utc::now(),
    }
}

fn create_raw(id: usize) -> Value {
    json!({
        "id": id.to_string(),
        "title": format!("Senior <b>{}</b>", TITLES[id % TITLES.len()]),
        "company": "Acme Holdings GmbH",
        "location": format!("{}, Germany", CITIES[id % CITIES.len()]),
        "salary": "€70k - €90k",
        "currency": "EUR",
        "description": "<p>Design and operate <strong>Rust</strong> services</p><ul><li>Kubernetes</li></ul>",
        "posted_at": "2026-03-01T10:00:00Z"
    })
}

fn bench_scoring(c: &mut Criterion) {
    let matcher = Matcher::with_default_weights();
    let listing = create_listing(1);
    let profile = create_profile();
    let now = Utc::now();

    c.bench_function("score_pair", |b| {
        b.iter(|| matcher.compute(black_box(&listing), black_box(&profile), now));
    });
}

fn bench_rank(c: &mut Criterion) {
    let matcher = Matcher::with_default_weights();
    let profile = create_profile();
    let now = Utc::now();

    let mut group = c.benchmark_group("rank");
    for size in [100, 1_000, 10_000].iter() {
        let listings: Vec<Listing> = (0..*size).map(create_listing).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &listings, |b, listings| {
            b.iter(|| black_box(matcher.rank(listings, &profile, now).len()));
        });
    }
    group.finish();
}

fn bench_normalization(c: &mut Criterion) {
    let normalizer = Normalizer::default();
    let records: Vec<Value> = (0..50).map(create_raw).collect();
    let now = Utc::now();

    c.bench_function("normalize_page_50", |b| {
        b.iter(|| normalizer.normalize_page(Source::Generic, black_box(&records), now));
    });

    c.bench_function("content_fingerprint", |b| {
        b.iter(|| {
            content_fingerprint(
                black_box("Senior Backend Engineer"),
                black_box("acme"),
                black_box("berlin germany"),
                black_box("Design and operate Rust services"),
            )
        });
    });
}

criterion_group!(benches, bench_scoring, bench_rank, bench_normalization);

criterion_main!(benches);
