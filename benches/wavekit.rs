//! WaveKit service worker runtime benchmarks
//!
//! Run with: cargo bench -p wavekit-bench

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use http::{HeaderMap, StatusCode};
use tokio::runtime::Runtime;
use url::Url;

use wavekit_bench::generate_entries;
use wavekit_cache::{Cache, CacheStorage, ResourceKey};
use wavekit_fetch::{FetchError, Fetcher, Request, Response};
use wavekit_sw::{FetchEvent, ServiceWorkerHost, WorkerConfig};

fn resource_key_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_key");

    let plain = Url::parse("https://app.example/src/js/main.js").unwrap();
    group.bench_with_input(BenchmarkId::new("build", "plain"), &plain, |b, url| {
        b.iter(|| ResourceKey::get(url))
    });

    let fragment = Url::parse("https://app.example/docs/guide#section-3").unwrap();
    group.bench_with_input(BenchmarkId::new("build", "fragment"), &fragment, |b, url| {
        b.iter(|| ResourceKey::get(url))
    });

    let query = Url::parse("https://app.example/search?q=offline+first&page=2").unwrap();
    group.bench_with_input(BenchmarkId::new("build", "query"), &query, |b, url| {
        b.iter(|| ResourceKey::get(url))
    });

    group.finish();
}

fn cache_lookup_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_lookup");

    for size in [10usize, 100, 1000] {
        let mut cache = Cache::new("bench");
        cache.put_batch(generate_entries(size));

        let hit_url = Url::parse(&format!("https://app.example/assets/chunk-{}.js", size / 2))
            .unwrap();
        let hit = ResourceKey::get(&hit_url);
        group.bench_with_input(BenchmarkId::new("hit", size), &cache, |b, cache| {
            b.iter(|| cache.match_request(&hit))
        });

        let miss = ResourceKey::get(&Url::parse("https://app.example/not-there.js").unwrap());
        group.bench_with_input(BenchmarkId::new("miss", size), &cache, |b, cache| {
            b.iter(|| cache.match_request(&miss))
        });
    }

    group.finish();
}

fn batch_commit_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_commit");

    for size in [10usize, 100, 1000] {
        let entries = generate_entries(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("commit", size), &entries, |b, entries| {
            b.iter_batched(
                || entries.clone(),
                |batch| {
                    let mut cache = Cache::new("bench");
                    cache.put_batch(batch);
                    cache
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn storage_walk_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_walk");

    let mut storage = CacheStorage::new();
    for name in ["first", "second", "third"] {
        storage.open(name).put_batch(generate_entries(100));
    }

    let hit = ResourceKey::get(&Url::parse("https://app.example/assets/chunk-50.js").unwrap());
    group.bench_function("hit_first_container", |b| {
        b.iter(|| storage.match_request(&hit))
    });

    let miss = ResourceKey::get(&Url::parse("https://app.example/not-there.js").unwrap());
    group.bench_function("miss_walks_all", |b| b.iter(|| storage.match_request(&miss)));

    group.finish();
}

/// Answers every request with a small fixed body, so fallback timing is
/// dominated by the interception path itself.
struct StaticFetcher;

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        Ok(Response {
            request_id: request.id,
            url: request.url.clone(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            content_type: None,
            body: Bytes::from_static(b"fallback"),
        })
    }
}

fn interception_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("interception");

    let (host, _events) = ServiceWorkerHost::new(Arc::new(StaticFetcher));
    let scope = Url::parse("https://app.example/").unwrap();
    rt.block_on(async {
        let manifest: Vec<String> = (0..100).map(|i| format!("/assets/chunk-{i}.js")).collect();
        let config = WorkerConfig::new(scope.clone(), "bench-shell").with_precache(manifest);
        let key = host.register(config).await.unwrap();
        host.install(&key).await.unwrap();
        host.activate(&key).await.unwrap();
    });

    let hit = Url::parse("https://app.example/assets/chunk-50.js").unwrap();
    group.bench_function("cache_hit", |b| {
        b.iter(|| rt.block_on(host.handle_fetch(FetchEvent::get(hit.clone()))))
    });

    let miss = Url::parse("https://app.example/api/data").unwrap();
    group.bench_function("network_fallback", |b| {
        b.iter(|| rt.block_on(host.handle_fetch(FetchEvent::get(miss.clone()))))
    });

    group.finish();
}

criterion_group!(
    benches,
    resource_key_benchmarks,
    cache_lookup_benchmarks,
    batch_commit_benchmarks,
    storage_walk_benchmarks,
    interception_benchmarks,
);

criterion_main!(benches);
