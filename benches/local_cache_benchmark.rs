//! Throughput of the local cache on hits, misses and remote-store calls.
//!
//! Run with: `cargo bench --bench local_cache_benchmark`

use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use open_cache::store::InMemoryStore;
use open_cache::{Error, LocalCache, RemoteCache};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn local_cache(max_entries: u64) -> LocalCache<String> {
    let cache = LocalCache::new();
    cache
        .configure(max_entries, Duration::from_secs(3600))
        .unwrap();
    cache
}

fn bench_get_or_compute(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("local_get_or_compute");

    let cache = local_cache(10_000);
    rt.block_on(async {
        cache.put("hot", "value".to_string()).await.unwrap();
    });
    group.bench_function("hit", |b| {
        b.to_async(&rt).iter(|| async {
            let value = cache
                .get_or_compute("hot", |_| async { Ok::<_, Error>("unused".to_string()) })
                .await
                .unwrap();
            black_box(value)
        })
    });

    // Keys cycle through a space larger than the bound, so most calls miss.
    let bounded = local_cache(1_000);
    let mut n = 0u64;
    group.bench_function("miss_with_eviction", |b| {
        b.to_async(&rt).iter(|| {
            n = n.wrapping_add(1);
            let key = format!("key:{}", n % 5_000);
            let bounded = &bounded;
            async move {
                let value = bounded
                    .get_or_compute(&key, |k| {
                        let k = k.to_string();
                        async move { Ok::<_, Error>(k) }
                    })
                    .await
                    .unwrap();
                black_box(value)
            }
        })
    });

    group.finish();
}

fn bench_remote_in_memory(c: &mut Criterion) {
    let rt = runtime();
    let remote: RemoteCache<_, String> = RemoteCache::new(InMemoryStore::new());
    let ttl = Duration::from_secs(60);

    c.bench_function("remote_increment_in_memory", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(remote.increment_one("counter", ttl).await.unwrap()) })
    });
}

criterion_group!(benches, bench_get_or_compute, bench_remote_in_memory);
criterion_main!(benches);
