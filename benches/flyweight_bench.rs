use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use flyweight::{hash_combine, CacheKey, Flyweight, RcFlyweight};
use std::collections::hash_map::RandomState;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("flyweight_get_hit", |b| {
        let mut cache: Flyweight<String, u64> = Flyweight::with_factory(|k: &String| k.len() as u64);
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        for k in &keys {
            let _ = cache.get(k.clone()).unwrap();
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            let v = cache.peek(k.as_str()).unwrap();
            black_box(*v);
        })
    });
}

fn bench_load_10k(c: &mut Criterion) {
    c.bench_function("flyweight_load_10k", |b| {
        let keys: Vec<_> = lcg(1).take(10_000).map(key).collect();
        b.iter_batched(
            || Flyweight::<String, u64>::with_factory(|k| k.len() as u64),
            |mut cache| {
                for k in &keys {
                    let _ = cache.get(k.clone()).unwrap();
                }
                black_box(cache)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_scoped_churn(c: &mut Criterion) {
    c.bench_function("rc_flyweight_scoped_churn", |b| {
        let cache: RcFlyweight<u64, String> = RcFlyweight::with_factory(|k: &u64| k.to_string());
        let mut it = lcg(11).map(|x| x % 64);
        b.iter(|| {
            // Acquire and immediately release; every 64th value cycles
            // through a full construct/destroy.
            let handle = cache.get_scoped(it.next().unwrap()).unwrap();
            black_box(handle.len());
        })
    });
}

fn bench_composite_hash(c: &mut Criterion) {
    let build = RandomState::new();
    c.bench_function("composite_key_hash", |b| {
        let key = ("a-fairly-typical-key".to_string(), 1440u32, 90u32);
        b.iter(|| black_box(key.cache_hash(&build)))
    });
    c.bench_function("hash_combine_fold", |b| {
        let mut it = lcg(23);
        b.iter(|| {
            let a = it.next().unwrap();
            black_box(hash_combine(a, a.rotate_left(17)))
        })
    });
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_load_10k,
    bench_scoped_churn,
    bench_composite_hash
);
criterion_main!(benches);
