use coalesce_cache::RecencyCache;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const CAPACITY: usize = 1000;

fn populated() -> RecencyCache<u64> {
  let cache = RecencyCache::new(CAPACITY);
  for i in 0..CAPACITY as u64 {
    cache.add(&format!("report:{}", i), i);
  }
  cache
}

fn bench_single_thread(c: &mut Criterion) {
  let mut group = c.benchmark_group("RecencyCache/single");
  group.throughput(Throughput::Elements(1));

  let cache = populated();
  let keys: Vec<String> = (0..CAPACITY).map(|i| format!("report:{}", i)).collect();
  let mut i = 0;
  group.bench_function("get_hit", |b| {
    b.iter(|| {
      i = (i + 1) % keys.len();
      black_box(cache.get(&keys[i]))
    })
  });

  group.bench_function("get_miss", |b| b.iter(|| black_box(cache.get("missing"))));

  // Every insert past capacity evicts.
  let mut next = CAPACITY as u64;
  group.bench_function("add_evict", |b| {
    b.iter(|| {
      next += 1;
      black_box(cache.add(&format!("report:{}", next), next))
    })
  });
  group.finish();
}

fn bench_concurrent_reads(c: &mut Criterion) {
  let mut group = c.benchmark_group("RecencyCache/concurrent_get");
  for threads in [2usize, 4, 8] {
    group.throughput(Throughput::Elements(threads as u64));
    group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
      b.iter_custom(|iters| {
        let cache = Arc::new(populated());
        let barrier = Arc::new(Barrier::new(threads + 1));
        let handles: Vec<_> = (0..threads)
          .map(|t| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
              barrier.wait();
              for i in 0..iters {
                let key = format!("report:{}", (i as usize * 7 + t) % CAPACITY);
                black_box(cache.get(&key));
              }
            })
          })
          .collect();
        barrier.wait();
        let start = Instant::now();
        for handle in handles {
          handle.join().unwrap();
        }
        start.elapsed()
      })
    });
  }
  group.finish();
}

criterion_group! {
  name = benches;
  config = Criterion::default().measurement_time(Duration::from_secs(5));
  targets = bench_single_thread, bench_concurrent_reads
}
criterion_main!(benches);
