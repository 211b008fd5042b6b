#![allow(dead_code)]

use coalesce_cache::{
  CacheError, Coalescer, CoalescerBuilder, MemoryStore, MetricsSink, Observation, Payload,
  Producer, RemoteStore, ServedFrom,
};

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// A remote store whose latency and availability can be changed mid-test.
// It delegates to a `MemoryStore` after sleeping, and tracks how many calls
// are in flight at once.
#[derive(Default)]
pub struct SlowStore {
  pub inner: MemoryStore,
  delay_ms: AtomicU64,
  failing: AtomicBool,
  passthrough: AtomicBool,
  pub calls: AtomicUsize,
  in_flight: AtomicUsize,
  pub max_in_flight: AtomicUsize,
}

impl SlowStore {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_delay(&self, delay: Duration) {
    self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  // Runs every producer directly, without single-flight or storage.
  pub fn set_passthrough(&self, passthrough: bool) {
    self.passthrough.store(passthrough, Ordering::SeqCst);
  }
}

impl RemoteStore for SlowStore {
  fn fetch_or_compute(
    &self,
    key: &str,
    ttl: Duration,
    producer: Producer,
  ) -> Result<Payload, CacheError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);

    let delay = self.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
      thread::sleep(Duration::from_millis(delay));
    }
    let result = if self.failing.load(Ordering::SeqCst) {
      Err(CacheError::store(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "connection reset by peer",
      )))
    } else if self.passthrough.load(Ordering::SeqCst) {
      producer()
    } else {
      self.inner.fetch_or_compute(key, ttl, producer)
    };

    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    result
  }
}

// Collects every observation handed to the sink.
#[derive(Default)]
pub struct RecordingSink {
  pub seen: Mutex<Vec<(String, ServedFrom)>>,
}

impl MetricsSink for RecordingSink {
  fn observe(&self, observation: &Observation<'_>) {
    self
      .seen
      .lock()
      .push((observation.key_class.to_string(), observation.served_from));
  }
}

// Helper to build a coalescer with a short deadline in front of `store`.
pub fn build_coalescer(store: Arc<SlowStore>, deadline: Duration) -> Coalescer {
  CoalescerBuilder::new()
    .workers(4)
    .queue_capacity(16)
    .recency_capacity(16)
    .fallback_deadline(deadline)
    .build(store)
    .unwrap()
}

// A producer that counts its runs and returns `value`.
pub fn counting(
  runs: &Arc<AtomicUsize>,
  value: &'static str,
) -> impl FnOnce() -> Result<Vec<u8>, io::Error> + Send + 'static {
  let runs = runs.clone();
  move || {
    runs.fetch_add(1, Ordering::SeqCst);
    Ok(value.as_bytes().to_vec())
  }
}

pub fn wait_until(mut cond: impl FnMut() -> bool) {
  let deadline = Instant::now() + Duration::from_secs(5);
  while !cond() {
    assert!(Instant::now() < deadline, "condition not met in time");
    thread::sleep(Duration::from_millis(2));
  }
}
