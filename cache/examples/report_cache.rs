use coalesce_cache::{CoalesceConfig, CoalescerBuilder, JsonCodec, MemoryStore, TracingSink};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct Report {
  period: String,
  groceries: u64,
  transport: u64,
}

// Stands in for an expensive aggregation over the spending table.
fn build_report(period: &str, latency: Duration) -> Result<Report, io::Error> {
  thread::sleep(latency);
  Ok(Report {
    period: period.to_string(),
    groceries: 120,
    transport: 45,
  })
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = CoalesceConfig::default()
    .with_env_overrides("COALESCE")
    .expect("invalid COALESCE_* override");
  let store = Arc::new(MemoryStore::new());
  let cache = CoalescerBuilder::from_config(config)
    .fallback_deadline(Duration::from_millis(100))
    .metrics_sink(TracingSink)
    .build(store.clone())
    .expect("Failed to build coalescer");
  let codec = JsonCodec::<Report>::new();
  let key = "report:2024-01-01:2024-01-31";

  println!("First call computes the report.");
  let report = cache
    .once_as(key, Duration::from_millis(300), &codec, || {
      build_report("january", Duration::from_millis(20))
    })
    .expect("report failed");
  println!("  {:?}", report);

  println!("Second call is answered by the store.");
  let report = cache
    .once_as(key, Duration::from_millis(300), &codec, || {
      build_report("january", Duration::from_millis(20))
    })
    .expect("report failed");
  println!("  {:?}", report);

  // Let the store entry expire, then make the recomputation slow.
  thread::sleep(Duration::from_millis(400));
  println!("Third call is slow; the recency cache answers after the deadline.");
  let report = cache
    .once_as(key, Duration::from_millis(300), &codec, || {
      build_report("january", Duration::from_secs(1))
    })
    .expect("report failed");
  println!("  {:?}", report);

  println!("\nCoalescer metrics: {:#?}", cache.metrics());
  cache.shutdown();
}
