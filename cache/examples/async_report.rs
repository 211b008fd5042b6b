use coalesce_cache::{CoalescerBuilder, MemoryStore, TracingSink};
use std::io;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cache = CoalescerBuilder::new()
    .workers(2)
    .fallback_deadline(Duration::from_millis(50))
    .metrics_sink(TracingSink)
    .build_async(MemoryStore::new())
    .expect("Failed to build coalescer");

  // Ten tasks ask for the same report at once; the producer runs once.
  let mut tasks = Vec::new();
  for user in 0..10 {
    let cache = cache.clone();
    tasks.push(tokio::spawn(async move {
      let value = cache
        .once("report:weekly", Duration::from_secs(60), || {
          std::thread::sleep(Duration::from_millis(200));
          Ok::<_, io::Error>(b"groceries: 120, transport: 45".to_vec())
        })
        .await;
      (user, value)
    }));
  }

  for task in tasks {
    let (user, value) = task.await.expect("task panicked");
    match value {
      Ok(bytes) => println!("user {} got {}", user, String::from_utf8_lossy(&bytes)),
      Err(err) => println!("user {} failed: {}", user, err),
    }
  }

  println!("\nCoalescer metrics: {:#?}", cache.metrics());
  cache.shutdown();
}
