//! A coalescing cache layer in front of a remote key/value store.
//!
//! The remote store deduplicates concurrent computations for a key and
//! applies a time-to-live. This crate adds what callers need around it:
//!
//! - **Bounded fan-out**: calls go through a bounded work queue drained by a
//!   fixed pool of workers, so the number of concurrent remote calls never
//!   exceeds the pool size. A full queue blocks callers instead of failing.
//! - **Latency ceiling**: each call waits at most a fallback deadline. If the
//!   remote store is slower, a value from a local LRU recency cache is
//!   returned instead. Without a local value the call keeps waiting, so a
//!   caller never receives an empty answer.
//! - **Write-back**: successful results flow into the recency cache through
//!   a bounded background task. Writes carry a submission ticket, so a slow
//!   worker cannot replace a newer value with an older one.
//! - **Sync & Async**: `Coalescer` blocks, `AsyncCoalescer` awaits.
//! - **Observability**: in-process counters and a pluggable `MetricsSink`.
//!
//! ```no_run
//! use coalesce_cache::{CoalescerBuilder, MemoryStore};
//! use std::time::Duration;
//!
//! let cache = CoalescerBuilder::new()
//!   .workers(4)
//!   .fallback_deadline(Duration::from_millis(200))
//!   .build(MemoryStore::new())
//!   .unwrap();
//!
//! let report = cache
//!   .once("report:2024-01", Duration::from_secs(60), || {
//!     Ok::<_, std::io::Error>(b"groceries: 120".to_vec())
//!   })
//!   .unwrap();
//! assert_eq!(&*report, b"groceries: 120");
//! ```

// Public modules that form the API
pub mod builder;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handles;
pub mod metrics;
pub mod recency;
pub mod store;

// Internal, crate-only modules
mod shared;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::CoalescerBuilder;
pub use codec::{Codec, JsonCodec, Payload};
pub use config::CoalesceConfig;
pub use dispatch::{FetchResult, PendingFetch};
pub use error::{BoxError, BuildError, CacheError, ConfigError};
#[cfg(feature = "tokio")]
pub use handles::AsyncCoalescer;
pub use handles::Coalescer;
pub use metrics::{
  prefix_key_class, KeyClassifier, MetricsSink, MetricsSnapshot, NoopSink, Observation, ServedFrom,
  TracingSink,
};
pub use recency::{AddOutcome, RecencyCache};
pub use store::{MemoryStore, Producer, RemoteStore};
