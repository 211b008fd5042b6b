use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;
use tracing::info;

/// Where the value returned by a completed call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServedFrom {
  /// The producer ran for this call.
  Fresh,
  /// The remote store answered without running the producer.
  AdapterCache,
  /// The deadline elapsed and the local recency cache answered.
  LocalFallback,
}

impl ServedFrom {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServedFrom::Fresh => "fresh",
      ServedFrom::AdapterCache => "adapter-cache",
      ServedFrom::LocalFallback => "local-fallback",
    }
  }
}

impl fmt::Display for ServedFrom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One completed, successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<'a> {
  pub key_class: &'a str,
  pub served_from: ServedFrom,
}

/// An external receiver of per-call observations, e.g. a counter vector
/// labelled by key class and source.
pub trait MetricsSink: Send + Sync + 'static {
  fn observe(&self, observation: &Observation<'_>);
}

impl<S: MetricsSink + ?Sized> MetricsSink for std::sync::Arc<S> {
  fn observe(&self, observation: &Observation<'_>) {
    (**self).observe(observation)
  }
}

/// A sink that discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
  fn observe(&self, _observation: &Observation<'_>) {}
}

/// A sink that emits every observation as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
  fn observe(&self, observation: &Observation<'_>) {
    info!(
      target: "coalesce_cache::observe",
      key_class = observation.key_class,
      served_from = observation.served_from.as_str(),
      "cache call completed"
    );
  }
}

/// Maps a cache key to the class reported with its observations.
pub type KeyClassifier = fn(&str) -> &str;

/// Derives the key class of a key: the part before the first `:`, or the
/// whole key if it has none.
pub fn prefix_key_class(key: &str) -> &str {
  key.split_once(':').map_or(key, |(class, _)| class)
}

/// A thread-safe, internal metrics collector for the coalescer.
#[derive(Debug)]
pub(crate) struct Metrics {
  pub(crate) submitted: CachePadded<AtomicU64>,
  pub(crate) fresh: CachePadded<AtomicU64>,
  pub(crate) adapter_cache: CachePadded<AtomicU64>,
  pub(crate) local_fallback: CachePadded<AtomicU64>,
  // The deadline fired but the recency cache had nothing for the key.
  pub(crate) fallback_misses: CachePadded<AtomicU64>,
  pub(crate) errors: CachePadded<AtomicU64>,

  pub(crate) writebacks: CachePadded<AtomicU64>,
  pub(crate) writebacks_inline: CachePadded<AtomicU64>,
  pub(crate) stale_writes_rejected: CachePadded<AtomicU64>,
  pub(crate) recency_evictions: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      submitted: CachePadded::new(AtomicU64::new(0)),
      fresh: CachePadded::new(AtomicU64::new(0)),
      adapter_cache: CachePadded::new(AtomicU64::new(0)),
      local_fallback: CachePadded::new(AtomicU64::new(0)),
      fallback_misses: CachePadded::new(AtomicU64::new(0)),
      errors: CachePadded::new(AtomicU64::new(0)),
      writebacks: CachePadded::new(AtomicU64::new(0)),
      writebacks_inline: CachePadded::new(AtomicU64::new(0)),
      stale_writes_rejected: CachePadded::new(AtomicU64::new(0)),
      recency_evictions: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &CachePadded<AtomicU64>) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_served(&self, served_from: ServedFrom) {
    let counter = match served_from {
      ServedFrom::Fresh => &self.fresh,
      ServedFrom::AdapterCache => &self.adapter_cache,
      ServedFrom::LocalFallback => &self.local_fallback,
    };
    Self::incr(counter);
  }

  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      submitted: self.submitted.load(Ordering::Relaxed),
      fresh: self.fresh.load(Ordering::Relaxed),
      adapter_cache: self.adapter_cache.load(Ordering::Relaxed),
      local_fallback: self.local_fallback.load(Ordering::Relaxed),
      fallback_misses: self.fallback_misses.load(Ordering::Relaxed),
      errors: self.errors.load(Ordering::Relaxed),
      writebacks: self.writebacks.load(Ordering::Relaxed),
      writebacks_inline: self.writebacks_inline.load(Ordering::Relaxed),
      stale_writes_rejected: self.stale_writes_rejected.load(Ordering::Relaxed),
      recency_evictions: self.recency_evictions.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time snapshot of the coalescer's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
  /// Requests handed to the work queue.
  pub submitted: u64,
  /// Calls answered by a producer run.
  pub fresh: u64,
  /// Calls answered by the remote store without a producer run.
  pub adapter_cache: u64,
  /// Calls answered by the recency cache after the deadline.
  pub local_fallback: u64,
  /// Deadlines that found nothing in the recency cache.
  pub fallback_misses: u64,
  /// Calls that returned an error.
  pub errors: u64,
  /// Successful results applied to the recency cache.
  pub writebacks: u64,
  /// Write-backs applied by a worker because the write-back queue was full.
  pub writebacks_inline: u64,
  /// Write-backs dropped because a newer value was already cached.
  pub stale_writes_rejected: u64,
  /// Entries evicted from the recency cache.
  pub recency_evictions: u64,
  pub uptime_secs: u64,
}

impl MetricsSnapshot {
  /// Total number of successfully completed calls.
  pub fn completed(&self) -> u64 {
    self.fresh + self.adapter_cache + self.local_fallback
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_class_is_prefix_before_colon() {
    assert_eq!(prefix_key_class("report:2024_01_01:2024_01_07"), "report");
    assert_eq!(prefix_key_class("events_report"), "events_report");
    assert_eq!(prefix_key_class(":odd"), "");
  }

  #[test]
  fn served_from_labels() {
    assert_eq!(ServedFrom::Fresh.to_string(), "fresh");
    assert_eq!(ServedFrom::AdapterCache.as_str(), "adapter-cache");
    assert_eq!(ServedFrom::LocalFallback.as_str(), "local-fallback");
  }

  #[test]
  fn snapshot_reflects_counters() {
    let metrics = Metrics::new();
    metrics.record_served(ServedFrom::Fresh);
    metrics.record_served(ServedFrom::LocalFallback);
    metrics.record_served(ServedFrom::LocalFallback);
    Metrics::incr(&metrics.errors);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.fresh, 1);
    assert_eq!(snapshot.local_fallback, 2);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.completed(), 3);
  }
}
