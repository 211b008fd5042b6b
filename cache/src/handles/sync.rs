use crate::codec::{Codec, Payload};
use crate::dispatch::PendingFetch;
use crate::error::{BoxError, CacheError};
use crate::metrics::MetricsSnapshot;
use crate::recency::RecencyCache;
use crate::shared::CoalescerShared;
use crate::task::worker::guard_producer;

use std::sync::Arc;
use std::time::Duration;

/// A thread-safe, synchronous coalescing cache.
///
/// Cloning is cheap; every clone talks to the same work queue, workers and
/// recency cache. The background threads stop when `shutdown` is called or
/// the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Coalescer {
  pub(crate) shared: Arc<CoalescerShared>,
}

impl Coalescer {
  /// Converts this synchronous `Coalescer` into an `AsyncCoalescer`.
  /// This is a zero-cost conversion.
  #[cfg(feature = "tokio")]
  pub fn to_async(&self) -> crate::AsyncCoalescer {
    crate::AsyncCoalescer {
      shared: self.shared.clone(),
    }
  }

  /// Returns the value for `key`, computing it with `producer` on a remote
  /// store miss.
  ///
  /// The call waits at most the configured fallback deadline for the remote
  /// store. If the deadline elapses and the recency cache holds `key`, that
  /// value is returned; otherwise the call keeps waiting for the remote store.
  /// Errors from the producer or the store are returned as-is and are never
  /// masked by a cached value.
  pub fn once<F, P, E>(&self, key: &str, ttl: Duration, producer: F) -> Result<Payload, CacheError>
  where
    F: FnOnce() -> Result<P, E> + Send + 'static,
    P: Into<Payload>,
    E: Into<BoxError>,
  {
    let key_class = self.shared.classify(key);
    self.once_classified(key, key_class, ttl, producer)
  }

  /// Like `once`, with the configured default lifetime.
  pub fn once_default<F, P, E>(&self, key: &str, producer: F) -> Result<Payload, CacheError>
  where
    F: FnOnce() -> Result<P, E> + Send + 'static,
    P: Into<Payload>,
    E: Into<BoxError>,
  {
    self.once(key, self.shared.default_ttl, producer)
  }

  /// Like `once`, reporting the call under an explicit key class instead of
  /// the one derived from `key`.
  pub fn once_classified<F, P, E>(
    &self,
    key: &str,
    key_class: &str,
    ttl: Duration,
    producer: F,
  ) -> Result<Payload, CacheError>
  where
    F: FnOnce() -> Result<P, E> + Send + 'static,
    P: Into<Payload>,
    E: Into<BoxError>,
  {
    let pending = self.shared.submit(key, ttl, guard_producer(producer))?;
    self.shared.resolve(key, key_class, pending)
  }

  /// Typed variant of `once`. The producer's value is encoded with `codec`
  /// before it is stored, and every answer, including a local fallback, is
  /// decoded with it.
  pub fn once_as<T, C, F, E>(
    &self,
    key: &str,
    ttl: Duration,
    codec: &C,
    producer: F,
  ) -> Result<T, CacheError>
  where
    C: Codec<T> + Clone,
    F: FnOnce() -> Result<T, E> + Send + 'static,
    E: Into<BoxError>,
  {
    let encoder = codec.clone();
    let payload = self.once(key, ttl, move || -> Result<Vec<u8>, BoxError> {
      let value = producer().map_err(|err| -> BoxError { err.into() })?;
      encoder.encode(&value)
    })?;
    codec.decode(&payload).map_err(CacheError::codec)
  }

  /// Enqueues a fetch for `key` without waiting for it, blocking only while
  /// the work queue is full.
  ///
  /// The returned `PendingFetch` receives exactly one result. No deadline or
  /// fallback applies and the call is not reported to the metrics sink.
  pub fn submit<F, P, E>(&self, key: &str, ttl: Duration, producer: F) -> Result<PendingFetch, CacheError>
  where
    F: FnOnce() -> Result<P, E> + Send + 'static,
    P: Into<Payload>,
    E: Into<BoxError>,
  {
    self.shared.submit(key, ttl, guard_producer(producer))
  }

  /// The local recency cache backing the fallback path.
  pub fn recency(&self) -> &RecencyCache<Payload> {
    &self.shared.recency
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Number of requests waiting for a free worker.
  pub fn queued(&self) -> usize {
    self.shared.dispatcher.queued()
  }

  pub fn fallback_deadline(&self) -> Duration {
    self.shared.fallback_deadline
  }

  pub fn default_ttl(&self) -> Duration {
    self.shared.default_ttl
  }

  /// Stops accepting new calls, lets the workers finish everything already
  /// queued, and joins the background threads. Later calls fail with
  /// `CacheError::Shutdown`. Idempotent.
  pub fn shutdown(&self) {
    self.shared.shutdown();
  }

  pub fn is_shutdown(&self) -> bool {
    self.shared.dispatcher.is_closed()
  }
}
