use crate::codec::{Codec, Payload};
use crate::error::{BoxError, CacheError};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::recency::RecencyCache;
use crate::shared::CoalescerShared;
use crate::task::worker::guard_producer;
use crate::Coalescer;

use std::sync::Arc;
use std::time::Duration;

/// A thread-safe, asynchronous coalescing cache.
///
/// Behaves exactly like `Coalescer`, but waits for queue space and results
/// without blocking the executor thread. Requires a tokio runtime with the
/// time driver enabled.
#[derive(Debug, Clone)]
pub struct AsyncCoalescer {
  pub(crate) shared: Arc<CoalescerShared>,
}

impl AsyncCoalescer {
  /// Converts this `AsyncCoalescer` into a synchronous `Coalescer`.
  /// This is a zero-cost conversion.
  pub fn to_sync(&self) -> Coalescer {
    Coalescer {
      shared: self.shared.clone(),
    }
  }

  /// Asynchronously returns the value for `key`, computing it with
  /// `producer` on a remote store miss. See `Coalescer::once`.
  pub async fn once<F, P, E>(&self, key: &str, ttl: Duration, producer: F) -> Result<Payload, CacheError>
  where
    F: FnOnce() -> Result<P, E> + Send + 'static,
    P: Into<Payload>,
    E: Into<BoxError>,
  {
    let key_class = self.shared.classify(key);
    self.once_classified(key, key_class, ttl, producer).await
  }

  pub async fn once_default<F, P, E>(&self, key: &str, producer: F) -> Result<Payload, CacheError>
  where
    F: FnOnce() -> Result<P, E> + Send + 'static,
    P: Into<Payload>,
    E: Into<BoxError>,
  {
    self.once(key, self.shared.default_ttl, producer).await
  }

  pub async fn once_classified<F, P, E>(
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
    let shared = &self.shared;
    let pending = shared
      .dispatcher
      .submit_async(key, ttl, guard_producer(producer))
      .await?;
    Metrics::incr(&shared.metrics.submitted);

    let rx = pending.into_async();
    if let Ok(delivered) = tokio::time::timeout(shared.fallback_deadline, rx.recv()).await {
      return shared.finish(key_class, delivered.map_err(|_| CacheError::Disconnected));
    }
    if let Some(value) = shared.fallback(key, key_class) {
      return Ok(value);
    }
    let delivered = rx.recv().await.map_err(|_| CacheError::Disconnected);
    shared.finish(key_class, delivered)
  }

  /// Typed variant of `once`. See `Coalescer::once_as`.
  pub async fn once_as<T, C, F, E>(
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
    let payload = self
      .once(key, ttl, move || -> Result<Vec<u8>, BoxError> {
        let value = producer().map_err(|err| -> BoxError { err.into() })?;
        encoder.encode(&value)
      })
      .await?;
    codec.decode(&payload).map_err(CacheError::codec)
  }

  pub fn recency(&self) -> &RecencyCache<Payload> {
    &self.shared.recency
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  pub fn queued(&self) -> usize {
    self.shared.dispatcher.queued()
  }

  /// Closes the coalescer. Joins the background threads, so it may block
  /// briefly while in-flight requests finish.
  pub fn shutdown(&self) {
    self.shared.shutdown();
  }

  pub fn is_shutdown(&self) -> bool {
    self.shared.dispatcher.is_closed()
  }
}
