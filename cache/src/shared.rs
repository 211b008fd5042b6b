use crate::codec::Payload;
use crate::dispatch::{Dispatcher, FetchResult, PendingFetch};
use crate::error::CacheError;
use crate::metrics::{KeyClassifier, Metrics, MetricsSink, Observation, ServedFrom};
use crate::recency::RecencyCache;
use crate::store::Producer;
use crate::task::worker::WorkerPool;
use crate::task::writeback::Writeback;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

/// The internal, thread-safe core shared by every handle of one coalescer.
pub(crate) struct CoalescerShared {
  pub(crate) dispatcher: Dispatcher,
  pub(crate) recency: Arc<RecencyCache<Payload>>,
  pub(crate) writeback: Arc<Writeback>,
  pub(crate) workers: WorkerPool,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) sink: Arc<dyn MetricsSink>,
  pub(crate) key_classifier: KeyClassifier,
  pub(crate) fallback_deadline: Duration,
  pub(crate) default_ttl: Duration,
}

impl fmt::Debug for CoalescerShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoalescerShared")
      .field("workers", &self.workers.size())
      .field("fallback_deadline", &self.fallback_deadline)
      .field("default_ttl", &self.default_ttl)
      .field("dispatcher", &self.dispatcher)
      .field("recency_len", &self.recency.len())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl Drop for CoalescerShared {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl CoalescerShared {
  pub(crate) fn classify<'k>(&self, key: &'k str) -> &'k str {
    (self.key_classifier)(key)
  }

  /// Hands a request to the work queue, blocking while it is full.
  pub(crate) fn submit(
    &self,
    key: &str,
    ttl: Duration,
    producer: Producer,
  ) -> Result<PendingFetch, CacheError> {
    let pending = self.dispatcher.submit(key, ttl, producer)?;
    Metrics::incr(&self.metrics.submitted);
    Ok(pending)
  }

  /// Races the pending result against the fallback deadline.
  ///
  /// On timeout the recency cache answers if it holds the key. Otherwise the
  /// caller keeps waiting for the worker with no further timeout.
  pub(crate) fn resolve(
    &self,
    key: &str,
    key_class: &str,
    pending: PendingFetch,
  ) -> Result<Payload, CacheError> {
    match pending.wait_timeout(self.fallback_deadline) {
      Ok(Some(result)) => return self.finish(key_class, Ok(result)),
      Ok(None) => {}
      Err(err) => return self.finish(key_class, Err(err)),
    }
    if let Some(value) = self.fallback(key, key_class) {
      return Ok(value);
    }
    self.finish(key_class, pending.wait())
  }

  /// Serves `key` from the recency cache once the deadline has elapsed.
  pub(crate) fn fallback(&self, key: &str, key_class: &str) -> Option<Payload> {
    match self.recency.get(key) {
      Some(value) => {
        debug!(key, "deadline elapsed, serving from recency cache");
        self.observe(key_class, ServedFrom::LocalFallback);
        Some(value)
      }
      None => {
        trace!(key, "deadline elapsed with nothing cached locally, waiting");
        Metrics::incr(&self.metrics.fallback_misses);
        None
      }
    }
  }

  /// Accounts for a result delivered by a worker.
  pub(crate) fn finish(
    &self,
    key_class: &str,
    delivered: Result<FetchResult, CacheError>,
  ) -> Result<Payload, CacheError> {
    let outcome = delivered.and_then(|result| {
      let served_from = if result.served_freshly {
        ServedFrom::Fresh
      } else {
        ServedFrom::AdapterCache
      };
      result.outcome.map(|value| (value, served_from))
    });
    match outcome {
      Ok((value, served_from)) => {
        self.observe(key_class, served_from);
        Ok(value)
      }
      Err(err) => {
        Metrics::incr(&self.metrics.errors);
        Err(err)
      }
    }
  }

  fn observe(&self, key_class: &str, served_from: ServedFrom) {
    self.metrics.record_served(served_from);
    self.sink.observe(&Observation {
      key_class,
      served_from,
    });
  }

  /// Closes the work queue, drains it and stops the background threads.
  /// Only the first call does any work.
  pub(crate) fn shutdown(&self) {
    if !self.dispatcher.close() {
      return;
    }
    self.workers.join();
    self.writeback.stop();
    debug!("coalescer shut down");
  }
}
