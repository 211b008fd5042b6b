use crate::codec::Payload;
use crate::config::CoalesceConfig;
use crate::dispatch::Dispatcher;
use crate::error::BuildError;
use crate::handles::Coalescer;
use crate::metrics::{prefix_key_class, KeyClassifier, Metrics, MetricsSink, NoopSink};
use crate::recency::RecencyCache;
use crate::shared::CoalescerShared;
use crate::store::RemoteStore;
use crate::task::worker::WorkerPool;
use crate::task::writeback::Writeback;

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A builder for creating `Coalescer` and `AsyncCoalescer` instances.
///
/// Every setting starts at the same default a `CoalesceConfig` would have.
pub struct CoalescerBuilder {
  config: CoalesceConfig,
  sink: Option<Arc<dyn MetricsSink>>,
  key_classifier: KeyClassifier,
}

// Manual Debug implementation for CoalescerBuilder.
impl fmt::Debug for CoalescerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoalescerBuilder")
      .field("config", &self.config)
      .field("has_sink", &self.sink.is_some())
      .finish_non_exhaustive()
  }
}

impl Default for CoalescerBuilder {
  fn default() -> Self {
    Self::from_config(CoalesceConfig::default())
  }
}

impl CoalescerBuilder {
  /// Creates a new builder with default settings.
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts from a loaded configuration.
  pub fn from_config(config: CoalesceConfig) -> Self {
    Self {
      config,
      sink: None,
      key_classifier: prefix_key_class,
    }
  }

  /// Sets the number of workers calling into the remote store. This bounds
  /// the number of concurrent remote calls.
  pub fn workers(mut self, workers: usize) -> Self {
    self.config.workers = workers;
    self
  }

  /// Sets how many requests may wait for a worker before callers block.
  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.config.queue_capacity = capacity;
    self
  }

  /// Sets how long a call waits for the remote store before it may be
  /// answered from the recency cache.
  pub fn fallback_deadline(mut self, deadline: Duration) -> Self {
    self.config.fallback_deadline = deadline;
    self
  }

  pub fn recency_capacity(mut self, capacity: usize) -> Self {
    self.config.recency_capacity = capacity;
    self
  }

  /// Sets the lifetime used by `once_default`.
  pub fn default_ttl(mut self, ttl: Duration) -> Self {
    self.config.default_ttl = ttl;
    self
  }

  pub fn writeback_capacity(mut self, capacity: usize) -> Self {
    self.config.writeback_capacity = capacity;
    self
  }

  /// Registers a sink that receives one observation per completed call.
  pub fn metrics_sink(mut self, sink: impl MetricsSink) -> Self {
    self.sink = Some(Arc::new(sink));
    self
  }

  /// Replaces the function deriving a key class from a key.
  pub fn key_classifier(mut self, classifier: KeyClassifier) -> Self {
    self.key_classifier = classifier;
    self
  }

  /// Builds a synchronous `Coalescer` in front of `store`.
  pub fn build<S: RemoteStore>(self, store: S) -> Result<Coalescer, BuildError> {
    let shared = self.build_shared_core(Arc::new(store))?;
    Ok(Coalescer { shared })
  }

  /// Builds an asynchronous `AsyncCoalescer` in front of `store`.
  #[cfg(feature = "tokio")]
  pub fn build_async<S: RemoteStore>(self, store: S) -> Result<crate::AsyncCoalescer, BuildError> {
    let shared = self.build_shared_core(Arc::new(store))?;
    Ok(crate::AsyncCoalescer { shared })
  }

  /// Central logic to construct the shared core and start its threads.
  fn build_shared_core(
    self,
    store: Arc<dyn RemoteStore>,
  ) -> Result<Arc<CoalescerShared>, BuildError> {
    self.config.validate()?;
    let config = self.config;

    let metrics = Arc::new(Metrics::new());
    let recency: Arc<RecencyCache<Payload>> = Arc::new(RecencyCache::new(config.recency_capacity));
    let writeback = Arc::new(
      Writeback::spawn(recency.clone(), metrics.clone(), config.writeback_capacity)
        .map_err(|err| BuildError::Spawn(err.to_string()))?,
    );

    let (dispatcher, queue) = Dispatcher::new(config.queue_capacity);
    let workers = match WorkerPool::spawn(config.workers, queue, store, writeback.clone()) {
      Ok(workers) => workers,
      Err(err) => {
        // Workers that did start exit once the dispatcher is dropped.
        writeback.stop();
        return Err(BuildError::Spawn(err.to_string()));
      }
    };

    Ok(Arc::new(CoalescerShared {
      dispatcher,
      recency,
      writeback,
      workers,
      metrics,
      sink: self
        .sink
        .unwrap_or_else(|| Arc::new(NoopSink) as Arc<dyn MetricsSink>),
      key_classifier: self.key_classifier,
      fallback_deadline: config.fallback_deadline,
      default_ttl: config.default_ttl,
    }))
  }
}
