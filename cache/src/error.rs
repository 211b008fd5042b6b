use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A boxed error as returned by producers and store adapters.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A reference-counted error.
///
/// A single remote computation can answer many callers at once, so the error
/// it produced has to be shareable between all of them.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when building a `Coalescer`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The worker pool was configured with zero workers; nothing would ever
  /// drain the work queue.
  #[error("worker pool size cannot be zero")]
  ZeroWorkers,
  /// The work queue was configured with a capacity of zero.
  #[error("work queue capacity cannot be zero")]
  ZeroQueueCapacity,
  /// The recency cache was configured with a capacity of zero.
  #[error("recency cache capacity cannot be zero")]
  ZeroRecencyCapacity,
  /// The write-back queue was configured with a capacity of zero.
  #[error("write-back queue capacity cannot be zero")]
  ZeroWritebackCapacity,
  /// The fallback deadline was zero, which would make every call race a timer
  /// that has already fired.
  #[error("fallback deadline cannot be zero")]
  ZeroDeadline,
  /// A worker or the write-back thread could not be started.
  #[error("failed to spawn background thread: {0}")]
  Spawn(String),
}

/// The error returned by `Coalescer::once` and its variants.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// The caller-supplied producer failed.
  #[error("producer failed: {0}")]
  Producer(#[source] SharedError),
  /// The remote store adapter itself failed (network, serialization).
  #[error("remote store failed: {0}")]
  Store(#[source] SharedError),
  /// Encoding or decoding a typed value failed.
  #[error("payload codec failed: {0}")]
  Codec(#[source] SharedError),
  /// The producer panicked while running on a worker.
  #[error("producer panicked: {0}")]
  ProducerPanicked(String),
  /// The coalescer has been shut down and refuses new submissions.
  #[error("coalescer is shut down")]
  Shutdown,
  /// The request was dropped without a result being delivered.
  #[error("request was dropped before a result was delivered")]
  Disconnected,
}

impl CacheError {
  /// Wraps a producer failure.
  pub fn producer<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    CacheError::Producer(Arc::from(err.into()))
  }

  /// Wraps a remote store failure.
  pub fn store<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    CacheError::Store(Arc::from(err.into()))
  }

  pub(crate) fn codec<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    CacheError::Codec(Arc::from(err.into()))
  }

  /// Returns `true` if the failure came from the caller's producer.
  pub fn is_producer(&self) -> bool {
    matches!(self, CacheError::Producer(_) | CacheError::ProducerPanicked(_))
  }
}

/// Errors raised while loading a `CoalesceConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read configuration file: {0}")]
  Read(#[from] std::io::Error),

  #[error("failed to parse configuration: {0}")]
  Parse(String),

  #[error("invalid configuration value for '{field}': {message}")]
  InvalidValue { field: String, message: String },
}

impl From<serde_yaml::Error> for ConfigError {
  fn from(err: serde_yaml::Error) -> Self {
    ConfigError::Parse(err.to_string())
  }
}

impl From<BuildError> for ConfigError {
  fn from(err: BuildError) -> Self {
    let field = match err {
      BuildError::ZeroWorkers => "workers",
      BuildError::ZeroQueueCapacity => "queue_capacity",
      BuildError::ZeroRecencyCapacity => "recency_capacity",
      BuildError::ZeroWritebackCapacity => "writeback_capacity",
      BuildError::ZeroDeadline => "fallback_deadline",
      BuildError::Spawn(_) => "workers",
    };
    ConfigError::InvalidValue {
      field: field.to_string(),
      message: err.to_string(),
    }
  }
}
