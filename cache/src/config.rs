//! Startup configuration for a `Coalescer`.
//!
//! The configuration is read once, typically from a YAML file with optional
//! environment overrides, and handed to `CoalescerBuilder::from_config` as a
//! plain value.

use crate::error::{BuildError, ConfigError};

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

pub(crate) const DEFAULT_WORKERS: usize = 5;
pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
pub(crate) const DEFAULT_FALLBACK_DEADLINE: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_RECENCY_CAPACITY: usize = 1000;
pub(crate) const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_WRITEBACK_CAPACITY: usize = 128;

/// Resource and latency knobs of the coalescing cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoalesceConfig {
  /// Number of workers calling into the remote store concurrently.
  #[serde(default = "default_workers")]
  pub workers: usize,
  /// Capacity of the bounded work queue in front of the workers.
  #[serde(default = "default_queue_capacity")]
  pub queue_capacity: usize,
  /// How long a caller waits for a fresh value before accepting a local one.
  #[serde(
    default = "default_fallback_deadline",
    deserialize_with = "deserialize_duration"
  )]
  pub fallback_deadline: Duration,
  /// Maximum number of entries held by the local recency cache.
  #[serde(default = "default_recency_capacity")]
  pub recency_capacity: usize,
  /// Entry lifetime used by `once_default`.
  #[serde(default = "default_ttl", deserialize_with = "deserialize_duration")]
  pub default_ttl: Duration,
  /// Capacity of the write-back queue feeding the recency cache.
  #[serde(default = "default_writeback_capacity")]
  pub writeback_capacity: usize,
}

fn default_workers() -> usize {
  DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
  DEFAULT_QUEUE_CAPACITY
}

fn default_fallback_deadline() -> Duration {
  DEFAULT_FALLBACK_DEADLINE
}

fn default_recency_capacity() -> usize {
  DEFAULT_RECENCY_CAPACITY
}

fn default_ttl() -> Duration {
  DEFAULT_TTL
}

fn default_writeback_capacity() -> usize {
  DEFAULT_WRITEBACK_CAPACITY
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

impl Default for CoalesceConfig {
  fn default() -> Self {
    Self {
      workers: DEFAULT_WORKERS,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      fallback_deadline: DEFAULT_FALLBACK_DEADLINE,
      recency_capacity: DEFAULT_RECENCY_CAPACITY,
      default_ttl: DEFAULT_TTL,
      writeback_capacity: DEFAULT_WRITEBACK_CAPACITY,
    }
  }
}

impl CoalesceConfig {
  /// Parses a configuration from a YAML document. Missing fields take their
  /// defaults.
  pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
    let config: CoalesceConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads and parses a YAML configuration file.
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = fs::read_to_string(path.as_ref())?;
    Self::from_yaml_str(&contents)
  }

  /// Overrides fields from `<PREFIX>_*` environment variables, e.g.
  /// `COALESCE_WORKERS=8` or `COALESCE_FALLBACK_DEADLINE=250ms`.
  pub fn with_env_overrides(self, prefix: &str) -> Result<Self, ConfigError> {
    self.with_overrides(|name| env::var(format!("{}_{}", prefix, name)).ok())
  }

  /// Applies overrides from an arbitrary lookup, keyed by the upper-case field
  /// name.
  pub(crate) fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(raw) = lookup("WORKERS") {
      self.workers = parse_count("workers", &raw)?;
    }
    if let Some(raw) = lookup("QUEUE_CAPACITY") {
      self.queue_capacity = parse_count("queue_capacity", &raw)?;
    }
    if let Some(raw) = lookup("FALLBACK_DEADLINE") {
      self.fallback_deadline = parse_duration("fallback_deadline", &raw)?;
    }
    if let Some(raw) = lookup("RECENCY_CAPACITY") {
      self.recency_capacity = parse_count("recency_capacity", &raw)?;
    }
    if let Some(raw) = lookup("DEFAULT_TTL") {
      self.default_ttl = parse_duration("default_ttl", &raw)?;
    }
    if let Some(raw) = lookup("WRITEBACK_CAPACITY") {
      self.writeback_capacity = parse_count("writeback_capacity", &raw)?;
    }
    self.validate()?;
    Ok(self)
  }

  /// Rejects values that would leave the coalescer unable to make progress.
  pub fn validate(&self) -> Result<(), BuildError> {
    if self.workers == 0 {
      return Err(BuildError::ZeroWorkers);
    }
    if self.queue_capacity == 0 {
      return Err(BuildError::ZeroQueueCapacity);
    }
    if self.recency_capacity == 0 {
      return Err(BuildError::ZeroRecencyCapacity);
    }
    if self.writeback_capacity == 0 {
      return Err(BuildError::ZeroWritebackCapacity);
    }
    if self.fallback_deadline.is_zero() {
      return Err(BuildError::ZeroDeadline);
    }
    Ok(())
  }
}

fn parse_count(field: &str, raw: &str) -> Result<usize, ConfigError> {
  raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
    field: field.to_string(),
    message: format!("'{}' is not a count: {}", raw, e),
  })
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
  humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidValue {
    field: field.to_string(),
    message: format!("'{}' is not a duration: {}", raw, e),
  })
}
