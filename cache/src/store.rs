//! The contract of the remote key/value store sitting behind the coalescer,
//! plus an in-process implementation of it.

use crate::codec::Payload;
use crate::error::CacheError;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::trace;

/// A deferred computation producing the value for a cache miss.
///
/// Producer failures are already wrapped as `CacheError::Producer` (or
/// `CacheError::ProducerPanicked`) by the time a store sees them.
pub type Producer = Box<dyn FnOnce() -> Result<Payload, CacheError> + Send + 'static>;

/// A key/value store with native single-flight and time-to-live semantics.
///
/// Implementations must guarantee that concurrent calls for the same key run
/// at most one producer, with every concurrent caller receiving its outcome.
/// Producer errors must be returned unchanged; failures of the store itself
/// are reported as `CacheError::Store`.
pub trait RemoteStore: Send + Sync + 'static {
  /// Returns the value stored under `key`, or runs `producer`, stores its
  /// value for `ttl` and returns it.
  fn fetch_or_compute(
    &self,
    key: &str,
    ttl: Duration,
    producer: Producer,
  ) -> Result<Payload, CacheError>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
  fn fetch_or_compute(
    &self,
    key: &str,
    ttl: Duration,
    producer: Producer,
  ) -> Result<Payload, CacheError> {
    (**self).fetch_or_compute(key, ttl, producer)
  }
}

/// The state of a computation other callers may be waiting on.
enum FlightState {
  Computing,
  Complete(Result<Payload, CacheError>),
}

struct Flight {
  state: Mutex<FlightState>,
  done: Condvar,
}

impl Flight {
  fn new() -> Self {
    Self {
      state: Mutex::new(FlightState::Computing),
      done: Condvar::new(),
    }
  }

  fn complete(&self, result: Result<Payload, CacheError>) {
    let mut state = self.state.lock();
    *state = FlightState::Complete(result);
    self.done.notify_all();
  }

  fn wait(&self) -> Result<Payload, CacheError> {
    let mut state = self.state.lock();
    loop {
      if let FlightState::Complete(result) = &*state {
        return result.clone();
      }
      self.done.wait(&mut state);
    }
  }
}

// Retires the flight when the leader finishes. If the leader unwinds before
// recording a result, the joined callers receive a store error instead.
struct FlightLeader<'a> {
  store: &'a MemoryStore,
  key: &'a str,
  flight: Arc<Flight>,
  result: Option<Result<Payload, CacheError>>,
}

impl Drop for FlightLeader<'_> {
  fn drop(&mut self) {
    let result = self
      .result
      .take()
      .unwrap_or_else(|| Err(CacheError::store("computation abandoned by its leader")));
    self.store.flights.lock().remove(self.key);
    self.flight.complete(result);
  }
}

struct StoredEntry {
  value: Payload,
  // `None` when the time-to-live is too large to represent.
  expires_at: Option<Instant>,
}

impl StoredEntry {
  #[inline]
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.map_or(true, |at| now < at)
  }
}

/// An in-process `RemoteStore`.
///
/// Values live until their time-to-live elapses; a zero time-to-live means
/// the value is handed to the waiting callers but not retained.
pub struct MemoryStore {
  entries: RwLock<HashMap<String, StoredEntry, RandomState>>,
  flights: Mutex<HashMap<String, Arc<Flight>, RandomState>>,
}

impl fmt::Debug for MemoryStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoryStore")
      .field("entries", &self.entries.read().len())
      .field("in_flight", &self.flights.lock().len())
      .finish()
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      entries: RwLock::new(HashMap::default()),
      flights: Mutex::new(HashMap::default()),
    }
  }

  fn lookup(&self, key: &str) -> Option<Payload> {
    let now = Instant::now();
    self
      .entries
      .read()
      .get(key)
      .filter(|entry| entry.is_live(now))
      .map(|entry| entry.value.clone())
  }

  /// Returns the live value for `key` without computing anything.
  pub fn peek(&self, key: &str) -> Option<Payload> {
    self.lookup(key)
  }

  /// Stores `value` under `key` for `ttl`. A `ttl` past the end of the clock
  /// keeps the value until it is invalidated.
  pub fn set(&self, key: &str, value: Payload, ttl: Duration) {
    if ttl.is_zero() {
      return;
    }
    self.entries.write().insert(
      key.to_string(),
      StoredEntry {
        value,
        expires_at: Instant::now().checked_add(ttl),
      },
    );
  }

  /// Drops the stored value for `key`. Returns `true` if one was present.
  pub fn invalidate(&self, key: &str) -> bool {
    self.entries.write().remove(key).is_some()
  }

  /// Removes every expired entry and returns how many were dropped.
  pub fn purge_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.entries.write();
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
  }

  /// Number of stored entries, including expired ones not yet purged.
  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl RemoteStore for MemoryStore {
  fn fetch_or_compute(
    &self,
    key: &str,
    ttl: Duration,
    producer: Producer,
  ) -> Result<Payload, CacheError> {
    if let Some(value) = self.lookup(key) {
      return Ok(value);
    }

    let flight = {
      let mut flights = self.flights.lock();
      if let Some(existing) = flights.get(key) {
        let existing = existing.clone();
        drop(flights);
        trace!(key, "joining in-flight computation");
        return existing.wait();
      }
      // A computation may have finished between the lookup and taking the
      // lock. Completion stores the value before retiring the flight, so
      // checking again here is enough.
      if let Some(value) = self.lookup(key) {
        return Ok(value);
      }
      let flight = Arc::new(Flight::new());
      flights.insert(key.to_string(), flight.clone());
      flight
    };

    let mut leader = FlightLeader {
      store: self,
      key,
      flight,
      result: None,
    };
    let result = producer();
    if let Ok(value) = &result {
      self.set(key, value.clone(), ttl);
    }
    leader.result = Some(result.clone());
    result
  }
}
