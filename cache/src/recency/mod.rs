//! A bounded, thread-safe least-recently-used cache.
//!
//! This is the local fallback source consulted when the remote store is slow.
//! Lookups run concurrently under a shared read lock; the recency updates they
//! cause are buffered and replayed by the next writer, which holds the lock
//! exclusively. A writer always replays pending touches before it evicts, so
//! the evicted entry is the least recently touched one.

mod list;

use self::list::{LruList, Write};

use std::fmt;

use generational_arena::Index;
use parking_lot::{Mutex, RwLock};

// Readers hand their touches to a writer once this many are pending.
const TOUCH_BUFFER_LIMIT: usize = 64;

/// The result of `RecencyCache::add_versioned`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
  /// The key was new. Carries the key that had to be evicted to make room.
  Inserted { evicted: Option<String> },
  /// An existing entry was overwritten.
  Updated,
  /// The stored entry came from a newer write; nothing changed.
  Stale,
}

/// A fixed-capacity, least-recently-used key/value cache.
pub struct RecencyCache<V> {
  list: RwLock<LruList<V>>,
  touches: Mutex<Vec<Index>>,
  capacity: usize,
}

impl<V: Clone> fmt::Debug for RecencyCache<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RecencyCache")
      .field("capacity", &self.capacity)
      .field("len", &self.len())
      .finish()
  }
}

impl<V: Clone> RecencyCache<V> {
  /// Creates a cache holding at most `capacity` entries.
  ///
  /// A capacity of zero is raised to one.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      list: RwLock::new(LruList::with_capacity(capacity)),
      touches: Mutex::new(Vec::new()),
      capacity,
    }
  }

  /// Returns a clone of the value for `key` and marks it most recently used.
  pub fn get(&self, key: &str) -> Option<V> {
    let (value, should_flush) = {
      let list = self.list.read();
      let index = list.index_of(key)?;
      let value = list.value(index)?.clone();
      // Recorded while the read lock is held so no writer can slip in between
      // the lookup and the touch.
      let mut touches = self.touches.lock();
      touches.push(index);
      (value, touches.len() >= TOUCH_BUFFER_LIMIT)
    };

    if should_flush {
      let mut list = self.list.write();
      self.replay_touches(&mut list);
    }
    Some(value)
  }

  /// Inserts or overwrites `key`, evicting the least recently used entry when
  /// the cache is full. Returns the evicted key, if any.
  pub fn add(&self, key: &str, value: V) -> Option<String> {
    match self.write(key, value, 0) {
      AddOutcome::Inserted { evicted } => evicted,
      _ => None,
    }
  }

  /// Like `add`, but only lands if `version` is at least as new as the
  /// version of the write that produced the stored entry.
  ///
  /// Versions are monotonically increasing tickets; `0` is reserved for
  /// unconditional writes.
  pub fn add_versioned(&self, key: &str, value: V, version: u64) -> AddOutcome {
    self.write(key, value, version)
  }

  fn write(&self, key: &str, value: V, version: u64) -> AddOutcome {
    let mut list = self.list.write();
    self.replay_touches(&mut list);

    let evicted = if !list.contains(key) && list.len() >= self.capacity {
      list.pop_back().map(|(evicted_key, _)| evicted_key)
    } else {
      None
    };

    match list.upsert(key, value, version) {
      Write::Inserted => AddOutcome::Inserted { evicted },
      Write::Updated => AddOutcome::Updated,
      Write::Stale => AddOutcome::Stale,
    }
  }

  /// Removes `key`. Returns `true` if it was present.
  pub fn remove(&self, key: &str) -> bool {
    let mut list = self.list.write();
    self.replay_touches(&mut list);
    list.remove(key).is_some()
  }

  /// Returns `true` if `key` is cached. Does not count as a touch.
  pub fn contains(&self, key: &str) -> bool {
    self.list.read().contains(key)
  }

  pub fn len(&self) -> usize {
    self.list.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Drops every entry.
  pub fn clear(&self) {
    let mut list = self.list.write();
    self.touches.lock().clear();
    list.clear();
  }

  fn replay_touches(&self, list: &mut LruList<V>) {
    let pending = std::mem::take(&mut *self.touches.lock());
    for index in pending {
      list.touch(index);
    }
  }

  #[cfg(test)]
  fn keys_in_order(&self) -> Vec<String> {
    let mut list = self.list.write();
    self.replay_touches(&mut list);
    list.keys_as_vec()
  }
}
