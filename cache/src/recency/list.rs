use std::hash::BuildHasher;

use ahash::RandomState;
use generational_arena::{Arena, Index};

#[derive(Debug)]
pub(super) struct Node<V> {
  pub(super) key: String,
  pub(super) value: V,
  // Ticket of the write that produced this value. 0 means unversioned.
  pub(super) version: u64,
  pub(super) next: Option<Index>,
  pub(super) prev: Option<Index>,
}

/// Outcome of a conditional write into the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Write {
  Inserted,
  Updated,
  Stale,
}

// An arena-backed doubly linked list with O(1) lookup, touch and eviction.
#[derive(Debug)]
pub(super) struct LruList<V, S = RandomState> {
  nodes: Arena<Node<V>>,
  lookup: std::collections::HashMap<String, Index, S>,
  // Head is the most-recently-used item.
  head: Option<Index>,
  // Tail is the least-recently-used item.
  tail: Option<Index>,
}

impl<V> LruList<V> {
  pub fn with_capacity(capacity: usize) -> Self {
    Self::with_hasher(capacity, RandomState::new())
  }
}

impl<V, S: BuildHasher> LruList<V, S> {
  pub fn with_hasher(capacity: usize, hasher: S) -> Self {
    // Capacity is only a sizing hint; bounding is the caller's job.
    let hint = capacity.min(4096);
    Self {
      nodes: Arena::with_capacity(hint),
      lookup: std::collections::HashMap::with_capacity_and_hasher(hint, hasher),
      head: None,
      tail: None,
    }
  }

  fn unlink(&mut self, index: Index) {
    let (prev, next) = {
      let node = &self.nodes[index];
      (node.prev, node.next)
    };

    match prev {
      Some(prev_idx) => self.nodes[prev_idx].next = next,
      None => self.head = next,
    }
    match next {
      Some(next_idx) => self.nodes[next_idx].prev = prev,
      None => self.tail = prev,
    }
  }

  fn push_front_node(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old) = old_head {
      self.nodes[old].prev = Some(index);
    }
    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.lookup.contains_key(key)
  }

  pub fn index_of(&self, key: &str) -> Option<Index> {
    self.lookup.get(key).copied()
  }

  pub fn value(&self, index: Index) -> Option<&V> {
    self.nodes.get(index).map(|node| &node.value)
  }

  /// Moves the node to the head. Indices of removed nodes are ignored.
  pub fn touch(&mut self, index: Index) {
    if !self.nodes.contains(index) || self.head == Some(index) {
      return;
    }
    self.unlink(index);
    self.push_front_node(index);
  }

  /// Inserts or overwrites `key`, making it the most recently used entry.
  ///
  /// When `version` is non-zero the write only lands if it is at least as new
  /// as the stored one. A stale write still leaves the entry untouched in
  /// the recency order.
  pub fn upsert(&mut self, key: &str, value: V, version: u64) -> Write {
    if let Some(&index) = self.lookup.get(key) {
      let node = &mut self.nodes[index];
      if version != 0 && version < node.version {
        return Write::Stale;
      }
      node.value = value;
      node.version = version;
      self.touch(index);
      return Write::Updated;
    }

    let index = self.nodes.insert(Node {
      key: key.to_string(),
      value,
      version,
      next: None,
      prev: None,
    });
    self.lookup.insert(key.to_string(), index);
    self.push_front_node(index);
    Write::Inserted
  }

  /// Removes and returns the least recently used entry.
  pub fn pop_back(&mut self) -> Option<(String, V)> {
    let tail = self.tail?;
    self.unlink(tail);
    let node = self.nodes.remove(tail)?;
    self.lookup.remove(&node.key);
    Some((node.key, node.value))
  }

  pub fn remove(&mut self, key: &str) -> Option<V> {
    let index = self.lookup.remove(key)?;
    self.unlink(index);
    self.nodes.remove(index).map(|node| node.value)
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
  }

  #[cfg(test)]
  pub(crate) fn keys_as_vec(&self) -> Vec<String> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}
