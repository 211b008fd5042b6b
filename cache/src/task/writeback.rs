use crate::codec::Payload;
use crate::metrics::Metrics;
use crate::recency::{AddOutcome, RecencyCache};

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fibre::mpsc;
use fibre::TrySendError;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// A successful result on its way into the recency cache.
#[derive(Debug)]
pub(crate) struct WriteOp {
  pub(crate) key: String,
  pub(crate) value: Payload,
  pub(crate) ticket: u64,
}

/// Applies write operations to the recency cache.
#[derive(Debug)]
struct Applier {
  recency: Arc<RecencyCache<Payload>>,
  metrics: Arc<Metrics>,
}

impl Applier {
  fn apply(&self, op: WriteOp) {
    match self.recency.add_versioned(&op.key, op.value, op.ticket) {
      AddOutcome::Inserted { evicted } => {
        if let Some(evicted) = evicted {
          trace!(key = %evicted, "evicted from recency cache");
          Metrics::incr(&self.metrics.recency_evictions);
        }
        Metrics::incr(&self.metrics.writebacks);
      }
      AddOutcome::Updated => Metrics::incr(&self.metrics.writebacks),
      AddOutcome::Stale => {
        debug!(key = %op.key, ticket = op.ticket, "dropping write older than cached value");
        Metrics::incr(&self.metrics.stale_writes_rejected);
      }
    }
  }
}

/// The background task that keeps the recency cache up to date.
///
/// Workers hand successful results over a bounded channel so they never wait
/// on the recency cache's write lock. When the channel is full the worker
/// applies the write itself, which keeps memory bounded without losing writes.
#[derive(Debug)]
pub(crate) struct Writeback {
  sender: mpsc::BoundedSender<WriteOp>,
  applier: Arc<Applier>,
  handle: Mutex<Option<JoinHandle<()>>>,
}

impl Writeback {
  /// Spawns the write-back thread.
  pub(crate) fn spawn(
    recency: Arc<RecencyCache<Payload>>,
    metrics: Arc<Metrics>,
    capacity: usize,
  ) -> io::Result<Self> {
    let (tx, rx): (mpsc::BoundedSender<WriteOp>, mpsc::BoundedReceiver<WriteOp>) =
      mpsc::bounded(capacity);
    let applier = Arc::new(Applier { recency, metrics });

    let handle = thread::Builder::new()
      .name("coalesce-writeback".to_string())
      .spawn({
        let applier = applier.clone();
        move || {
          // Ends once every sender is gone and the queue is drained.
          while let Ok(op) = rx.recv() {
            applier.apply(op);
          }
          debug!("write-back task stopped");
        }
      })?;

    Ok(Self {
      sender: tx,
      applier,
      handle: Mutex::new(Some(handle)),
    })
  }

  /// Schedules `value` to be written under `key`.
  pub(crate) fn submit(&self, key: String, value: Payload, ticket: u64) {
    let op = WriteOp { key, value, ticket };
    match self.sender.try_send(op) {
      Ok(()) => {}
      Err(TrySendError::Full(op)) => {
        Metrics::incr(&self.applier.metrics.writebacks_inline);
        self.applier.apply(op);
      }
      Err(TrySendError::Closed(op)) | Err(TrySendError::Sent(op)) => self.applier.apply(op),
    }
  }

  /// Disconnects the channel and waits for queued writes to be applied.
  pub(crate) fn stop(&self) {
    let _ = self.sender.close();
    if let Some(handle) = self.handle.lock().take() {
      if handle.thread().id() != thread::current().id() {
        let _ = handle.join();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::{Duration, Instant};

  fn payload(s: &str) -> Payload {
    Arc::from(s.as_bytes())
  }

  fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
      assert!(Instant::now() < deadline, "condition not met in time");
      thread::sleep(Duration::from_millis(5));
    }
  }

  #[test]
  fn writes_land_in_recency_cache() {
    let recency = Arc::new(RecencyCache::new(4));
    let metrics = Arc::new(Metrics::new());
    let writeback = Writeback::spawn(recency.clone(), metrics.clone(), 8).unwrap();

    writeback.submit("k".to_string(), payload("v"), 1);
    wait_for(|| recency.contains("k"));
    assert_eq!(recency.get("k").as_deref(), Some(&b"v"[..]));

    writeback.stop();
    assert_eq!(metrics.snapshot().writebacks, 1);
  }

  #[test]
  fn stop_drains_queued_writes() {
    let recency = Arc::new(RecencyCache::new(64));
    let metrics = Arc::new(Metrics::new());
    let writeback = Writeback::spawn(recency.clone(), metrics.clone(), 64).unwrap();

    for i in 0..32u64 {
      writeback.submit(format!("k{}", i), payload("v"), i + 1);
    }
    writeback.stop();
    assert_eq!(recency.len(), 32);
    assert_eq!(metrics.snapshot().writebacks, 32);
  }

  #[test]
  fn late_ticket_is_rejected() {
    let recency = Arc::new(RecencyCache::new(4));
    let metrics = Arc::new(Metrics::new());
    let writeback = Writeback::spawn(recency.clone(), metrics.clone(), 8).unwrap();

    writeback.submit("k".to_string(), payload("new"), 7);
    writeback.submit("k".to_string(), payload("old"), 3);
    writeback.stop();

    assert_eq!(recency.get("k").as_deref(), Some(&b"new"[..]));
    assert_eq!(metrics.snapshot().stale_writes_rejected, 1);
  }

  #[test]
  fn writes_after_stop_are_applied_inline() {
    let recency = Arc::new(RecencyCache::new(4));
    let metrics = Arc::new(Metrics::new());
    let writeback = Writeback::spawn(recency.clone(), metrics, 8).unwrap();
    writeback.stop();

    writeback.submit("k".to_string(), payload("v"), 1);
    assert!(recency.contains("k"));
  }
}
