use crate::codec::Payload;
use crate::dispatch::{FetchRequest, FetchResult, WorkQueue};
use crate::error::{BoxError, CacheError};
use crate::store::{Producer, RemoteStore};
use crate::task::writeback::Writeback;

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// Wraps a caller's computation as a store `Producer`.
///
/// Errors become `CacheError::Producer` and a panic becomes
/// `CacheError::ProducerPanicked`, so a misbehaving producer can neither kill
/// a worker nor leave callers joined on the same computation waiting forever.
pub(crate) fn guard_producer<F, P, E>(producer: F) -> Producer
where
  F: FnOnce() -> Result<P, E> + Send + 'static,
  P: Into<Payload>,
  E: Into<BoxError>,
{
  Box::new(move || match panic::catch_unwind(AssertUnwindSafe(producer)) {
    Ok(Ok(value)) => Ok(value.into()),
    Ok(Err(err)) => Err(CacheError::producer(err)),
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      warn!(%message, "producer panicked");
      Err(CacheError::ProducerPanicked(message))
    }
  })
}

/// The fixed set of threads calling into the remote store.
///
/// The pool size bounds the number of concurrent remote calls.
#[derive(Debug)]
pub(crate) struct WorkerPool {
  handles: Mutex<Vec<JoinHandle<()>>>,
  size: usize,
}

impl WorkerPool {
  pub(crate) fn spawn(
    size: usize,
    queue: WorkQueue,
    store: Arc<dyn RemoteStore>,
    writeback: Arc<Writeback>,
  ) -> io::Result<Self> {
    let mut handles = Vec::with_capacity(size);
    for id in 0..size {
      let queue = queue.clone();
      let store = store.clone();
      let writeback = writeback.clone();
      let handle = thread::Builder::new()
        .name(format!("coalesce-worker-{}", id))
        .spawn(move || run(id, queue, store, writeback))?;
      handles.push(handle);
    }
    debug!(workers = size, "worker pool started");
    Ok(Self {
      handles: Mutex::new(handles),
      size,
    })
  }

  pub(crate) fn size(&self) -> usize {
    self.size
  }

  /// Waits for every worker to exit. Workers exit once the work queue is
  /// disconnected and drained.
  pub(crate) fn join(&self) {
    let handles = std::mem::take(&mut *self.handles.lock());
    let current = thread::current().id();
    for handle in handles {
      if handle.thread().id() == current {
        continue;
      }
      let _ = handle.join();
    }
  }
}

fn run(
  id: usize,
  queue: WorkQueue,
  store: Arc<dyn RemoteStore>,
  writeback: Arc<Writeback>,
) {
  while let Some(request) = queue.next() {
    let FetchRequest {
      key,
      ttl,
      producer,
      ticket,
      result_tx,
    } = request;

    let (outcome, served_freshly) = fetch(store.as_ref(), &key, ttl, producer);
    if let Ok(value) = &outcome {
      writeback.submit(key, value.clone(), ticket);
    }
    // The caller may have stopped listening; the write-back above still ran.
    let _ = result_tx.send(FetchResult {
      outcome,
      served_freshly,
    });
  }
  debug!(worker = id, "worker stopped");
}

/// Calls the store once, reporting whether the producer ran.
fn fetch(
  store: &dyn RemoteStore,
  key: &str,
  ttl: Duration,
  producer: Producer,
) -> (Result<Payload, CacheError>, bool) {
  let ran = Arc::new(AtomicBool::new(false));
  let tracked: Producer = {
    let ran = ran.clone();
    Box::new(move || {
      ran.store(true, Ordering::Release);
      producer()
    })
  };

  let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
    store.fetch_or_compute(key, ttl, tracked)
  })) {
    Ok(outcome) => outcome,
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      warn!(key, %message, "remote store panicked");
      Err(CacheError::store(format!("remote store panicked: {}", message)))
    }
  };
  (outcome, ran.load(Ordering::Acquire))
}
