use crate::codec::Payload;
use crate::error::CacheError;
use crate::store::Producer;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "tokio")]
use std::sync::Arc;
use std::time::Duration;

use fibre::mpmc;
use fibre::RecvErrorTimeout;
#[cfg(feature = "tokio")]
use fibre::TrySendError;
use parking_lot::{Condvar, Mutex};
#[cfg(feature = "tokio")]
use tokio::sync::Notify;
use tracing::debug;

/// A unit of work travelling from a caller to a worker.
///
/// Created once per call and never shared; its result sender is used exactly
/// once by the worker that dequeues it.
pub(crate) struct FetchRequest {
  pub(crate) key: String,
  pub(crate) ttl: Duration,
  pub(crate) producer: Producer,
  pub(crate) ticket: u64,
  pub(crate) result_tx: mpmc::Sender<FetchResult>,
}

impl fmt::Debug for FetchRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FetchRequest")
      .field("key", &self.key)
      .field("ttl", &self.ttl)
      .field("ticket", &self.ticket)
      .finish_non_exhaustive()
  }
}

/// The single result delivered for a submitted request.
#[derive(Debug, Clone)]
pub struct FetchResult {
  /// The value, or the producer/store error.
  pub outcome: Result<Payload, CacheError>,
  /// `true` if the producer ran; `false` if the store answered on its own.
  pub served_freshly: bool,
}

/// The caller's end of a submitted request.
#[derive(Debug)]
pub struct PendingFetch {
  rx: mpmc::Receiver<FetchResult>,
  ticket: u64,
}

impl PendingFetch {
  /// The submission ticket of this request. Later submissions carry larger
  /// tickets.
  pub fn ticket(&self) -> u64 {
    self.ticket
  }

  /// Blocks until the worker delivers the result.
  pub fn wait(self) -> Result<FetchResult, CacheError> {
    self.rx.recv().map_err(|_| CacheError::Disconnected)
  }

  /// Blocks for at most `timeout`. Returns `Ok(None)` if it elapsed; the
  /// request stays pending and can still be waited on.
  pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<FetchResult>, CacheError> {
    match self.rx.recv_timeout(timeout) {
      Ok(result) => Ok(Some(result)),
      Err(RecvErrorTimeout::Timeout) => Ok(None),
      Err(RecvErrorTimeout::Disconnected) => Err(CacheError::Disconnected),
    }
  }

  #[cfg(feature = "tokio")]
  pub(crate) fn into_async(self) -> mpmc::AsyncReceiver<FetchResult> {
    self.rx.to_async()
  }
}

/// The workers' end of the work queue.
#[derive(Clone)]
pub(crate) struct WorkQueue {
  rx: mpmc::Receiver<FetchRequest>,
  #[cfg(feature = "tokio")]
  space: Arc<Notify>,
}

impl WorkQueue {
  /// Blocks until a request arrives. Returns `None` once the queue is closed
  /// and drained.
  pub(crate) fn next(&self) -> Option<FetchRequest> {
    let request = self.rx.recv().ok()?;
    #[cfg(feature = "tokio")]
    self.space.notify_one();
    Some(request)
  }
}

struct SubmitState {
  active: usize,
  closed: bool,
}

// Held while a submission may still put a request on the queue.
struct SubmitGuard<'a>(&'a Dispatcher);

impl Drop for SubmitGuard<'_> {
  fn drop(&mut self) {
    let mut state = self.0.state.lock();
    state.active -= 1;
    if state.active == 0 && state.closed {
      self.0.idle.notify_all();
    }
  }
}

/// Feeds requests into the bounded work queue shared by the worker pool.
///
/// Blocking submission parks the calling thread while the queue is full.
/// Async submission never parks inside the channel: it retries whenever a
/// worker takes a request, so closing never depends on a runtime polling it.
/// The dispatcher does not deduplicate keys; that is the remote store's job.
pub(crate) struct Dispatcher {
  tx: mpmc::Sender<FetchRequest>,
  tickets: AtomicU64,
  state: Mutex<SubmitState>,
  idle: Condvar,
  #[cfg(feature = "tokio")]
  space: Arc<Notify>,
}

impl fmt::Debug for Dispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dispatcher")
      .field("queued", &self.tx.len())
      .field("capacity", &self.tx.capacity())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl Dispatcher {
  /// Creates the dispatcher and the receiving end the workers drain.
  pub(crate) fn new(queue_capacity: usize) -> (Self, WorkQueue) {
    let (tx, rx) = mpmc::bounded(queue_capacity);
    #[cfg(feature = "tokio")]
    let space = Arc::new(Notify::new());
    let queue = WorkQueue {
      rx,
      #[cfg(feature = "tokio")]
      space: space.clone(),
    };
    let dispatcher = Self {
      tx,
      tickets: AtomicU64::new(0),
      state: Mutex::new(SubmitState {
        active: 0,
        closed: false,
      }),
      idle: Condvar::new(),
      #[cfg(feature = "tokio")]
      space,
    };
    (dispatcher, queue)
  }

  fn enter(&self) -> Result<SubmitGuard<'_>, CacheError> {
    let mut state = self.state.lock();
    if state.closed {
      return Err(CacheError::Shutdown);
    }
    state.active += 1;
    Ok(SubmitGuard(self))
  }

  fn request(&self, key: &str, ttl: Duration, producer: Producer) -> (FetchRequest, PendingFetch) {
    let (result_tx, rx) = mpmc::bounded(1);
    // Tickets start at 1; 0 marks an unversioned recency write.
    let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
    let request = FetchRequest {
      key: key.to_string(),
      ttl,
      producer,
      ticket,
      result_tx,
    };
    (request, PendingFetch { rx, ticket })
  }

  /// Enqueues a request, blocking the calling thread while the queue is full.
  pub(crate) fn submit(
    &self,
    key: &str,
    ttl: Duration,
    producer: Producer,
  ) -> Result<PendingFetch, CacheError> {
    let _guard = self.enter()?;
    let (request, pending) = self.request(key, ttl, producer);
    self
      .tx
      .send(request)
      .map_err(|_| CacheError::Shutdown)?;
    Ok(pending)
  }

  /// Enqueues a request, yielding while the queue is full. Fails with
  /// `CacheError::Shutdown` if the dispatcher closes while it waits.
  #[cfg(feature = "tokio")]
  pub(crate) async fn submit_async(
    &self,
    key: &str,
    ttl: Duration,
    producer: Producer,
  ) -> Result<PendingFetch, CacheError> {
    let (mut request, pending) = self.request(key, ttl, producer);
    loop {
      // Registered before the attempt so a slot freed in between still wakes us.
      let mut space = std::pin::pin!(self.space.notified());
      space.as_mut().enable();
      {
        let _guard = self.enter()?;
        match self.tx.try_send(request) {
          Ok(()) => return Ok(pending),
          Err(TrySendError::Full(returned)) => request = returned,
          Err(_) => return Err(CacheError::Shutdown),
        }
      }
      space.await;
    }
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  /// Number of requests waiting for a worker.
  pub(crate) fn queued(&self) -> usize {
    self.tx.len()
  }

  /// Refuses new submissions and wakes async submitters waiting for space so
  /// they fail with `CacheError::Shutdown`. Blocking submitters already parked
  /// on a full queue land as workers drain it. Then the queue is disconnected
  /// so workers exit once it is empty. Returns `false` if the dispatcher was
  /// already closed.
  pub(crate) fn close(&self) -> bool {
    let mut state = self.state.lock();
    if state.closed {
      return false;
    }
    state.closed = true;
    #[cfg(feature = "tokio")]
    self.space.notify_waiters();
    while state.active > 0 {
      self.idle.wait(&mut state);
    }
    drop(state);
    let _ = self.tx.close();
    debug!("work queue closed");
    true
  }
}
