mod common;

use common::{wait_until, SlowStore};

use coalesce_cache::{CoalescerBuilder, MemoryStore};
use std::io;
use std::sync::{
  atomic::{AtomicBool, Ordering},
  mpsc, Arc, Barrier,
};
use std::thread;
use std::time::Duration;

#[test]
fn test_caller_blocks_while_queue_is_full() {
  let cache = CoalescerBuilder::new()
    .workers(1)
    .queue_capacity(1)
    .fallback_deadline(Duration::from_secs(10))
    .build(MemoryStore::new())
    .unwrap();

  // Hold the only worker until released.
  let (release_tx, release_rx) = mpsc::channel::<()>();
  let busy = cache
    .submit("report:busy", Duration::from_secs(60), move || {
      let _ = release_rx.recv();
      Ok::<_, io::Error>(b"busy".to_vec())
    })
    .unwrap();
  wait_until(|| cache.queued() == 0);

  // Fill the queue.
  let queued = cache
    .submit("report:queued", Duration::from_secs(60), || Ok::<_, io::Error>(b"queued".to_vec()))
    .unwrap();
  assert_eq!(cache.queued(), 1);

  let returned = Arc::new(AtomicBool::new(false));
  let blocked = {
    let cache = cache.clone();
    let returned = returned.clone();
    thread::spawn(move || {
      let value = cache.once("report:blocked", Duration::from_secs(60), || {
        Ok::<_, io::Error>(b"blocked".to_vec())
      });
      returned.store(true, Ordering::SeqCst);
      value
    })
  };

  thread::sleep(Duration::from_millis(150));
  assert!(!returned.load(Ordering::SeqCst), "caller did not wait for queue space");
  assert_eq!(cache.metrics().submitted, 2);

  release_tx.send(()).unwrap();
  assert_eq!(&*blocked.join().unwrap().unwrap(), b"blocked");
  assert_eq!(&*busy.wait().unwrap().outcome.unwrap(), b"busy");
  assert_eq!(&*queued.wait().unwrap().outcome.unwrap(), b"queued");
  assert_eq!(cache.metrics().submitted, 3);
}

#[test]
fn test_burst_of_callers_all_succeed() {
  let workers = 2;
  let queue_capacity = 2;
  let store = SlowStore::new();
  store.set_delay(Duration::from_millis(30));

  let cache = CoalescerBuilder::new()
    .workers(workers)
    .queue_capacity(queue_capacity)
    .fallback_deadline(Duration::from_secs(10))
    .build(store.clone())
    .unwrap();

  // Far more callers than the queue and the workers can hold.
  let num_threads = (workers + queue_capacity) * 4;
  let barrier = Arc::new(Barrier::new(num_threads));
  let mut handles = vec![];

  for i in 0..num_threads {
    let cache = cache.clone();
    let barrier = barrier.clone();
    handles.push(thread::spawn(move || {
      barrier.wait();
      let key = format!("report:{}", i);
      let value = cache
        .once(&key, Duration::from_secs(60), move || {
          Ok::<_, io::Error>(i.to_string().into_bytes())
        })
        .unwrap();
      assert_eq!(value.as_ref(), i.to_string().as_bytes());
    }));
  }

  for handle in handles {
    handle.join().unwrap();
  }

  let metrics = cache.metrics();
  assert_eq!(metrics.submitted, num_threads as u64);
  assert_eq!(metrics.fresh, num_threads as u64);
  assert_eq!(metrics.errors, 0);
  assert_eq!(store.calls.load(Ordering::SeqCst), num_threads);
}

#[test]
fn test_remote_concurrency_is_bounded_by_pool_size() {
  let workers = 3;
  let store = SlowStore::new();
  store.set_delay(Duration::from_millis(20));

  let cache = CoalescerBuilder::new()
    .workers(workers)
    .queue_capacity(64)
    .fallback_deadline(Duration::from_secs(10))
    .build(store.clone())
    .unwrap();

  let num_threads = 24;
  let barrier = Arc::new(Barrier::new(num_threads));
  let handles: Vec<_> = (0..num_threads)
    .map(|i| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        cache
          .once(&format!("limits:{}", i), Duration::from_secs(60), || {
            Ok::<_, io::Error>(b"ok".to_vec())
          })
          .unwrap();
      })
    })
    .collect();

  for handle in handles {
    handle.join().unwrap();
  }

  let max = store.max_in_flight.load(Ordering::SeqCst);
  assert!(max <= workers, "saw {} concurrent remote calls", max);
  assert!(max >= 1);
}

#[test]
fn test_queue_drains_after_burst() {
  let store = SlowStore::new();
  let cache = CoalescerBuilder::new()
    .workers(1)
    .queue_capacity(4)
    .build(store)
    .unwrap();

  let pending: Vec<_> = (0..4)
    .map(|i| {
      cache
        .submit(&format!("k{}", i), Duration::from_secs(1), move || {
          thread::sleep(Duration::from_millis(5));
          Ok::<_, io::Error>(vec![i as u8])
        })
        .unwrap()
    })
    .collect();

  for (i, fetch) in pending.into_iter().enumerate() {
    let result = fetch.wait().unwrap();
    assert_eq!(&*result.outcome.unwrap(), &[i as u8]);
  }
  assert_eq!(cache.queued(), 0);
}
