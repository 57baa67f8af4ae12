mod common;

use common::*;
use fibre_fibers::{BuildError, Fiber, TaskError};

use parking_lot::Mutex;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_items_never_overlap_and_keep_per_producer_order() {
  init_tracing();
  let fiber = Fiber::new("exclusive");
  let active = Arc::new(AtomicUsize::new(0));
  let max_active = Arc::new(AtomicUsize::new(0));
  let seen = Arc::new(Mutex::new(Vec::new()));

  let mut producers = Vec::new();
  for producer in 0..4 {
    let fiber = fiber.clone();
    let active = active.clone();
    let max_active = max_active.clone();
    let seen = seen.clone();
    producers.push(tokio::spawn(async move {
      for i in 0..ITEMS_MEDIUM {
        let active = active.clone();
        let max_active = max_active.clone();
        let seen = seen.clone();
        fiber.queue_to_run(move || {
          let now = active.fetch_add(1, Ordering::SeqCst) + 1;
          max_active.fetch_max(now, Ordering::SeqCst);
          seen.lock().push((producer, i));
          active.fetch_sub(1, Ordering::SeqCst);
        });
      }
    }));
  }
  for producer in producers {
    producer.await.unwrap();
  }

  timeout(LONG_TIMEOUT, fiber.wait()).await.expect("fiber did not drain");

  assert_eq!(max_active.load(Ordering::SeqCst), 1);
  let seen = seen.lock();
  assert_eq!(seen.len(), 4 * ITEMS_MEDIUM);
  for producer in 0..4 {
    let order: Vec<usize> = seen.iter().filter(|(p, _)| *p == producer).map(|(_, i)| *i).collect();
    assert_eq!(order, (0..ITEMS_MEDIUM).collect::<Vec<_>>());
  }
}

#[tokio::test]
async fn test_wait_covers_everything_queued_before_it() {
  let fiber = Fiber::new("waiter");
  let hits = Arc::new(AtomicUsize::new(0));

  for _ in 0..10 {
    let hits = hits.clone();
    fiber.queue_to_run_async(move || async move {
      tokio::task::yield_now().await;
      hits.fetch_add(1, Ordering::SeqCst);
    });
  }
  fiber.wait().await;

  assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_once_fires_after_delay() {
  let fiber = Fiber::new("timer");
  let fired = Arc::new(AtomicBool::new(false));

  let flag = fired.clone();
  let _handle = fiber.schedule_once(Duration::from_millis(100), move || {
    flag.store(true, Ordering::SeqCst);
  });

  sleep(Duration::from_millis(50)).await;
  assert!(!fired.load(Ordering::SeqCst));

  sleep(Duration::from_millis(60)).await;
  assert!(fired.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_schedule_once_cancelled_never_runs() {
  let fiber = Fiber::new("timer");
  let fired = Arc::new(AtomicBool::new(false));

  let flag = fired.clone();
  let handle = fiber.schedule_once_async(Duration::from_millis(100), move || async move {
    flag.store(true, Ordering::SeqCst);
  });
  handle.cancel();
  assert!(handle.is_cancelled());

  sleep(Duration::from_millis(500)).await;
  fiber.wait().await;
  assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_schedule_on_interval_fires_until_cancelled() {
  let fiber = Fiber::new("interval");
  let count = Arc::new(AtomicUsize::new(0));

  let counter = count.clone();
  let handle = fiber.schedule_on_interval(
    Some(Duration::from_millis(200)),
    Duration::from_millis(500),
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
    },
  );

  // Fires at 200ms, 700ms, 1200ms, 1700ms.
  sleep(Duration::from_millis(300)).await;
  assert_eq!(count.load(Ordering::SeqCst), 1);
  for expected in 2..=4 {
    sleep(Duration::from_millis(500)).await;
    assert_eq!(count.load(Ordering::SeqCst), expected);
  }

  handle.cancel();
  sleep(Duration::from_secs(2)).await;
  fiber.wait().await;
  assert_eq!(count.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_on_interval_defaults_first_delay_to_interval() {
  let fiber = Fiber::new("interval");
  let count = Arc::new(AtomicUsize::new(0));

  let counter = count.clone();
  let handle = fiber.schedule_on_interval_async(None, Duration::from_millis(100), move || {
    let counter = counter.clone();
    async move {
      counter.fetch_add(1, Ordering::SeqCst);
    }
  });

  sleep(Duration::from_millis(50)).await;
  assert_eq!(count.load(Ordering::SeqCst), 0);
  sleep(Duration::from_millis(100)).await;
  assert_eq!(count.load(Ordering::SeqCst), 1);

  handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_schedule_on_interval_accepts_an_unreachable_first_delay() {
  let fiber = Fiber::new("interval");
  let count = Arc::new(AtomicUsize::new(0));

  let counter = count.clone();
  let handle = fiber.schedule_on_interval(Some(Duration::MAX), Duration::from_millis(10), move || {
    counter.fetch_add(1, Ordering::SeqCst);
  });

  sleep(Duration::from_secs(1)).await;
  handle.cancel();
  sleep(Duration::from_secs(1)).await;
  fiber.wait().await;
  assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[should_panic(expected = "non-zero interval")]
async fn test_schedule_on_interval_rejects_zero_interval() {
  let fiber = Fiber::new("interval");
  let _handle = fiber.schedule_on_interval(None, Duration::ZERO, || {});
}

#[tokio::test]
async fn test_lock_returns_the_closure_value() {
  let fiber = Fiber::new("lock");
  let state = Arc::new(Mutex::new(Vec::new()));

  for i in 0..5 {
    let state = state.clone();
    fiber.queue_to_run(move || state.lock().push(i));
  }
  let snapshot = state.clone();
  let seen = fiber.lock(move || snapshot.lock().clone()).await.unwrap();
  assert_eq!(seen, vec![0, 1, 2, 3, 4]);

  let doubled = fiber.lock_async(|| async { 21 * 2 }).await.unwrap();
  assert_eq!(doubled, 42);
}

#[tokio::test]
async fn test_lock_panic_is_returned_to_the_caller() {
  let reported = Arc::new(AtomicUsize::new(0));
  let counter = reported.clone();
  let fiber = Fiber::builder("lock-panic")
    .exception_handler(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    })
    .build()
    .unwrap();

  let result = fiber.lock(|| -> u32 { panic!("inside lock") }).await;
  match result {
    Err(TaskError::Panicked(message)) => assert_eq!(message, "inside lock"),
    other => panic!("expected a panic report, got {:?}", other),
  }

  // The fiber keeps working and the handler was not involved.
  assert_eq!(fiber.lock(|| 1).await.unwrap(), 1);
  assert_eq!(reported.load(Ordering::SeqCst), 0);
}

#[test]
fn test_lock_is_abandoned_when_the_fiber_goes_away() {
  let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
  let fiber = Fiber::builder("doomed").runtime(runtime.handle().clone()).build().unwrap();

  // Nothing drives the runtime, so the item is still queued when it shuts down.
  let pending = fiber.lock(|| 5);
  drop(runtime);
  drop(fiber);

  let result = tokio::runtime::Runtime::new().unwrap().block_on(pending);
  assert!(matches!(result, Err(TaskError::Abandoned)));
}

#[tokio::test]
async fn test_assert_on_fiber() {
  let fiber = Fiber::new("home");
  let other = Fiber::new("away");

  let err = fiber.assert_on_fiber().unwrap_err();
  assert_eq!(err.to_string(), "wrong fiber, expected to be called on home");

  let observer = fiber.clone();
  assert!(fiber.lock(move || observer.assert_on_fiber()).await.unwrap().is_ok());

  let observer = fiber.clone();
  let err = other.lock(move || observer.assert_on_fiber()).await.unwrap().unwrap_err();
  assert_eq!(err.expected_id(), fiber.id());
}

#[tokio::test]
async fn test_fiber_exception_handler_sees_task_names() {
  let failures = Arc::new(Mutex::new(Vec::new()));
  let sink = failures.clone();
  let fiber = Fiber::new("handled");
  fiber.set_exception_handler(move |failure| {
    sink.lock().push((failure.task_name().map(str::to_string), failure.error().is_panic()));
  });

  fiber.queue_named("parse", || Err::<(), _>("bad input"));
  fiber.queue_to_run(|| -> () { panic!("unnamed blowup") });
  fiber.wait().await;

  assert_eq!(
    *failures.lock(),
    vec![(Some("parse".to_string()), false), (None, true)]
  );
}

#[tokio::test]
#[serial]
async fn test_default_exception_handler_catches_unhandled_failures() {
  let failures = Arc::new(Mutex::new(Vec::new()));
  let sink = failures.clone();
  fibre_fibers::set_default_exception_handler(move |failure| {
    sink.lock().push(failure.fiber_name().to_string());
  });

  let fiber = Fiber::new("unhandled");
  fiber.queue_to_run(|| Err::<(), _>("nobody listens"));
  fiber.wait().await;

  fibre_fibers::reset_default_exception_handler();
  assert_eq!(*failures.lock(), vec!["unhandled".to_string()]);
}

#[tokio::test]
#[serial]
async fn test_cleared_handler_falls_back_to_default() {
  let to_default = Arc::new(AtomicUsize::new(0));
  let to_fiber = Arc::new(AtomicUsize::new(0));

  let counter = to_default.clone();
  fibre_fibers::set_default_exception_handler(move |_| {
    counter.fetch_add(1, Ordering::SeqCst);
  });

  let counter = to_fiber.clone();
  let fiber = Fiber::builder("cleared")
    .exception_handler(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    })
    .build()
    .unwrap();

  fiber.queue_to_run(|| Err::<(), _>("first"));
  fiber.wait().await;
  fiber.clear_exception_handler();
  fiber.queue_to_run(|| Err::<(), _>("second"));
  fiber.wait().await;

  fibre_fibers::reset_default_exception_handler();
  assert_eq!(to_fiber.load(Ordering::SeqCst), 1);
  assert_eq!(to_default.load(Ordering::SeqCst), 1);
}

#[test]
fn test_builder_requires_a_runtime() {
  let err = Fiber::builder("orphan").build().unwrap_err();
  assert!(matches!(err, BuildError::NoRuntime(ref name) if name == "orphan"));
}

#[test]
fn test_builder_accepts_an_explicit_runtime() {
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(2)
    .enable_all()
    .build()
    .unwrap();
  let fiber = Fiber::builder("external")
    .runtime(runtime.handle().clone())
    .build()
    .unwrap();

  // Queued from a thread that is not part of the runtime.
  let hits = Arc::new(AtomicUsize::new(0));
  let counter = hits.clone();
  fiber.queue_to_run(move || {
    counter.fetch_add(1, Ordering::SeqCst);
  });

  let value = runtime
    .block_on(async { timeout(SHORT_TIMEOUT, fiber.lock(|| 7)).await })
    .expect("lock timed out")
    .unwrap();
  assert_eq!(value, 7);
  assert_eq!(hits.load(Ordering::SeqCst), 1);
}
