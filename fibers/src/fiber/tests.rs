// src/fiber/tests.rs

use super::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize};

fn recording_fiber(name: &str) -> (Fiber, Arc<Mutex<Vec<String>>>) {
  let failures = Arc::new(Mutex::new(Vec::new()));
  let sink = failures.clone();
  let fiber = Fiber::builder(name)
    .exception_handler(move |failure| sink.lock().push(failure.to_string()))
    .build()
    .unwrap();
  (fiber, failures)
}

#[tokio::test]
async fn items_run_in_fifo_order() {
  let fiber = Fiber::new("fifo");
  let order = Arc::new(Mutex::new(Vec::new()));

  for i in 0..100 {
    let order = order.clone();
    fiber.queue_to_run(move || order.lock().push(i));
  }
  fiber.wait().await;

  assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn drained_fiber_is_idle() {
  let fiber = Fiber::new("idle");
  assert!(fiber.core.is_idle());

  fiber.queue_to_run(|| {});
  assert!(!fiber.core.is_idle());
  fiber.wait().await;

  // The worker exits in the same poll that completed the last item.
  assert!(fiber.core.is_idle());
  assert_eq!(fiber.queue_len(), 0);
}

#[tokio::test]
async fn idle_fiber_restarts_on_new_work() {
  let fiber = Fiber::new("restart");
  let hits = Arc::new(AtomicUsize::new(0));

  for _ in 0..3 {
    let counter = hits.clone();
    fiber.queue_to_run(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    fiber.wait().await;
    assert!(fiber.core.is_idle());
  }
  assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn queued_names_reflect_pending_items() {
  let fiber = Fiber::new("names");

  // The worker cannot start before this task yields on a current-thread runtime.
  fiber.queue_named("alpha", || {});
  fiber.queue_to_run(|| {});
  fiber.queue_named("beta", || {});

  assert_eq!(fiber.queue_len(), 3);
  assert_eq!(
    fiber.queued_task_names(),
    vec![Some("alpha".to_string()), None, Some("beta".to_string())]
  );

  fiber.wait().await;
  assert!(fiber.queued_task_names().is_empty());
}

#[tokio::test]
async fn current_task_name_is_visible_while_running() {
  let fiber = Fiber::new("current");
  let seen = Arc::new(Mutex::new(None));

  let observer = fiber.clone();
  let slot = seen.clone();
  fiber.queue_named("report", move || {
    *slot.lock() = observer.current_task_name();
  });
  fiber.wait().await;

  assert_eq!(seen.lock().as_deref(), Some("report"));
  assert_eq!(fiber.current_task_name(), None);
}

#[tokio::test]
async fn failures_reach_the_fiber_handler() {
  let (fiber, failures) = recording_fiber("failing");
  let survived = Arc::new(AtomicBool::new(false));

  fiber.queue_named("bad-result", || Err::<(), _>(std::io::Error::other("nope")));
  fiber.queue_named("bad-panic", || -> () { panic!("kaboom") });
  let flag = survived.clone();
  fiber.queue_to_run(move || flag.store(true, Ordering::SeqCst));
  fiber.wait().await;

  let failures = failures.lock();
  assert_eq!(failures.len(), 2);
  assert_eq!(failures[0], "fiber 'failing' task 'bad-result': task failed: nope");
  assert_eq!(failures[1], "fiber 'failing' task 'bad-panic': task panicked: kaboom");
  assert!(survived.load(Ordering::SeqCst));
}

#[tokio::test]
async fn async_items_hold_the_fiber_until_done() {
  let fiber = Fiber::new("async");
  let order = Arc::new(Mutex::new(Vec::new()));

  let first = order.clone();
  fiber.queue_to_run_async(move || async move {
    first.lock().push("start");
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    first.lock().push("end");
  });
  let second = order.clone();
  fiber.queue_to_run(move || second.lock().push("next"));
  fiber.wait().await;

  assert_eq!(*order.lock(), vec!["start", "end", "next"]);
}

#[tokio::test]
async fn panicking_exception_handler_does_not_wedge_the_fiber() {
  let fiber = Fiber::builder("wedge")
    .exception_handler(|failure| panic!("handler gave up on {}", failure))
    .build()
    .unwrap();
  let after = Arc::new(AtomicBool::new(false));

  fiber.queue_to_run(|| Err::<(), _>("first failure"));
  let flag = after.clone();
  fiber.queue_to_run(move || flag.store(true, Ordering::SeqCst));

  fiber.wait().await;
  assert!(after.load(Ordering::SeqCst));
}

#[tokio::test]
async fn is_on_fiber_only_inside_the_drain_task() {
  let fiber = Fiber::new("confined");
  assert!(!fiber.is_on_fiber());

  let observer = fiber.clone();
  let (on_fiber, in_spawned) = fiber
    .lock_async(move || async move {
      let inner = observer.clone();
      let spawned = tokio::spawn(async move { inner.is_on_fiber() });
      (observer.is_on_fiber(), spawned.await.unwrap_or(true))
    })
    .await
    .unwrap();

  assert!(on_fiber);
  assert!(!in_spawned);
}
