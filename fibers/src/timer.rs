//! Cancellable timers backing `schedule_once` and `schedule_on_interval`.
//!
//! Each scheduled call gets its own detached task that sleeps on the tokio
//! timer. Cancelling sets a flag and wakes the task so it exits early. The
//! flag is consulted exactly once per firing, right before the action hands
//! work to the fiber; a firing that already passed that check still lands.

use crate::cancel::CancelHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Default)]
struct TimerSignal {
  cancelled: AtomicBool,
  wake: Notify,
}

impl TimerSignal {
  fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
    // notify_one stores a permit, so a timer task that is not parked yet
    // still observes the wake-up.
    self.wake.notify_one();
  }

  fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }
}

fn cancel_handle(signal: &Arc<TimerSignal>) -> CancelHandle {
  let signal = Arc::clone(signal);
  CancelHandle::new(move || signal.cancel())
}

/// Runs `fire` once after `delay`, unless cancelled first.
pub(crate) fn once<F>(runtime: &Handle, delay: Duration, fire: F) -> CancelHandle
where
  F: FnOnce() + Send + 'static,
{
  let signal = Arc::new(TimerSignal::default());
  let task_signal = Arc::clone(&signal);

  runtime.spawn(async move {
    tokio::select! {
      _ = time::sleep(delay) => {}
      _ = task_signal.wake.notified() => {}
    }

    if task_signal.is_cancelled() {
      tracing::trace!("one-shot timer cancelled before firing");
      return;
    }
    tracing::trace!(?delay, "one-shot timer fired");
    fire();
  });

  cancel_handle(&signal)
}

/// Runs `fire` after `initial_delay` (or `interval` when `None`), then every
/// `interval`, until cancelled.
///
/// # Panics
///
/// Panics if `interval` is zero.
pub(crate) fn repeating<F>(
  runtime: &Handle,
  initial_delay: Option<Duration>,
  interval: Duration,
  fire: F,
) -> CancelHandle
where
  F: Fn() + Send + Sync + 'static,
{
  assert!(!interval.is_zero(), "schedule_on_interval requires a non-zero interval");

  let signal = Arc::new(TimerSignal::default());
  let task_signal = Arc::clone(&signal);
  let first = initial_delay.unwrap_or(interval);

  runtime.spawn(run_repeating(task_signal, first, interval, fire));

  cancel_handle(&signal)
}

async fn run_repeating<F: Fn()>(
  signal: Arc<TimerSignal>,
  first: Duration,
  interval: Duration,
  fire: F,
) {
  // A first deadline past the end of the clock has no Instant, so sleep it out
  // instead. tokio clamps oversized sleeps to its own far-future horizon.
  let start = match Instant::now().checked_add(first) {
    Some(start) => start,
    None => {
      tokio::select! {
        _ = time::sleep(first) => {}
        _ = signal.wake.notified() => {}
      }
      Instant::now()
    }
  };
  let mut ticker = time::interval_at(start, interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = ticker.tick() => {}
      _ = signal.wake.notified() => {}
    }

    if signal.is_cancelled() {
      tracing::trace!("interval timer cancelled");
      return;
    }
    tracing::trace!(?interval, "interval timer fired");
    fire();
  }
}
