//! Single-shot cancellation handles returned by scheduling and subscription calls.
//!
//! Cancellation is cooperative. A handle only prevents *future* activity: a
//! timer that has not fired yet, a repeating schedule that has not re-armed, a
//! handler that has not been enqueued. Work already handed to a fiber always
//! runs to completion.

use parking_lot::Mutex;
use std::fmt;

type Release = Box<dyn FnOnce() + Send + 'static>;

/// A handle that stops a scheduled task or removes a subscription.
///
/// Dropping a `CancelHandle` does **not** cancel anything; the activity keeps
/// going until [`cancel`](CancelHandle::cancel) is called. Use
/// [`drop_guard`](CancelHandle::drop_guard) for scope-bound cancellation.
pub struct CancelHandle {
  release: Mutex<Option<Release>>,
}

impl CancelHandle {
  pub(crate) fn new<F>(release: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    Self {
      release: Mutex::new(Some(Box::new(release))),
    }
  }

  /// Cancels the associated activity.
  ///
  /// Idempotent: only the first call has an effect.
  pub fn cancel(&self) {
    // Take the action out before running it so the mutex is not held while
    // it touches channel or timer state.
    let release = self.release.lock().take();
    if let Some(release) = release {
      tracing::debug!("cancel handle released");
      release();
    }
  }

  /// Returns `true` once [`cancel`](CancelHandle::cancel) has been called.
  pub fn is_cancelled(&self) -> bool {
    self.release.lock().is_none()
  }

  /// Converts this handle into a guard that cancels when dropped.
  pub fn drop_guard(self) -> CancelGuard {
    CancelGuard { handle: Some(self) }
  }
}

impl fmt::Debug for CancelHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CancelHandle")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}

/// Cancels its [`CancelHandle`] when dropped.
#[derive(Debug)]
pub struct CancelGuard {
  handle: Option<CancelHandle>,
}

impl CancelGuard {
  /// Gives the handle back without cancelling it.
  pub fn disarm(mut self) -> CancelHandle {
    match self.handle.take() {
      Some(handle) => handle,
      // The handle is only taken here or in Drop, both of which consume the guard.
      None => unreachable!("CancelGuard handle taken twice"),
    }
  }
}

impl Drop for CancelGuard {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.cancel();
    }
  }
}
