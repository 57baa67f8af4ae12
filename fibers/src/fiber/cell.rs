// src/fiber/cell.rs

use super::Fiber;
use crate::error::WrongFiberError;

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// State owned by exactly one fiber.
///
/// This is not a lock. Access is only granted while the caller is executing
/// on the owning fiber, and the fiber never runs two items at once, so there
/// is a single writer by construction. A call from anywhere else fails with
/// [`WrongFiberError`] instead of waiting, which surfaces violations of the
/// fiber contract instead of hiding them.
pub(crate) struct FiberCell<S> {
  fiber: Fiber,
  borrowed: AtomicBool,
  value: UnsafeCell<S>,
}

// SAFETY: `with` hands out `&mut S` only while the caller is the fiber's drain
// task (checked through `is_on_fiber`) and no other borrow is live (checked
// through `borrowed`). The drain task is the only task with that identity, and
// successive items synchronise through the fiber's queue mutex, so accesses
// never overlap even when the task migrates between threads.
unsafe impl<S: Send> Sync for FiberCell<S> {}

impl<S> FiberCell<S> {
  pub(crate) fn new(fiber: Fiber, value: S) -> Self {
    Self {
      fiber,
      borrowed: AtomicBool::new(false),
      value: UnsafeCell::new(value),
    }
  }

  /// Runs `f` with exclusive access to the state.
  ///
  /// # Panics
  ///
  /// Panics on re-entrant access from inside `f`.
  pub(crate) fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, WrongFiberError> {
    self.fiber.assert_on_fiber()?;

    if self.borrowed.swap(true, Ordering::Acquire) {
      panic!("re-entrant access to state owned by fiber '{}'", self.fiber.name());
    }
    let _release = ReleaseOnDrop(&self.borrowed);

    // SAFETY: see the `Sync` impl above; both conditions were just checked.
    let value = unsafe { &mut *self.value.get() };
    Ok(f(value))
  }
}

struct ReleaseOnDrop<'a>(&'a AtomicBool);

impl Drop for ReleaseOnDrop<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl<S> fmt::Debug for FiberCell<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FiberCell")
      .field("fiber", &self.fiber.name())
      .finish_non_exhaustive()
  }
}
