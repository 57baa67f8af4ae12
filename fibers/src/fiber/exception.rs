//! Exception routing for fire-and-forget work.
//!
//! Failures of work queued with `queue_to_run` (or delivered by a channel) are
//! never propagated to whoever enqueued them. They are handed to the fiber's
//! own exception handler, or to the process-wide default when the fiber has
//! none.
//!
//! The default handler is global state. Prefer giving each fiber its own
//! handler through [`FiberBuilder::exception_handler`](super::FiberBuilder::exception_handler)
//! and keep the global one for last-resort reporting.

use super::FiberId;
use crate::error::TaskError;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A callback receiving failures of work executed on a fiber.
pub type ExceptionHandler = Arc<dyn Fn(&TaskFailure) + Send + Sync + 'static>;

/// A failure raised by a work item while it executed on a fiber.
#[derive(Debug)]
pub struct TaskFailure {
  fiber_id: FiberId,
  fiber_name: Arc<str>,
  task_name: Option<Arc<str>>,
  error: TaskError,
}

impl TaskFailure {
  pub(crate) fn new(
    fiber_id: FiberId,
    fiber_name: Arc<str>,
    task_name: Option<Arc<str>>,
    error: TaskError,
  ) -> Self {
    Self {
      fiber_id,
      fiber_name,
      task_name,
      error,
    }
  }

  /// The fiber the work ran on.
  pub fn fiber_id(&self) -> FiberId {
    self.fiber_id
  }

  /// The name of the fiber the work ran on.
  pub fn fiber_name(&self) -> &str {
    &self.fiber_name
  }

  /// The name of the work item, if it had one.
  pub fn task_name(&self) -> Option<&str> {
    self.task_name.as_deref()
  }

  /// What went wrong.
  pub fn error(&self) -> &TaskError {
    &self.error
  }

  /// Consumes the report, returning the underlying error.
  pub fn into_error(self) -> TaskError {
    self.error
  }
}

impl fmt::Display for TaskFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.task_name {
      Some(task) => write!(f, "fiber '{}' task '{}': {}", self.fiber_name, task, self.error),
      None => write!(f, "fiber '{}': {}", self.fiber_name, self.error),
    }
  }
}

static DEFAULT_EXCEPTION_HANDLER: Lazy<RwLock<ExceptionHandler>> =
  Lazy::new(|| RwLock::new(baseline_handler()));

fn baseline_handler() -> ExceptionHandler {
  Arc::new(trap_failure)
}

/// The handler installed until someone replaces it: log the failure, then trap
/// in debug builds so it cannot go unnoticed during development.
fn trap_failure(failure: &TaskFailure) {
  tracing::error!(
    fiber = failure.fiber_name(),
    fiber_id = %failure.fiber_id(),
    task = failure.task_name().unwrap_or("<unnamed>"),
    error = %failure.error(),
    "unhandled failure on fiber"
  );

  if cfg!(debug_assertions) {
    panic!("unhandled failure on {}", failure);
  }
}

/// Replaces the process-wide default exception handler.
///
/// The default cannot be removed, only replaced; use
/// [`reset_default_exception_handler`] to restore the built-in behaviour.
pub fn set_default_exception_handler<F>(handler: F)
where
  F: Fn(&TaskFailure) + Send + Sync + 'static,
{
  *DEFAULT_EXCEPTION_HANDLER.write() = Arc::new(handler);
}

/// Restores the built-in default exception handler.
///
/// The built-in handler logs the failure at `error` level and, in debug
/// builds, panics.
pub fn reset_default_exception_handler() {
  *DEFAULT_EXCEPTION_HANDLER.write() = baseline_handler();
}

/// Returns the current process-wide default exception handler.
pub fn default_exception_handler() -> ExceptionHandler {
  DEFAULT_EXCEPTION_HANDLER.read().clone()
}
