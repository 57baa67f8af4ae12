//! Error types for fibers, locked calls, and fiber construction.

use crate::fiber::FiberId;

use std::any::Any;
use thiserror::Error;

/// The boxed error type carried by failing tasks and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized `Result` for work executed on a fiber.
pub(crate) type TaskResult = Result<(), BoxError>;

/// Why a unit of work executed on a fiber did not complete successfully.
#[derive(Debug, Error)]
pub enum TaskError {
  /// The task (or handler) returned an error.
  #[error("task failed: {0}")]
  Failed(#[source] BoxError),

  /// The task (or handler) panicked. The panic payload is rendered as text.
  #[error("task panicked: {0}")]
  Panicked(String),

  /// The task was dropped before it ran to completion, which happens when
  /// the runtime driving the fiber shuts down.
  #[error("task was abandoned before it completed")]
  Abandoned,
}

impl TaskError {
  /// Builds a `TaskError::Panicked` from a caught panic payload.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_string()
    };
    TaskError::Panicked(message)
  }

  /// Returns `true` if the failure came from a panic rather than an `Err`.
  pub fn is_panic(&self) -> bool {
    matches!(self, TaskError::Panicked(_))
  }
}

/// Returned when code that must run on a particular fiber runs anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wrong fiber, expected to be called on {expected_name}")]
pub struct WrongFiberError {
  expected_id: FiberId,
  expected_name: String,
}

impl WrongFiberError {
  pub(crate) fn new(expected_id: FiberId, expected_name: &str) -> Self {
    Self {
      expected_id,
      expected_name: expected_name.to_string(),
    }
  }

  /// The id of the fiber the code should have been called on.
  pub fn expected_id(&self) -> FiberId {
    self.expected_id
  }

  /// The name of the fiber the code should have been called on.
  pub fn expected_name(&self) -> &str {
    &self.expected_name
  }
}

/// Errors raised while building a [`Fiber`](crate::Fiber).
#[derive(Debug, Error)]
pub enum BuildError {
  /// No runtime handle was configured and none is current.
  #[error("no tokio runtime available for fiber '{0}'; build it inside a runtime or pass a handle")]
  NoRuntime(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn panic_payloads_render_as_text() {
    let err = TaskError::from_panic(Box::new("boom"));
    assert_eq!(err.to_string(), "task panicked: boom");

    let err = TaskError::from_panic(Box::new(String::from("owned boom")));
    assert!(err.is_panic());
    assert_eq!(err.to_string(), "task panicked: owned boom");

    let err = TaskError::from_panic(Box::new(42_u8));
    assert_eq!(err.to_string(), "task panicked: non-string panic payload");
  }
}
