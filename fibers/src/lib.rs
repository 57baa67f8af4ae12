#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Fibers and fiber-bound publish/subscribe channels on tokio.
//!
//! A [`Fiber`] is a named execution context that runs its queued work one item
//! at a time, in FIFO order, on a shared tokio runtime. State touched only by
//! a fiber's work needs no lock. A [`Channel`] broadcasts typed messages to
//! handlers, each of which runs on the fiber it subscribed with, and a
//! [`Subscriber`] adds time-windowed delivery on top (`once`, `batched`,
//! `keyed`, `first`, `last`).
//!
//! Every scheduling and subscription call returns a [`CancelHandle`].
//! Failures of fire-and-forget work are routed to an exception handler, never
//! to the caller that queued the work.

pub mod cancel;
pub mod channel;
pub mod error;
pub mod fiber;
pub mod handler;

mod timer;

pub use cancel::{CancelGuard, CancelHandle};
pub use channel::{Channel, Subscriber};
pub use error::{BoxError, BuildError, TaskError, WrongFiberError};
pub use fiber::{
  default_exception_handler, reset_default_exception_handler, set_default_exception_handler,
  ExceptionHandler, Fiber, FiberBuilder, FiberId, TaskFailure,
};
pub use handler::{Handler, HandlerId, TaskOutcome};
