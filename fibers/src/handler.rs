//! Task outcomes and the message handler type shared by channels and operators.
//!
//! Every handler, synchronous or asynchronous, is stored as a single callback
//! shape: it takes the publishing channel and an argument, and returns a boxed
//! future resolving to `Result<(), BoxError>`. [`Handler::new`] and
//! [`Handler::new_async`] are the two adapters onto that shape.

use crate::channel::Channel;
use crate::error::{BoxError, TaskResult};

use futures_util::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Values a task or handler body may return.
///
/// `()` means success. `Result<(), E>` reports `Err` as a task failure, which
/// the fiber routes to its exception handler.
pub trait TaskOutcome {
  /// Converts the value into the fiber's internal result.
  fn into_task_result(self) -> Result<(), BoxError>;
}

impl TaskOutcome for () {
  #[inline]
  fn into_task_result(self) -> Result<(), BoxError> {
    Ok(())
  }
}

impl<E> TaskOutcome for Result<(), E>
where
  E: Into<BoxError>,
{
  #[inline]
  fn into_task_result(self) -> Result<(), BoxError> {
    self.map_err(Into::into)
  }
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Handler`]. Clones share the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
  pub(crate) fn next() -> Self {
    HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for HandlerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "handler-{}", self.0)
  }
}

pub(crate) type Callback<T, A> =
  Arc<dyn Fn(Channel<T>, A) -> BoxFuture<'static, TaskResult> + Send + Sync + 'static>;

/// A message handler invoked on a fiber with the publishing channel and an argument.
///
/// `A` is the argument type: the message itself for plain subscriptions and
/// for `once`/`first`/`last`, a `Vec<T>` for batched delivery, a
/// `HashMap<K, T>` for keyed delivery.
///
/// Handlers are compared by identity, not by behaviour. To unsubscribe, pass
/// the same `Handler` (or a clone of it) that was used to subscribe.
pub struct Handler<T, A = T> {
  id: HandlerId,
  callback: Callback<T, A>,
}

impl<T, A> Handler<T, A>
where
  T: 'static,
  A: 'static,
{
  /// Creates a handler from a synchronous closure.
  pub fn new<F, R>(f: F) -> Self
  where
    F: Fn(&Channel<T>, A) -> R + Send + Sync + 'static,
    R: TaskOutcome,
  {
    Self::from_callback(
      HandlerId::next(),
      Arc::new(move |channel: Channel<T>, arg: A| {
        future::ready(f(&channel, arg).into_task_result()).boxed()
      }),
    )
  }

  /// Creates a handler from a closure returning a future.
  ///
  /// The fiber awaits the future before it moves on to its next item, so the
  /// whole future runs with the fiber's exclusivity.
  pub fn new_async<F, Fut>(f: F) -> Self
  where
    F: Fn(Channel<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: TaskOutcome,
  {
    Self::from_callback(
      HandlerId::next(),
      Arc::new(move |channel: Channel<T>, arg: A| f(channel, arg).map(TaskOutcome::into_task_result).boxed()),
    )
  }

  pub(crate) fn from_callback(id: HandlerId, callback: Callback<T, A>) -> Self {
    Self { id, callback }
  }
}

impl<T, A> Handler<T, A> {
  /// The identity of this handler.
  pub fn id(&self) -> HandlerId {
    self.id
  }

  pub(crate) fn invoke(&self, channel: Channel<T>, arg: A) -> BoxFuture<'static, TaskResult> {
    (self.callback)(channel, arg)
  }
}

impl<T, A> Clone for Handler<T, A> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      callback: Arc::clone(&self.callback),
    }
  }
}

impl<T, A> PartialEq for Handler<T, A> {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl<T, A> Eq for Handler<T, A> {}

impl<T, A> fmt::Debug for Handler<T, A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handler").field("id", &self.id).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unit_and_ok_are_success() {
    assert!(().into_task_result().is_ok());
    assert!(Ok::<(), std::io::Error>(()).into_task_result().is_ok());
  }

  #[test]
  fn err_is_boxed() {
    let outcome: Result<(), std::io::Error> = Err(std::io::Error::other("disk gone"));
    let err = outcome.into_task_result().unwrap_err();
    assert_eq!(err.to_string(), "disk gone");
  }

  #[test]
  fn clones_share_identity() {
    let a: Handler<i32> = Handler::new(|_, _| {});
    let b: Handler<i32> = Handler::new(|_, _| {});
    let a2 = a.clone();

    assert_eq!(a, a2);
    assert_eq!(a.id(), a2.id());
    assert_ne!(a, b);
  }
}
