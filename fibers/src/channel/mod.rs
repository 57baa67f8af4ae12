//! A named, typed publish/subscribe broadcaster whose handlers run on fibers.
//!
//! Subscriptions are keyed by fiber: each fiber holds a set of handlers, and a
//! publish enqueues one invocation per (fiber, handler) pair onto that fiber.
//! Handlers therefore run with their fiber's exclusivity and never on the
//! publisher's thread.
//!
//! ## Behavior
//!
//! - **Non-blocking fan-out**: `publish` returns once every invocation is
//!   queued, not once handlers have run.
//! - **Hooks**: before/after hooks run in the publisher's own context and are
//!   awaited in order.
//! - **Ordering**: per fiber, messages arrive in publish order. There is no
//!   ordering across fibers.
//! - **`Clone` Requirement**: each handler receives its own copy of the
//!   message, so `T` must implement `Clone`. Wrap large payloads in `Arc`.
//!
//! # Examples
//!
//! ```
//! use fibre_fibers::{Channel, Fiber, Handler};
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! tokio::runtime::Runtime::new().unwrap().block_on(async {
//!   let fiber = Fiber::new("consumer");
//!   let prices: Channel<i32> = Channel::new("prices");
//!   let last = Arc::new(AtomicI32::new(0));
//!
//!   let seen = last.clone();
//!   let handler = Handler::new(move |_, price: i32| seen.store(price, Ordering::SeqCst));
//!   let subscription = prices.with(&fiber).subscribe(&handler);
//!
//!   prices.publish(42).await.unwrap();
//!   fiber.wait().await;
//!   assert_eq!(last.load(Ordering::SeqCst), 42);
//!
//!   subscription.cancel();
//! });
//! ```

mod core;
mod subscriber;
mod window;

pub use subscriber::Subscriber;

use self::core::ChannelCore;
use crate::error::TaskError;
use crate::fiber::{Fiber, WorkItem};
use crate::handler::Handler;

use std::fmt;
use std::sync::Arc;

/// A handle to a channel. Cheap to clone; all clones share subscriptions.
pub struct Channel<T> {
  core: Arc<ChannelCore<T>>,
}

impl<T> Channel<T>
where
  T: Clone + Send + 'static,
{
  /// Creates a channel with no subscribers.
  pub fn new(name: impl Into<String>) -> Self {
    let name: Arc<str> = Arc::from(name.into());
    tracing::debug!(channel = %name, "channel created");
    Self {
      core: Arc::new(ChannelCore::new(name)),
    }
  }

  /// The channel's name.
  pub fn name(&self) -> &str {
    &self.core.name
  }

  /// Publishes a message to every subscribed (fiber, handler) pair.
  ///
  /// Runs the before-hooks, queues one invocation per subscription, then runs
  /// the after-hooks. Resolves once the invocations are queued; it does not
  /// wait for handlers to run, and handler failures go to each fiber's
  /// exception handler.
  ///
  /// # Errors
  ///
  /// - `Err(TaskError::Failed)`: a hook returned an error. A failing
  ///   before-hook stops the publish before anything is queued; a failing
  ///   after-hook is reported after the fan-out happened.
  pub async fn publish(&self, message: T) -> Result<(), TaskError> {
    let before = self.core.before_publish.read().clone();
    for hook in before {
      hook.invoke(self.clone(), message.clone()).await.map_err(TaskError::Failed)?;
    }

    let queued = self.fan_out(&message);
    tracing::trace!(channel = %self.core.name, queued, "message published");

    let after = self.core.after_publish.read().clone();
    for hook in after {
      hook.invoke(self.clone(), message.clone()).await.map_err(TaskError::Failed)?;
    }
    Ok(())
  }

  /// Queues one invocation per subscription. The registry lock is held only
  /// while enqueueing; `Fiber::enqueue` touches nothing but the target
  /// fiber's own queue lock.
  fn fan_out(&self, message: &T) -> usize {
    let subscriptions = self.core.subscriptions.lock();
    let mut queued = 0;
    for subs in subscriptions.values() {
      for handler in &subs.handlers {
        let handler = handler.clone();
        let channel = self.clone();
        let message = message.clone();
        subs.fiber.enqueue(WorkItem::new(Some(self.core.name.clone()), move || {
          handler.invoke(channel, message)
        }));
        queued += 1;
      }
    }
    queued
  }

  /// Returns a [`Subscriber`] scoping subscriptions to this channel and `fiber`.
  pub fn with(&self, fiber: &Fiber) -> Subscriber<T> {
    Subscriber::new(self.clone(), fiber.clone())
  }

  /// Runs `handler` on `fiber` for every message published from now on.
  ///
  /// Subscribing the same handler to the same fiber twice is a no-op.
  pub fn subscribe(&self, fiber: &Fiber, handler: &Handler<T>) {
    if self.core.insert(fiber, handler) {
      tracing::debug!(channel = %self.core.name, fiber = fiber.name(), handler = %handler.id(), "subscribed");
    }
  }

  /// Removes `handler` from `fiber`.
  ///
  /// Messages published after this returns are not delivered to it; messages
  /// already queued on the fiber still are. Removing an absent handler is a
  /// no-op.
  pub fn unsubscribe(&self, fiber: &Fiber, handler: &Handler<T>) {
    if self.core.remove(fiber.id(), handler.id()) {
      tracing::debug!(channel = %self.core.name, fiber = fiber.name(), handler = %handler.id(), "unsubscribed");
    }
  }

  /// Adds a hook awaited in the publisher's context before fan-out.
  pub fn add_before_publish(&self, hook: Handler<T>) {
    tracing::debug!(channel = %self.core.name, hook = %hook.id(), "before-publish hook added");
    self.core.before_publish.write().push(hook);
  }

  /// Removes a before-publish hook by identity.
  pub fn remove_before_publish(&self, hook: &Handler<T>) {
    self.core.before_publish.write().retain(|h| h != hook);
  }

  /// Adds a hook awaited in the publisher's context after fan-out.
  pub fn add_after_publish(&self, hook: Handler<T>) {
    tracing::debug!(channel = %self.core.name, hook = %hook.id(), "after-publish hook added");
    self.core.after_publish.write().push(hook);
  }

  /// Removes an after-publish hook by identity.
  pub fn remove_after_publish(&self, hook: &Handler<T>) {
    self.core.after_publish.write().retain(|h| h != hook);
  }

  /// Number of fibers with at least one handler.
  pub fn subscribed_fibers(&self) -> usize {
    self.core.fiber_count()
  }

  /// Total number of (fiber, handler) subscriptions.
  pub fn handler_count(&self) -> usize {
    self.core.handler_count()
  }
}

impl<T> Clone for Channel<T> {
  fn clone(&self) -> Self {
    Self {
      core: Arc::clone(&self.core),
    }
  }
}

impl<T> fmt::Debug for Channel<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Channel").field("core", &self.core).finish()
  }
}
