// src/channel/subscriber.rs

use super::Channel;
use crate::cancel::CancelHandle;
use crate::fiber::{Fiber, FiberCell};
use crate::handler::{Handler, HandlerId};

use futures_util::future::FutureExt;
use std::fmt;
use std::sync::Arc;

/// A (channel, fiber) pair used to install subscriptions.
///
/// Carries no state of its own. Every installer returns a [`CancelHandle`]
/// that removes what it installed.
pub struct Subscriber<T> {
  pub(super) channel: Channel<T>,
  pub(super) fiber: Fiber,
}

impl<T> Subscriber<T>
where
  T: Clone + Send + 'static,
{
  pub(super) fn new(channel: Channel<T>, fiber: Fiber) -> Self {
    Self { channel, fiber }
  }

  /// The channel this subscriber installs onto.
  pub fn channel(&self) -> &Channel<T> {
    &self.channel
  }

  /// The fiber handlers installed through this subscriber run on.
  pub fn fiber(&self) -> &Fiber {
    &self.fiber
  }

  /// Runs `handler` on the fiber for every message.
  ///
  /// Cancelling the returned handle is equivalent to calling
  /// [`unsubscribe`](Subscriber::unsubscribe) with the same handler.
  pub fn subscribe(&self, handler: &Handler<T>) -> CancelHandle {
    self.channel.subscribe(&self.fiber, handler);
    self.unsubscribe_on_cancel(handler.id())
  }

  /// Removes `handler` from this fiber's subscriptions.
  pub fn unsubscribe(&self, handler: &Handler<T>) {
    self.channel.unsubscribe(&self.fiber, handler);
  }

  pub(super) fn unsubscribe_on_cancel(&self, handler_id: HandlerId) -> CancelHandle {
    let channel = self.channel.clone();
    let fiber = self.fiber.id();
    CancelHandle::new(move || {
      channel.core.remove(fiber, handler_id);
    })
  }

  /// Runs `handler` for the first delivered message only, then unsubscribes.
  ///
  /// Cancelling before the first delivery means the handler never runs. A
  /// delivery already queued on the fiber when `cancel` is called from
  /// elsewhere still runs the handler.
  pub fn once(&self, handler: Handler<T>) -> CancelHandle {
    let id = HandlerId::next();
    let fired = Arc::new(FiberCell::new(self.fiber.clone(), false));
    let fiber = self.fiber.id();

    let wrapper = Handler::from_callback(
      id,
      Arc::new(move |channel: Channel<T>, message: T| {
        let fired = Arc::clone(&fired);
        let handler = handler.clone();
        async move {
          let first = fired.with(|fired| !std::mem::replace(fired, true))?;
          if !first {
            return Ok(());
          }
          channel.core.remove(fiber, id);
          handler.invoke(channel, message).await
        }
        .boxed()
      }),
    );

    self.channel.subscribe(&self.fiber, &wrapper);
    self.unsubscribe_on_cancel(id)
  }
}

impl<T> Clone for Subscriber<T> {
  fn clone(&self) -> Self {
    Self {
      channel: self.channel.clone(),
      fiber: self.fiber.clone(),
    }
  }
}

impl<T> fmt::Debug for Subscriber<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscriber")
      .field("channel", &self.channel.core.name)
      .field("fiber", &self.fiber)
      .finish()
  }
}
