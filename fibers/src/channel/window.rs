//! Time-windowed delivery operators.
//!
//! All four operators share one windowing scheme. The first message after an
//! idle period opens a window and arms a one-shot timer on the fiber; later
//! messages are folded into the open window; when the timer fires the window
//! is closed and its result is delivered. The window length is fixed by the
//! first message and is never extended by later ones.
//!
//! Window state lives in a [`FiberCell`] owned by the subscribing fiber: the
//! fold and the flush both run as work on that fiber, so they never overlap.
//!
//! Cancelling an operator unsubscribes it at once, but a flush that is already
//! armed still fires with whatever the window accumulated.

use super::{Channel, Subscriber};
use crate::cancel::CancelHandle;
use crate::error::BoxError;
use crate::fiber::{FiberCell, WorkItem};
use crate::handler::{Handler, HandlerId};

use futures_util::future::FutureExt;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// The fold applied to messages while a window is open.
trait Accumulator<T>: Send + 'static {
  type Output: Send + 'static;

  fn push(&mut self, message: T);

  fn finish(self) -> Self::Output;
}

/// Every message, in arrival order.
struct Batch<T>(Vec<T>);

impl<T: Send + 'static> Accumulator<T> for Batch<T> {
  type Output = Vec<T>;

  fn push(&mut self, message: T) {
    self.0.push(message);
  }

  fn finish(self) -> Vec<T> {
    self.0
  }
}

/// The latest message per key.
struct KeyedBatch<K, T, F> {
  key_fn: Arc<F>,
  entries: HashMap<K, T>,
}

impl<K, T, F> Accumulator<T> for KeyedBatch<K, T, F>
where
  K: Eq + Hash + Send + 'static,
  T: Send + 'static,
  F: Fn(&T) -> K + Send + Sync + 'static,
{
  type Output = HashMap<K, T>;

  fn push(&mut self, message: T) {
    let key = (self.key_fn)(&message);
    self.entries.insert(key, message);
  }

  fn finish(self) -> HashMap<K, T> {
    self.entries
  }
}

/// The message that opened the window; the rest are dropped.
struct Leading<T>(T);

impl<T: Send + 'static> Accumulator<T> for Leading<T> {
  type Output = T;

  fn push(&mut self, _message: T) {}

  fn finish(self) -> T {
    self.0
  }
}

/// The most recent message seen in the window.
struct Trailing<T>(T);

impl<T: Send + 'static> Accumulator<T> for Trailing<T> {
  type Output = T;

  fn push(&mut self, message: T) {
    self.0 = message;
  }

  fn finish(self) -> T {
    self.0
  }
}

impl<T> Subscriber<T>
where
  T: Clone + Send + 'static,
{
  /// Delivers messages in batches.
  ///
  /// The first message after an idle period opens a batch and arms a timer
  /// for `window`. Messages arriving in the meantime are appended in arrival
  /// order. When the timer fires the whole batch goes to `handler` and the
  /// window closes.
  pub fn batched(&self, window: Duration, handler: Handler<T, Vec<T>>) -> CancelHandle {
    self.install_window(window, |message| Batch(vec![message]), handler)
  }

  /// Delivers messages in batches keyed by `key_fn`.
  ///
  /// Windowing is the same as [`batched`](Subscriber::batched), but within a
  /// window a later message replaces an earlier one with the same key.
  pub fn keyed<K, F>(
    &self,
    window: Duration,
    key_fn: F,
    handler: Handler<T, HashMap<K, T>>,
  ) -> CancelHandle
  where
    K: Eq + Hash + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
  {
    let key_fn = Arc::new(key_fn);
    self.install_window(
      window,
      move |message| {
        let mut batch = KeyedBatch {
          key_fn: Arc::clone(&key_fn),
          entries: HashMap::new(),
        };
        batch.push(message);
        batch
      },
      handler,
    )
  }

  /// Leading-edge throttle: delivers the first message of each window and
  /// drops the others.
  pub fn first(&self, window: Duration, handler: Handler<T>) -> CancelHandle {
    self.install_window(window, Leading, handler)
  }

  /// Fixed-window debounce: delivers the most recent message when the window
  /// opened by the first message closes.
  pub fn last(&self, window: Duration, handler: Handler<T>) -> CancelHandle {
    self.install_window(window, Trailing, handler)
  }

  fn install_window<Acc, Open>(
    &self,
    window: Duration,
    open: Open,
    handler: Handler<T, Acc::Output>,
  ) -> CancelHandle
  where
    Acc: Accumulator<T>,
    Open: Fn(T) -> Acc + Send + Sync + 'static,
  {
    let id = HandlerId::next();
    let state: Arc<FiberCell<Option<Acc>>> = Arc::new(FiberCell::new(self.fiber.clone(), None));
    let fiber = self.fiber.clone();

    let wrapper = Handler::from_callback(
      id,
      Arc::new(move |channel: Channel<T>, message: T| {
        let opened = state.with(|slot| match slot {
          Some(acc) => {
            acc.push(message);
            false
          }
          None => {
            *slot = Some(open(message));
            true
          }
        });

        match opened {
          Ok(true) => {
            let flush = flush_item(Arc::clone(&state), channel, handler.clone());
            // The flush is never cancelled, so the handle is not kept.
            let _armed = fiber.schedule_item(window, flush);
          }
          Ok(false) => {}
          Err(wrong_fiber) => {
            return futures_util::future::ready(Err(BoxError::from(wrong_fiber))).boxed();
          }
        }
        futures_util::future::ready(Ok(())).boxed()
      }),
    );

    self.channel.subscribe(&self.fiber, &wrapper);
    self.unsubscribe_on_cancel(id)
  }
}

/// The work item that closes a window and delivers its result. Like fan-out
/// deliveries, it is named after the channel.
fn flush_item<T, Acc>(
  state: Arc<FiberCell<Option<Acc>>>,
  channel: Channel<T>,
  handler: Handler<T, Acc::Output>,
) -> WorkItem
where
  T: Clone + Send + 'static,
  Acc: Accumulator<T>,
{
  let name = channel.core.name.clone();
  WorkItem::new(Some(name), move || {
    async move {
      match state.with(Option::take).map_err(BoxError::from)? {
        Some(acc) => handler.invoke(channel, acc.finish()).await,
        None => Ok(()),
      }
    }
    .boxed()
  })
}
