// src/channel/core.rs

use crate::fiber::{Fiber, FiberId};
use crate::handler::{Handler, HandlerId};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The handlers one fiber has registered on a channel.
pub(crate) struct FiberSubscriptions<T> {
  pub(crate) fiber: Fiber,
  pub(crate) handlers: Vec<Handler<T>>,
}

/// State shared by every handle to one channel.
pub(crate) struct ChannelCore<T> {
  pub(crate) name: Arc<str>,
  /// fiber -> handlers. A fiber whose handler list becomes empty is removed.
  pub(crate) subscriptions: Mutex<HashMap<FiberId, FiberSubscriptions<T>>>,
  pub(crate) before_publish: RwLock<Vec<Handler<T>>>,
  pub(crate) after_publish: RwLock<Vec<Handler<T>>>,
}

impl<T> ChannelCore<T> {
  pub(crate) fn new(name: Arc<str>) -> Self {
    Self {
      name,
      subscriptions: Mutex::new(HashMap::new()),
      before_publish: RwLock::new(Vec::new()),
      after_publish: RwLock::new(Vec::new()),
    }
  }

  /// Adds `handler` for `fiber`. Returns `false` if the pair was already present.
  pub(crate) fn insert(&self, fiber: &Fiber, handler: &Handler<T>) -> bool {
    let mut subscriptions = self.subscriptions.lock();
    let entry = subscriptions
      .entry(fiber.id())
      .or_insert_with(|| FiberSubscriptions {
        fiber: fiber.clone(),
        handlers: Vec::new(),
      });

    if entry.handlers.iter().any(|h| h.id() == handler.id()) {
      return false;
    }
    entry.handlers.push(handler.clone());
    true
  }

  /// Removes the handler with `handler_id` for `fiber`, pruning the fiber when
  /// it has nothing left. Returns `false` if nothing was removed.
  pub(crate) fn remove(&self, fiber: FiberId, handler_id: HandlerId) -> bool {
    let mut subscriptions = self.subscriptions.lock();
    let Some(entry) = subscriptions.get_mut(&fiber) else {
      return false;
    };

    let before = entry.handlers.len();
    entry.handlers.retain(|h| h.id() != handler_id);
    let removed = entry.handlers.len() != before;

    if entry.handlers.is_empty() {
      subscriptions.remove(&fiber);
    }
    removed
  }

  pub(crate) fn fiber_count(&self) -> usize {
    self.subscriptions.lock().len()
  }

  pub(crate) fn handler_count(&self) -> usize {
    self
      .subscriptions
      .lock()
      .values()
      .map(|subs| subs.handlers.len())
      .sum()
  }
}

impl<T> fmt::Debug for ChannelCore<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChannelCore")
      .field("name", &self.name)
      .field("fibers", &self.fiber_count())
      .field("before_publish", &self.before_publish.read().len())
      .field("after_publish", &self.after_publish.read().len())
      .finish()
  }
}
