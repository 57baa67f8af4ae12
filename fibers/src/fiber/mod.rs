//! Fibers: named, strictly serialized execution contexts.
//!
//! A fiber owns a FIFO queue of work items drained by a single background
//! task on a tokio runtime. At most one item executes per fiber at any
//! instant, so state touched only from a fiber's work needs no lock. Distinct
//! fibers run concurrently with each other.
//!
//! ## Behavior
//!
//! - **Non-blocking enqueue**: `queue_to_run` appends and returns. It never
//!   waits for the work, and may be called from any thread.
//! - **FIFO**: items queued directly run in the order they were queued.
//!   Scheduled items join the same FIFO when their timer fires.
//! - **Failure isolation**: an item that returns `Err` or panics is reported
//!   to the fiber's exception handler; the fiber moves on to the next item.
//! - **Locked calls**: [`Fiber::lock`] runs a closure on the fiber and hands
//!   its result (or failure) back to the awaiting caller.
//!
//! # Examples
//!
//! ```
//! use fibre_fibers::Fiber;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! tokio::runtime::Runtime::new().unwrap().block_on(async {
//!   let fiber = Fiber::new("counter");
//!   let hits = Arc::new(AtomicUsize::new(0));
//!
//!   for _ in 0..3 {
//!     let hits = hits.clone();
//!     fiber.queue_to_run(move || {
//!       hits.fetch_add(1, Ordering::SeqCst);
//!     });
//!   }
//!
//!   let total = fiber.lock({
//!     let hits = hits.clone();
//!     move || hits.load(Ordering::SeqCst)
//!   }).await.unwrap();
//!   assert_eq!(total, 3);
//! });
//! ```

mod cell;
mod core;
mod exception;
#[cfg(test)]
mod tests;

pub(crate) use self::cell::FiberCell;
pub(crate) use self::core::WorkItem;
pub use self::exception::{
  default_exception_handler, reset_default_exception_handler, set_default_exception_handler,
  ExceptionHandler, TaskFailure,
};

use self::core::FiberCore;
use crate::cancel::CancelHandle;
use crate::error::{BuildError, TaskError, WrongFiberError};
use crate::handler::TaskOutcome;
use crate::timer;

use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
  fn next() -> Self {
    FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for FiberId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "fiber-{}", self.0)
  }
}

/// A handle to a fiber. Cheap to clone; all clones drive the same queue.
///
/// The fiber lives as long as any handle (or any queued or scheduled work)
/// refers to it. There is no explicit shutdown: stop enqueueing and drop the
/// handles.
#[derive(Clone)]
pub struct Fiber {
  core: Arc<FiberCore>,
}

impl Fiber {
  /// Creates a fiber on the ambient tokio runtime.
  ///
  /// # Panics
  ///
  /// Panics when called outside a tokio runtime. Use [`Fiber::builder`] with
  /// [`FiberBuilder::runtime`] to create fibers from other threads.
  pub fn new(name: impl Into<String>) -> Self {
    Self::from_parts(name.into(), Handle::current(), None)
  }

  /// Starts configuring a fiber.
  pub fn builder(name: impl Into<String>) -> FiberBuilder {
    FiberBuilder {
      name: name.into(),
      runtime: None,
      exception_handler: None,
    }
  }

  fn from_parts(name: String, runtime: Handle, handler: Option<ExceptionHandler>) -> Self {
    let core = FiberCore::new(Arc::from(name), runtime, handler);
    tracing::debug!(fiber = %core.name, id = %core.id, "fiber created");
    Self {
      core: Arc::new(core),
    }
  }

  /// The fiber's name, used in diagnostics and errors.
  pub fn name(&self) -> &str {
    &self.core.name
  }

  /// The fiber's process-unique id.
  pub fn id(&self) -> FiberId {
    self.core.id
  }

  // --- Queueing ---

  /// Queues a closure to run on the fiber.
  ///
  /// Returns immediately. If the closure returns `Err` or panics, the failure
  /// goes to the exception handler; it is never seen by the caller.
  pub fn queue_to_run<F, R>(&self, f: F)
  where
    F: FnOnce() -> R + Send + 'static,
    R: TaskOutcome,
  {
    self.core.enqueue(WorkItem::from_fn(None, f));
  }

  /// Queues an asynchronous closure to run on the fiber.
  ///
  /// The fiber awaits the returned future before it starts the next item.
  pub fn queue_to_run_async<F, Fut>(&self, f: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: TaskOutcome,
  {
    self.core.enqueue(WorkItem::from_async(None, f));
  }

  /// Like [`queue_to_run`](Fiber::queue_to_run), tagging the item with a name
  /// visible through [`current_task_name`](Fiber::current_task_name),
  /// [`queued_task_names`](Fiber::queued_task_names) and failure reports.
  pub fn queue_named<F, R>(&self, name: impl Into<Arc<str>>, f: F)
  where
    F: FnOnce() -> R + Send + 'static,
    R: TaskOutcome,
  {
    self.core.enqueue(WorkItem::from_fn(Some(name.into()), f));
  }

  /// Named form of [`queue_to_run_async`](Fiber::queue_to_run_async).
  pub fn queue_named_async<F, Fut>(&self, name: impl Into<Arc<str>>, f: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: TaskOutcome,
  {
    self.core.enqueue(WorkItem::from_async(Some(name.into()), f));
  }

  pub(crate) fn enqueue(&self, item: WorkItem) {
    self.core.enqueue(item);
  }

  // --- Scheduling ---

  /// Queues `f` onto the fiber once `delay` has elapsed.
  ///
  /// Cancelling the returned handle before the item is handed to the fiber
  /// prevents it from ever running. Cancelling afterwards has no effect.
  pub fn schedule_once<F, R>(&self, delay: Duration, f: F) -> CancelHandle
  where
    F: FnOnce() -> R + Send + 'static,
    R: TaskOutcome,
  {
    self.schedule_item(delay, WorkItem::from_fn(None, f))
  }

  /// Asynchronous form of [`schedule_once`](Fiber::schedule_once).
  pub fn schedule_once_async<F, Fut>(&self, delay: Duration, f: F) -> CancelHandle
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: TaskOutcome,
  {
    self.schedule_item(delay, WorkItem::from_async(None, f))
  }

  pub(crate) fn schedule_item(&self, delay: Duration, item: WorkItem) -> CancelHandle {
    let fiber = self.clone();
    timer::once(self.core.runtime(), delay, move || fiber.enqueue(item))
  }

  /// Queues `f` onto the fiber repeatedly: first after `initial_delay` (or
  /// `interval` when `None`), then every `interval` until cancelled.
  ///
  /// Cancellation is checked before every firing; at most one firing that
  /// was already past its check can still land after `cancel` returns.
  ///
  /// # Panics
  ///
  /// Panics if `interval` is zero.
  pub fn schedule_on_interval<F, R>(
    &self,
    initial_delay: Option<Duration>,
    interval: Duration,
    f: F,
  ) -> CancelHandle
  where
    F: Fn() -> R + Send + Sync + 'static,
    R: TaskOutcome,
  {
    let f = Arc::new(f);
    let fiber = self.clone();
    timer::repeating(self.core.runtime(), initial_delay, interval, move || {
      let f = Arc::clone(&f);
      fiber.enqueue(WorkItem::from_fn(None, move || f()));
    })
  }

  /// Asynchronous form of [`schedule_on_interval`](Fiber::schedule_on_interval).
  ///
  /// # Panics
  ///
  /// Panics if `interval` is zero.
  pub fn schedule_on_interval_async<F, Fut>(
    &self,
    initial_delay: Option<Duration>,
    interval: Duration,
    f: F,
  ) -> CancelHandle
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: TaskOutcome,
  {
    let f = Arc::new(f);
    let fiber = self.clone();
    timer::repeating(self.core.runtime(), initial_delay, interval, move || {
      let f = Arc::clone(&f);
      fiber.enqueue(WorkItem::from_async(None, move || f()));
    })
  }

  // --- Locked calls ---

  /// Runs `f` on the fiber and resolves with its return value.
  ///
  /// The item is queued immediately, so it keeps its place relative to other
  /// queued work even if the returned future is polled later. A panic in `f`
  /// is delivered as `Err(TaskError::Panicked)` to the caller and is not
  /// reported to the exception handler.
  ///
  /// Awaiting a locked call from work already running on the same fiber
  /// never resolves: the call is queued behind the awaiting item.
  pub fn lock<F, T>(&self, f: F) -> impl Future<Output = Result<T, TaskError>> + Send + 'static
  where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
  {
    self.lock_async(move || std::future::ready(f()))
  }

  /// Runs the future produced by `f` on the fiber and resolves with its output.
  pub fn lock_async<F, Fut, T>(
    &self,
    f: F,
  ) -> impl Future<Output = Result<T, TaskError>> + Send + 'static
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
  {
    let (tx, rx) = oneshot::channel();

    self.core.enqueue(WorkItem::from_async(None, move || async move {
      let outcome = AssertUnwindSafe(async move { f().await })
        .catch_unwind()
        .await
        .map_err(TaskError::from_panic);
      // The caller may have stopped waiting; that is not a failure of the task.
      let _ = tx.send(outcome);
    }));

    async move { rx.await.unwrap_or(Err(TaskError::Abandoned)) }
  }

  /// Resolves once every item queued before this call has run.
  pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
    let locked = self.lock(|| ());
    async move {
      let _ = locked.await;
    }
  }

  // --- Confinement ---

  /// Returns `true` when the caller is the work currently executing on this fiber.
  ///
  /// Tasks spawned from inside fiber work are separate executions and are
  /// not on the fiber.
  pub fn is_on_fiber(&self) -> bool {
    self.core.is_current_worker()
  }

  /// Fails with [`WrongFiberError`] unless the caller is executing on this fiber.
  pub fn assert_on_fiber(&self) -> Result<(), WrongFiberError> {
    if self.is_on_fiber() {
      Ok(())
    } else {
      Err(WrongFiberError::new(self.core.id, &self.core.name))
    }
  }

  // --- Exception handling ---

  /// Sets the handler for failures of work executed on this fiber.
  pub fn set_exception_handler<F>(&self, handler: F)
  where
    F: Fn(&TaskFailure) + Send + Sync + 'static,
  {
    self.core.set_exception_handler(Some(Arc::new(handler)));
  }

  /// Removes the fiber's own handler so failures go to the process-wide default.
  pub fn clear_exception_handler(&self) {
    self.core.set_exception_handler(None);
  }

  // --- Introspection ---

  /// Name of the item executing right now, if any and if it was named.
  pub fn current_task_name(&self) -> Option<String> {
    self.core.current_task_name().map(|name| name.to_string())
  }

  /// Names of the pending items in queue order; unnamed items are `None`.
  pub fn queued_task_names(&self) -> Vec<Option<String>> {
    self
      .core
      .queued_task_names()
      .into_iter()
      .map(|name| name.map(|n| n.to_string()))
      .collect()
  }

  /// Number of items waiting to run, not counting the one executing.
  pub fn queue_len(&self) -> usize {
    self.core.queue_len()
  }
}

impl PartialEq for Fiber {
  fn eq(&self, other: &Self) -> bool {
    self.core.id == other.core.id
  }
}

impl Eq for Fiber {}

impl fmt::Debug for Fiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Fiber")
      .field("id", &self.core.id)
      .field("name", &self.core.name)
      .field("queued", &self.core.queue_len())
      .finish()
  }
}

/// Configures and creates a [`Fiber`].
pub struct FiberBuilder {
  name: String,
  runtime: Option<Handle>,
  exception_handler: Option<ExceptionHandler>,
}

impl FiberBuilder {
  /// Runs the fiber on the given runtime instead of the ambient one.
  pub fn runtime(mut self, handle: Handle) -> Self {
    self.runtime = Some(handle);
    self
  }

  /// Sets the fiber's own exception handler.
  pub fn exception_handler<F>(mut self, handler: F) -> Self
  where
    F: Fn(&TaskFailure) + Send + Sync + 'static,
  {
    self.exception_handler = Some(Arc::new(handler));
    self
  }

  /// Creates the fiber.
  ///
  /// # Errors
  ///
  /// - `Err(BuildError::NoRuntime)`: no runtime handle was given and the
  ///   caller is not inside a tokio runtime.
  pub fn build(self) -> Result<Fiber, BuildError> {
    let runtime = match self.runtime {
      Some(handle) => handle,
      None => Handle::try_current().map_err(|_| BuildError::NoRuntime(self.name.clone()))?,
    };
    Ok(Fiber::from_parts(self.name, runtime, self.exception_handler))
  }
}

impl fmt::Debug for FiberBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FiberBuilder")
      .field("name", &self.name)
      .field("has_runtime", &self.runtime.is_some())
      .field("has_exception_handler", &self.exception_handler.is_some())
      .finish()
  }
}
