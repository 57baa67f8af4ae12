// src/fiber/core.rs

use super::exception::{default_exception_handler, ExceptionHandler, TaskFailure};
use super::FiberId;
use crate::error::{TaskError, TaskResult};
use crate::handler::TaskOutcome;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::Id as TokioTaskId;

type Thunk = Box<dyn FnOnce() -> BoxFuture<'static, TaskResult> + Send + 'static>;

/// One pending unit of work: an optional name plus a zero-argument async action.
pub(crate) struct WorkItem {
  name: Option<Arc<str>>,
  thunk: Thunk,
}

impl WorkItem {
  pub(crate) fn new<F>(name: Option<Arc<str>>, thunk: F) -> Self
  where
    F: FnOnce() -> BoxFuture<'static, TaskResult> + Send + 'static,
  {
    Self {
      name,
      thunk: Box::new(thunk),
    }
  }

  /// Wraps a synchronous closure. The closure runs when the item is executed,
  /// not when it is created.
  pub(crate) fn from_fn<F, R>(name: Option<Arc<str>>, f: F) -> Self
  where
    F: FnOnce() -> R + Send + 'static,
    R: TaskOutcome,
  {
    Self::new(name, move || Box::pin(async move { f().into_task_result() }))
  }

  pub(crate) fn from_async<F, Fut>(name: Option<Arc<str>>, f: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: TaskOutcome,
  {
    Self::new(name, move || f().map(TaskOutcome::into_task_result).boxed())
  }

  /// Runs the item to completion, turning a panic into a `TaskError`.
  async fn execute(self) -> Result<(), TaskError> {
    let thunk = self.thunk;
    match AssertUnwindSafe(async move { thunk().await }).catch_unwind().await {
      Ok(Ok(())) => Ok(()),
      Ok(Err(error)) => Err(TaskError::Failed(error)),
      Err(payload) => Err(TaskError::from_panic(payload)),
    }
  }
}

impl fmt::Debug for WorkItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkItem").field("name", &self.name).finish_non_exhaustive()
  }
}

/// Queue state guarded by the fiber's own lock.
#[derive(Default)]
struct QueueState {
  /// Pending items. `None` while idle; created on the first enqueue and
  /// discarded by the worker once drained.
  pending: Option<VecDeque<WorkItem>>,
  /// Task id of the drain loop while it runs.
  worker: Option<TokioTaskId>,
  /// Name of the item the worker is executing right now.
  current: Option<Arc<str>>,
}

/// Shared state behind every `Fiber` handle.
pub(crate) struct FiberCore {
  pub(crate) id: FiberId,
  pub(crate) name: Arc<str>,
  runtime: Handle,
  state: Mutex<QueueState>,
  exception_handler: RwLock<Option<ExceptionHandler>>,
}

impl fmt::Debug for FiberCore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("FiberCore")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("pending", &state.pending.as_ref().map_or(0, VecDeque::len))
      .field("running", &state.worker.is_some())
      .finish()
  }
}

impl FiberCore {
  pub(crate) fn new(
    name: Arc<str>,
    runtime: Handle,
    exception_handler: Option<ExceptionHandler>,
  ) -> Self {
    Self {
      id: FiberId::next(),
      name,
      runtime,
      state: Mutex::new(QueueState::default()),
      exception_handler: RwLock::new(exception_handler),
    }
  }

  pub(crate) fn runtime(&self) -> &Handle {
    &self.runtime
  }

  /// Appends an item to the tail of the queue, starting a worker if the
  /// queue was idle. Never blocks on the item itself.
  pub(crate) fn enqueue(self: &Arc<Self>, item: WorkItem) {
    let mut state = self.state.lock();
    match state.pending.as_mut() {
      Some(pending) => {
        pending.push_back(item);
        tracing::trace!(fiber = %self.name, queued = pending.len(), "work queued");
      }
      None => {
        let mut pending = VecDeque::new();
        pending.push_back(item);
        state.pending = Some(pending);
        // Only the idle -> busy transition spawns, so at most one drain loop
        // exists per fiber.
        drop(state);
        tracing::trace!(fiber = %self.name, "work queued, starting worker");
        self.spawn_worker();
      }
    }
  }

  fn spawn_worker(self: &Arc<Self>) {
    let core = Arc::clone(self);
    self.runtime.spawn(core.drain());
  }

  /// The worker loop. Exits only when it finds the queue empty.
  async fn drain(self: Arc<Self>) {
    let mut guard = WorkerGuard::register(&self);

    loop {
      let item = {
        let mut state = self.state.lock();
        match state.pending.as_mut().and_then(VecDeque::pop_front) {
          Some(item) => {
            state.current = item.name.clone();
            item
          }
          None => {
            state.pending = None;
            state.current = None;
            state.worker = None;
            guard.disarm();
            tracing::trace!(fiber = %self.name, "queue drained, worker exiting");
            return;
          }
        }
      };

      let task_name = item.name.clone();
      if let Err(error) = item.execute().await {
        self.report(TaskFailure::new(self.id, self.name.clone(), task_name, error));
      }
    }
  }

  fn report(&self, failure: TaskFailure) {
    let handler = self
      .exception_handler
      .read()
      .clone()
      .unwrap_or_else(default_exception_handler);
    handler(&failure);
  }

  pub(crate) fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
    *self.exception_handler.write() = handler;
  }

  pub(crate) fn is_current_worker(&self) -> bool {
    match tokio::task::try_id() {
      Some(id) => self.state.lock().worker == Some(id),
      None => false,
    }
  }

  pub(crate) fn current_task_name(&self) -> Option<Arc<str>> {
    let state = self.state.lock();
    state.worker.and(state.current.clone())
  }

  pub(crate) fn queued_task_names(&self) -> Vec<Option<Arc<str>>> {
    let state = self.state.lock();
    state
      .pending
      .iter()
      .flatten()
      .map(|item| item.name.clone())
      .collect()
  }

  /// No pending queue and no worker.
  #[cfg(test)]
  pub(crate) fn is_idle(&self) -> bool {
    let state = self.state.lock();
    state.pending.is_none() && state.worker.is_none()
  }

  pub(crate) fn queue_len(&self) -> usize {
    self.state.lock().pending.as_ref().map_or(0, VecDeque::len)
  }
}

/// Records the drain loop's identity and repairs the queue state if the loop
/// dies without reaching its normal exit, e.g. when an exception handler
/// panics or the runtime drops the task.
struct WorkerGuard {
  core: Arc<FiberCore>,
  armed: bool,
}

impl WorkerGuard {
  fn register(core: &Arc<FiberCore>) -> Self {
    let id = tokio::task::try_id();
    core.state.lock().worker = id;
    tracing::trace!(fiber = %core.name, "worker started");
    Self {
      core: Arc::clone(core),
      armed: true,
    }
  }

  fn disarm(&mut self) {
    self.armed = false;
  }
}

impl Drop for WorkerGuard {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }

    let respawn = {
      let mut state = self.core.state.lock();
      state.worker = None;
      state.current = None;
      match state.pending.as_ref() {
        Some(pending) if !pending.is_empty() => true,
        _ => {
          state.pending = None;
          false
        }
      }
    };

    tracing::warn!(fiber = %self.core.name, respawn, "worker exited abnormally");
    if respawn {
      self.core.spawn_worker();
    }
  }
}
