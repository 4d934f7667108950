//! The scheduling capability consumed by time-based operators.
//!
//! The engine never owns threads. Operators that need a timer (the deadline
//! guard) are handed a [`Scheduler`] at construction time and ask it to run a
//! task after a delay. A scheduler may refuse synchronously, for example when
//! its executor has been shut down; the operator turns that refusal into a
//! terminal failure.
//!
//! Provided schedulers:
//!
//! | Scheduler | Feature | Backing |
//! |-----------|---------|---------|
//! | [`ThreadPoolScheduler`] | `futures-scheduler` (default) | `futures` thread pool + `futures-time` sleeps |
//! | [`TokioScheduler`] | `tokio-scheduler` | the current tokio runtime |
//! | [`TestScheduler`] | always | virtual time advanced by the test |

use std::{
  sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
  },
  time::Duration,
};

use parking_lot::Mutex;

use crate::error::Failure;

pub mod test_scheduler;
#[cfg(feature = "futures-scheduler")]
mod thread_pool_scheduler;
#[cfg(feature = "tokio-scheduler")]
mod tokio_scheduler;

pub use test_scheduler::TestScheduler;
#[cfg(feature = "futures-scheduler")]
pub use thread_pool_scheduler::ThreadPoolScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use tokio_scheduler::TokioScheduler;

/// A unit of work handed to a scheduler.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task after a delay.
pub trait Scheduler: Send + Sync {
  /// Schedule `task` to run once `delay` has elapsed.
  ///
  /// # Errors
  /// Returns [`Failure::Rejected`] when the task cannot be accepted. The task
  /// is dropped without running.
  fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle, Failure>;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
  #[inline]
  fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle, Failure> {
    (**self).schedule(delay, task)
  }
}

// ==================== TaskHandle ====================

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

type CancelHook = Box<dyn FnOnce() + Send>;

struct TaskInner {
  state: AtomicU8,
  on_cancel: Mutex<Option<CancelHook>>,
}

/// Cancellable handle of a scheduled task.
///
/// A task runs only if it is started before it is cancelled; the transition
/// is a single compare-and-swap, so a cancelled task never runs and a started
/// task is never reported as cancelled.
#[derive(Clone)]
pub struct TaskHandle {
  inner: Arc<TaskInner>,
}

impl Default for TaskHandle {
  fn default() -> Self { Self::new() }
}

impl TaskHandle {
  /// A pending handle.
  pub fn new() -> Self {
    Self { inner: Arc::new(TaskInner { state: AtomicU8::new(PENDING), on_cancel: Mutex::new(None) }) }
  }

  /// A handle whose task already ran.
  pub fn finished() -> Self {
    let handle = Self::new();
    handle.inner.state.store(STARTED, Ordering::Release);
    handle
  }

  /// Cancel the task if it has not started yet.
  ///
  /// Returns `true` when this call prevented the task from running.
  pub fn cancel(&self) -> bool {
    let won = self
      .inner
      .state
      .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok();
    if won {
      let hook = self.inner.on_cancel.lock().take();
      if let Some(hook) = hook {
        hook();
      }
    }
    won
  }

  /// Run `task` unless the handle was cancelled first.
  ///
  /// Schedulers call this when the delay elapses.
  pub fn try_start(&self, task: ScheduledTask) -> bool {
    let started = self
      .inner
      .state
      .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok();
    if started {
      drop(self.inner.on_cancel.lock().take());
      task();
    }
    started
  }

  /// Register the scheduler-side release action (abort a sleeping future,
  /// drop a queued entry). Runs immediately if the handle is already
  /// cancelled.
  pub fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
    let mut slot = self.inner.on_cancel.lock();
    match self.inner.state.load(Ordering::Acquire) {
      PENDING => *slot = Some(Box::new(hook)),
      CANCELLED => {
        drop(slot);
        hook();
      }
      _ => {}
    }
  }

  pub fn is_cancelled(&self) -> bool { self.inner.state.load(Ordering::Acquire) == CANCELLED }

  pub fn is_started(&self) -> bool { self.inner.state.load(Ordering::Acquire) == STARTED }

  pub fn is_pending(&self) -> bool { self.inner.state.load(Ordering::Acquire) == PENDING }
}

impl std::fmt::Debug for TaskHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = match self.inner.state.load(Ordering::Acquire) {
      PENDING => "pending",
      STARTED => "started",
      _ => "cancelled",
    };
    f.debug_struct("TaskHandle").field("state", &state).finish()
  }
}
