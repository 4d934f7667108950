//! Test Scheduler for deterministic testing of time-based operators.
//!
//! Provides virtual time that only advances when explicitly instructed,
//! enabling deterministic testing of deadlines and timer races.
//!
//! # Features
//!
//! - **Virtual Time**: Simulated time that only advances when explicitly
//!   instructed
//! - **Synchronous Execution**: Tasks execute on the calling thread when time
//!   is advanced
//! - **Rejection Injection**: [`TestScheduler::reject_next`] makes the next
//!   `schedule` call fail, to exercise the rejection path of operators
//!
//! # Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rxsignal::scheduler::{Scheduler, TestScheduler};
//!
//! let scheduler = TestScheduler::new();
//! let handle = scheduler
//!   .schedule(Duration::from_millis(100), Box::new(|| println!("fired")))
//!   .unwrap();
//!
//! scheduler.advance_by(Duration::from_millis(99));
//! assert!(handle.is_pending());
//!
//! scheduler.advance_by(Duration::from_millis(1));
//! assert!(handle.is_started());
//! ```
//!
//! # Thread Safety
//!
//! Clones share one virtual clock and one task queue, so a scheduler handed
//! to an operator can be driven from the test body. Tasks run outside the
//! internal lock and may schedule further tasks.

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc, time::Duration};

use parking_lot::Mutex;

use super::{ScheduledTask, Scheduler, TaskHandle};
use crate::error::Failure;

// ==================== Internal State ====================

#[derive(Default)]
struct TestSchedulerState {
  virtual_time: Duration,
  task_queue: BinaryHeap<QueuedTask>,
  next_task_id: usize,
  reject_next: Option<String>,
}

struct QueuedTask {
  scheduled_time: Duration,
  task_id: usize,
  task: ScheduledTask,
  handle: TaskHandle,
}

impl PartialEq for QueuedTask {
  fn eq(&self, other: &Self) -> bool {
    self.scheduled_time == other.scheduled_time && self.task_id == other.task_id
  }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for QueuedTask {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier times first, then FIFO by task_id
    other
      .scheduled_time
      .cmp(&self.scheduled_time)
      .then_with(|| other.task_id.cmp(&self.task_id))
  }
}

// ==================== TestScheduler ====================

/// A virtual time scheduler for deterministic testing.
#[derive(Clone, Default)]
pub struct TestScheduler {
  state: Arc<Mutex<TestSchedulerState>>,
}

impl TestScheduler {
  /// A scheduler at virtual time zero with an empty queue.
  pub fn new() -> Self { Self::default() }

  /// Get the current virtual time.
  pub fn now(&self) -> Duration { self.state.lock().virtual_time }

  /// Number of queued tasks that have not been cancelled.
  pub fn pending_count(&self) -> usize {
    self
      .state
      .lock()
      .task_queue
      .iter()
      .filter(|queued| queued.handle.is_pending())
      .count()
  }

  /// Make the next call to `schedule` fail with [`Failure::Rejected`].
  pub fn reject_next(&self, reason: impl Into<String>) {
    self.state.lock().reject_next = Some(reason.into());
  }

  /// Advance virtual time by `duration`, running every task that becomes due
  /// in schedule order.
  pub fn advance_by(&self, duration: Duration) {
    let target = self.now() + duration;
    while let Some(queued) = self.pop_due(Some(target)) {
      queued.handle.try_start(queued.task);
    }
    let mut state = self.state.lock();
    if state.virtual_time < target {
      state.virtual_time = target;
    }
  }

  /// Run every queued task, advancing virtual time to each due time.
  pub fn flush(&self) {
    while let Some(queued) = self.pop_due(None) {
      queued.handle.try_start(queued.task);
    }
  }

  fn pop_due(&self, limit: Option<Duration>) -> Option<QueuedTask> {
    let mut state = self.state.lock();
    let due = state
      .task_queue
      .peek()
      .is_some_and(|next| limit.is_none_or(|limit| next.scheduled_time <= limit));
    if !due {
      return None;
    }
    let queued = state.task_queue.pop()?;
    if queued.scheduled_time > state.virtual_time {
      state.virtual_time = queued.scheduled_time;
    }
    Some(queued)
  }
}

impl Scheduler for TestScheduler {
  fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle, Failure> {
    let mut state = self.state.lock();
    if let Some(reason) = state.reject_next.take() {
      return Err(Failure::Rejected(reason));
    }
    let handle = TaskHandle::new();
    let task_id = state.next_task_id;
    state.next_task_id += 1;
    let scheduled_time = state.virtual_time + delay;
    state
      .task_queue
      .push(QueuedTask { scheduled_time, task_id, task, handle: handle.clone() });
    Ok(handle)
  }
}
