use std::time::Duration;

use futures::{executor::ThreadPool, future::abortable, task::SpawnExt};
use once_cell::sync::Lazy;

use super::{ScheduledTask, Scheduler, TaskHandle};
use crate::{error::Failure, log::log_debug};

static DEFAULT_POOL: Lazy<Result<ThreadPool, String>> =
  Lazy::new(|| ThreadPool::new().map_err(|err| err.to_string()));

/// Runs delayed tasks on a `futures` thread pool.
///
/// The delay is a `futures-time` sleep; cancelling the returned handle aborts
/// the sleep so no worker is held by a timer that will never fire.
#[derive(Clone)]
pub struct ThreadPoolScheduler {
  pool: ThreadPool,
}

impl ThreadPoolScheduler {
  /// A scheduler on the process-wide default pool.
  ///
  /// # Errors
  /// Returns [`Failure::Rejected`] if the default pool could not be created.
  pub fn shared() -> Result<Self, Failure> {
    match &*DEFAULT_POOL {
      Ok(pool) => Ok(Self { pool: pool.clone() }),
      Err(reason) => Err(Failure::Rejected(reason.clone())),
    }
  }

  /// A scheduler on a caller-provided pool.
  pub fn with_pool(pool: ThreadPool) -> Self { Self { pool } }
}

impl Scheduler for ThreadPoolScheduler {
  fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle, Failure> {
    let handle = TaskHandle::new();
    let (sleep, abort) = abortable(futures_time::task::sleep(futures_time::time::Duration::from(delay)));
    let c_handle = handle.clone();
    self
      .pool
      .spawn(async move {
        if sleep.await.is_ok() {
          c_handle.try_start(task);
        }
      })
      .map_err(|err| {
        log_debug!("thread pool refused a timer task: {}", err);
        Failure::Rejected(err.to_string())
      })?;
    handle.set_cancel_hook(move || abort.abort());
    Ok(handle)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
  };

  use super::*;

  #[rxsignal_macro::test]
  fn runs_after_the_delay() {
    let scheduler = ThreadPoolScheduler::shared().unwrap();
    let (tx, rx) = mpsc::channel();
    let handle = scheduler
      .schedule(
        Duration::from_millis(5),
        Box::new(move || {
          let _ = tx.send(());
        }),
      )
      .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(handle.is_started());
  }

  #[rxsignal_macro::test]
  fn cancelled_timer_never_fires() {
    let scheduler = ThreadPoolScheduler::shared().unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    let c_fired = fired.clone();
    let handle = scheduler
      .schedule(Duration::from_millis(20), Box::new(move || c_fired.store(true, Ordering::SeqCst)))
      .unwrap();
    assert!(handle.cancel());
    std::thread::sleep(Duration::from_millis(60));
    assert!(!fired.load(Ordering::SeqCst));
  }
}
