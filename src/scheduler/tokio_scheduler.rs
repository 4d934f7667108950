use std::time::Duration;

use tokio::runtime::Handle;

use super::{ScheduledTask, Scheduler, TaskHandle};
use crate::{error::Failure, log::log_debug};

/// Runs delayed tasks on a tokio runtime.
///
/// Without an explicit runtime handle the scheduler uses the runtime of the
/// calling thread, and rejects the task when there is none.
#[derive(Clone, Default)]
pub struct TokioScheduler {
  runtime: Option<Handle>,
}

impl TokioScheduler {
  /// Schedule on whatever runtime the caller is running in.
  pub fn current() -> Self { Self::default() }

  /// Schedule on a specific runtime.
  pub fn with_handle(runtime: Handle) -> Self { Self { runtime: Some(runtime) } }
}

impl Scheduler for TokioScheduler {
  fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle, Failure> {
    let runtime = match &self.runtime {
      Some(runtime) => runtime.clone(),
      None => Handle::try_current().map_err(|err| {
        log_debug!("no tokio runtime to schedule on: {}", err);
        Failure::Rejected(err.to_string())
      })?,
    };
    let handle = TaskHandle::new();
    let c_handle = handle.clone();
    let join = runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      c_handle.try_start(task);
    });
    handle.set_cancel_hook(move || join.abort());
    Ok(handle)
  }
}
