//! Process-wide collaborators of the signal engine.
//!
//! Some failures happen after the consumer has stopped listening: a late
//! failure that lost a race against a timeout, or a cancellation hook that
//! failed after the consumer walked away. Those go to the dropped-exception
//! sink. The sink is installed at most once, at process start, with
//! [`set_dropped_exception_handler`]. Until then dropped failures are logged.

use once_cell::sync::OnceCell;

use crate::{error::Failure, log::log_warn};

type DroppedExceptionHandler = Box<dyn Fn(&Failure) + Send + Sync>;

static DROPPED_EXCEPTION_HANDLER: OnceCell<DroppedExceptionHandler> = OnceCell::new();

/// Returned when a dropped-exception handler is already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a dropped exception handler is already installed")]
pub struct HandlerAlreadyInstalled;

/// Install the process-wide sink for failures that have no live receiver.
///
/// The handler can be installed once; later calls leave the first handler in
/// place and return [`HandlerAlreadyInstalled`].
pub fn set_dropped_exception_handler<F>(handler: F) -> Result<(), HandlerAlreadyInstalled>
where
  F: Fn(&Failure) + Send + Sync + 'static,
{
  DROPPED_EXCEPTION_HANDLER.set(Box::new(handler)).map_err(|_| HandlerAlreadyInstalled)
}

/// Whether a custom sink has been installed.
pub fn has_dropped_exception_handler() -> bool { DROPPED_EXCEPTION_HANDLER.get().is_some() }

/// Report a failure that cannot be delivered to any consumer.
///
/// Never panics: a panicking handler is contained and logged.
pub fn handle_dropped_exception(failure: Failure) {
  match DROPPED_EXCEPTION_HANDLER.get() {
    Some(handler) => {
      let reported = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&failure)));
      if reported.is_err() {
        log_warn!("dropped exception handler panicked while reporting: {}", failure);
      }
    }
    None => log_warn!("dropped failure with no live receiver: {}", failure),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::DroppedFailures;

  #[rxsignal_macro::test]
  fn dropped_failures_reach_the_installed_sink() {
    let dropped = DroppedFailures::install();
    handle_dropped_exception(Failure::msg("infrastructure-unique-marker"));
    assert!(dropped.contains("infrastructure-unique-marker"));
    assert!(has_dropped_exception_handler());
  }

  #[rxsignal_macro::test]
  fn second_installation_is_refused() {
    DroppedFailures::install();
    assert_eq!(set_dropped_exception_handler(|_| {}), Err(HandlerAlreadyInstalled));
  }
}
