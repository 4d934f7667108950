use std::sync::atomic::{AtomicBool, Ordering};

/// Latch enforcing "exactly one terminal signal, ever".
///
/// Operators with competing completion sources (a timer against a natural
/// result, a cancellation against an item) route every terminal transition
/// through one guard and only act when [`try_terminate`](Self::try_terminate)
/// returns `true`.
#[derive(Debug, Default)]
pub struct TerminalGuard {
  terminated: AtomicBool,
}

impl TerminalGuard {
  pub const fn new() -> Self { Self { terminated: AtomicBool::new(false) } }

  /// Returns `true` for exactly one caller over the lifetime of the guard.
  #[inline]
  pub fn try_terminate(&self) -> bool {
    self
      .terminated
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  #[inline]
  pub fn is_terminated(&self) -> bool { self.terminated.load(Ordering::Acquire) }
}
