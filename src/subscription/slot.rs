use std::sync::{
  atomic::{AtomicU8, Ordering},
  Arc,
};

use once_cell::sync::OnceCell;

const EMPTY: u8 = 0;
const INSTALLING: u8 = 1;
const SET: u8 = 2;
const CANCELLED: u8 = 3;

/// Outcome of [`SubscriptionSlot::latch`].
pub enum Latch<S: ?Sized> {
  /// This caller moved the slot to the cancelled sentinel. Carries the
  /// installed subscription, if one had been installed.
  Won(Option<Arc<S>>),
  /// The slot was already cancelled.
  Lost,
}

/// Single-assignment holder of an upstream subscription with a "cancelled"
/// sentinel.
///
/// `install` succeeds at most once. `latch` swaps the slot to the sentinel;
/// only the first latch observes the installed subscription, so the
/// subscription is released exactly once however installs, latches and
/// terminal signals interleave. An install that loses against a latch cancels
/// the subscription itself.
pub struct SubscriptionSlot<S: ?Sized> {
  state: AtomicU8,
  subscription: OnceCell<Arc<S>>,
}

impl<S: ?Sized> Default for SubscriptionSlot<S> {
  fn default() -> Self { Self::new() }
}

impl<S: ?Sized> SubscriptionSlot<S> {
  pub fn new() -> Self { Self { state: AtomicU8::new(EMPTY), subscription: OnceCell::new() } }

  /// Install `subscription` unless the slot is already set or cancelled.
  ///
  /// Returns `false` when the subscription was not installed; the caller owns
  /// it and must cancel it.
  pub fn install(&self, subscription: Arc<S>) -> bool {
    if self
      .state
      .compare_exchange(EMPTY, INSTALLING, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return false;
    }
    let _ = self.subscription.set(subscription);
    // A latch that ran while we were installing returned `Won(None)`, so the
    // release is ours.
    self
      .state
      .compare_exchange(INSTALLING, SET, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// The installed subscription, unless the slot was cancelled.
  pub fn current(&self) -> Option<&Arc<S>> {
    if self.state.load(Ordering::Acquire) == SET { self.subscription.get() } else { None }
  }

  /// Swap the slot to the cancelled sentinel.
  pub fn latch(&self) -> Latch<S> {
    match self.state.swap(CANCELLED, Ordering::AcqRel) {
      CANCELLED => Latch::Lost,
      SET => Latch::Won(self.subscription.get().cloned()),
      _ => Latch::Won(None),
    }
  }

  pub fn is_cancelled(&self) -> bool { self.state.load(Ordering::Acquire) == CANCELLED }
}
