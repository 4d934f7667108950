use std::sync::Arc;

use parking_lot::Mutex;

use super::UniSubscriber;
use crate::{
  error::Failure,
  subscription::{Latch, SubscriptionSlot, TerminalGuard, UniSubscription, UniSubscriptionHandle},
};

type ItemCallback<T> = Box<dyn FnOnce(T) + Send>;
type FailureCallback = Box<dyn FnOnce(Failure) + Send>;

/// A subscriber that forwards the outcome to a pair of closures.
///
/// It doubles as the subscription handle given back to the caller: cancelling
/// it latches the same guard the outcome goes through, so a cancelled
/// subscriber never sees a callback.
pub struct CallbackSubscriber<T> {
  guard: TerminalGuard,
  upstream: SubscriptionSlot<dyn UniSubscription>,
  on_item: Mutex<Option<ItemCallback<T>>>,
  on_failure: Mutex<Option<FailureCallback>>,
}

impl<T> CallbackSubscriber<T> {
  pub fn new<I, E>(on_item: I, on_failure: E) -> Arc<Self>
  where
    I: FnOnce(T) + Send + 'static,
    E: FnOnce(Failure) + Send + 'static,
  {
    Arc::new(Self {
      guard: TerminalGuard::new(),
      upstream: SubscriptionSlot::new(),
      on_item: Mutex::new(Some(Box::new(on_item))),
      on_failure: Mutex::new(Some(Box::new(on_failure))),
    })
  }

  /// Whether the outcome was delivered or the subscription cancelled.
  pub fn is_done(&self) -> bool { self.guard.is_terminated() }

  fn release_callbacks(&self) {
    drop(self.on_item.lock().take());
    drop(self.on_failure.lock().take());
  }
}

impl<T: Send> UniSubscriber<T> for CallbackSubscriber<T> {
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) {
    if self.guard.is_terminated() {
      // Already cancelled, or resolved before the acknowledgment arrived.
      subscription.cancel();
      return;
    }
    if !self.upstream.install(subscription.clone()) {
      subscription.cancel();
    }
  }

  fn on_item(&self, item: T) {
    if self.guard.try_terminate() {
      self.upstream.latch();
      let callback = self.on_item.lock().take();
      drop(self.on_failure.lock().take());
      if let Some(callback) = callback {
        callback(item);
      }
    }
  }

  fn on_failure(&self, failure: Failure) {
    if self.guard.try_terminate() {
      self.upstream.latch();
      let callback = self.on_failure.lock().take();
      drop(self.on_item.lock().take());
      if let Some(callback) = callback {
        callback(failure);
      }
    }
  }
}

impl<T: Send> UniSubscription for CallbackSubscriber<T> {
  fn cancel(&self) {
    if self.guard.try_terminate() {
      self.release_callbacks();
      if let Latch::Won(Some(upstream)) = self.upstream.latch() {
        upstream.cancel();
      }
    }
  }
}
