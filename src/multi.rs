//! The credit-based multi-result protocol.
//!
//! A [`Multi`] delivers to each [`MultiSubscriber`] one subscription handle,
//! then at most as many items as the subscriber has requested, then at most
//! one of `on_error` / `on_complete`. The subscriber may cancel at any time.

use std::sync::Arc;

use crate::{
  error::{Failure, Result},
  ops::on_signal::{OnSignalOp, SignalHooks},
  subscription::SubscriptionHandle,
};

/// Receiver of multi-result signals.
pub trait MultiSubscriber<T>: Send + Sync {
  fn on_subscribe(&self, subscription: SubscriptionHandle);

  fn on_next(&self, item: T);

  fn on_error(&self, failure: Failure);

  fn on_complete(&self);
}

/// Shared multi-result subscriber.
pub type MultiSubscriberHandle<T> = Arc<dyn MultiSubscriber<T>>;

/// A lazy producer of a demand-driven sequence.
pub trait Multi<T>: Send + Sync {
  fn subscribe(&self, subscriber: MultiSubscriberHandle<T>);
}

impl<T, M: Multi<T> + ?Sized> Multi<T> for Arc<M> {
  #[inline]
  fn subscribe(&self, subscriber: MultiSubscriberHandle<T>) { (**self).subscribe(subscriber) }
}

impl<T, M: Multi<T> + ?Sized> Multi<T> for Box<M> {
  #[inline]
  fn subscribe(&self, subscriber: MultiSubscriberHandle<T>) { (**self).subscribe(subscriber) }
}

impl<T, S: MultiSubscriber<T> + ?Sized> MultiSubscriber<T> for Arc<S> {
  #[inline]
  fn on_subscribe(&self, subscription: SubscriptionHandle) { (**self).on_subscribe(subscription) }

  #[inline]
  fn on_next(&self, item: T) { (**self).on_next(item) }

  #[inline]
  fn on_error(&self, failure: Failure) { (**self).on_error(failure) }

  #[inline]
  fn on_complete(&self) { (**self).on_complete() }
}

/// Operators available on every [`Multi`].
///
/// The single-hook methods are shorthands for [`on_signal`](Self::on_signal)
/// with one observer set.
pub trait MultiExt<T>: Multi<T> + Sized {
  /// Observe every signal with the hooks in `hooks`.
  fn on_signal(self, hooks: SignalHooks<T>) -> OnSignalOp<Self, T> { OnSignalOp::new(self, hooks) }

  fn on_subscription_invoke<F>(self, hook: F) -> OnSignalOp<Self, T>
  where
    F: Fn(&SubscriptionHandle) -> Result<()> + Send + Sync + 'static,
  {
    self.on_signal(SignalHooks::new().on_subscription(hook))
  }

  fn on_item_invoke<F>(self, hook: F) -> OnSignalOp<Self, T>
  where
    F: Fn(&T) -> Result<()> + Send + Sync + 'static,
  {
    self.on_signal(SignalHooks::new().on_item(hook))
  }

  fn on_failure_invoke<F>(self, hook: F) -> OnSignalOp<Self, T>
  where
    F: Fn(&Failure) -> Result<()> + Send + Sync + 'static,
  {
    self.on_signal(SignalHooks::new().on_failure(hook))
  }

  fn on_completion_invoke<F>(self, hook: F) -> OnSignalOp<Self, T>
  where
    F: Fn() -> Result<()> + Send + Sync + 'static,
  {
    self.on_signal(SignalHooks::new().on_completion(hook))
  }

  /// Runs after the terminal signal has been forwarded. Its failure is
  /// logged and otherwise ignored.
  fn on_termination_invoke<F>(self, hook: F) -> OnSignalOp<Self, T>
  where
    F: Fn() -> Result<()> + Send + Sync + 'static,
  {
    self.on_signal(SignalHooks::new().on_termination(hook))
  }

  /// Runs when the downstream cancels. A failing hook fails the flow instead
  /// of cancelling it.
  fn on_cancellation_invoke<F>(self, hook: F) -> OnSignalOp<Self, T>
  where
    F: Fn() -> Result<()> + Send + Sync + 'static,
  {
    self.on_signal(SignalHooks::new().on_cancellation(hook))
  }
}

impl<T, M: Multi<T>> MultiExt<T> for M {}
