//! The single-result protocol.
//!
//! A [`Uni`] hands each [`UniSubscriber`] exactly one subscription handle and
//! then at most one terminal signal: an item or a failure. Signals may arrive
//! on any thread, including before `on_subscribe` has returned to the
//! producer.
//!
//! Operators are attached with the [`UniExt`] extension trait:
//!
//! ```rust
//! use std::sync::{
//!   atomic::{AtomicUsize, Ordering},
//!   Arc,
//! };
//!
//! use rxsignal::prelude::*;
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let c_calls = calls.clone();
//! let cached = uni::deferred(move || Ok(c_calls.fetch_add(1, Ordering::SeqCst) + 1)).memoize();
//!
//! let first = Arc::new(std::sync::Mutex::new(None));
//! let second = first.clone();
//! cached.subscribe_with(move |v| *first.lock().unwrap() = Some(v), |_| {});
//! cached.subscribe_with(move |v| assert_eq!(Some(v), *second.lock().unwrap()), |_| {});
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```

use std::{sync::Arc, time::Duration};

use crate::{
  error::{Failure, Result},
  ops::{
    fail_on_timeout::{FailOnTimeoutOp, FailureSupplier},
    memoize::Memoize, on_cancellation_call::OnCancellationCallOp,
    on_subscribe_invoke::OnSubscribeInvokeOp, to_multi::UniToMulti,
  },
  scheduler::Scheduler,
  subscription::UniSubscriptionHandle,
};

mod callback;
mod create;

pub use callback::CallbackSubscriber;
pub use create::{
  deferred, emitter, failure, item, never, Deferred, EmitterUni, FailureUni, ItemUni, Never,
  UniEmitter,
};

/// Receiver of single-result signals.
pub trait UniSubscriber<T>: Send + Sync {
  /// The subscription was established. Always the first signal.
  fn on_subscribe(&self, subscription: UniSubscriptionHandle);

  /// The producer resolved with a value.
  fn on_item(&self, item: T);

  /// The producer failed.
  fn on_failure(&self, failure: Failure);
}

/// Shared single-result subscriber.
pub type UniSubscriberHandle<T> = Arc<dyn UniSubscriber<T>>;

/// A lazy producer of exactly one terminal signal per subscriber.
pub trait Uni<T>: Send + Sync {
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>);
}

impl<T, U: Uni<T> + ?Sized> Uni<T> for Arc<U> {
  #[inline]
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) { (**self).subscribe(subscriber) }
}

impl<T, U: Uni<T> + ?Sized> Uni<T> for Box<U> {
  #[inline]
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) { (**self).subscribe(subscriber) }
}

impl<T, S: UniSubscriber<T> + ?Sized> UniSubscriber<T> for Arc<S> {
  #[inline]
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) { (**self).on_subscribe(subscription) }

  #[inline]
  fn on_item(&self, item: T) { (**self).on_item(item) }

  #[inline]
  fn on_failure(&self, failure: Failure) { (**self).on_failure(failure) }
}

/// Operators available on every [`Uni`].
pub trait UniExt<T>: Uni<T> + Sized {
  /// Subscribe with plain callbacks. At most one of them is called.
  ///
  /// The returned handle cancels the subscription; cancelling before the
  /// upstream has acknowledged is honoured as soon as it does.
  fn subscribe_with<I, E>(&self, on_item: I, on_failure: E) -> UniSubscriptionHandle
  where
    I: FnOnce(T) + Send + 'static,
    E: FnOnce(Failure) + Send + 'static,
    T: Send + 'static,
  {
    let subscriber = CallbackSubscriber::new(on_item, on_failure);
    self.subscribe(subscriber.clone());
    subscriber
  }

  /// Run `callback` with the upstream subscription before forwarding it.
  ///
  /// A failing callback cancels the upstream and fails the flow.
  fn on_subscribe_invoke<F>(self, callback: F) -> OnSubscribeInvokeOp<Self, F>
  where
    F: Fn(&UniSubscriptionHandle) -> Result<()> + Send + Sync,
  {
    OnSubscribeInvokeOp::new(self, callback)
  }

  /// On downstream cancellation, subscribe to the Uni produced by `hook` and
  /// cancel the upstream only once it settles.
  fn on_cancellation_call<F, V, H>(self, hook: F) -> OnCancellationCallOp<Self, F, H>
  where
    F: Fn() -> Result<V> + Send + Sync,
    V: Uni<H>,
  {
    OnCancellationCallOp::new(self, hook)
  }

  /// Fail with [`Failure::Timeout`] unless the upstream resolves within
  /// `duration`.
  fn fail_on_timeout<S>(self, duration: Duration, scheduler: S) -> FailOnTimeoutOp<Self>
  where
    S: Scheduler + 'static,
  {
    FailOnTimeoutOp::new(self, duration, Arc::new(scheduler), None)
  }

  /// Like [`fail_on_timeout`](Self::fail_on_timeout), delivering the failure
  /// produced by `supplier` when the deadline elapses.
  fn fail_on_timeout_with<S, F>(
    self, duration: Duration, scheduler: S, supplier: F,
  ) -> FailOnTimeoutOp<Self>
  where
    S: Scheduler + 'static,
    F: Fn() -> Option<Failure> + Send + Sync + 'static,
  {
    let supplier: FailureSupplier = Arc::new(supplier);
    FailOnTimeoutOp::new(self, duration, Arc::new(scheduler), Some(supplier))
  }

  /// Share one upstream computation between every subscriber and replay its
  /// outcome to late ones.
  fn memoize(self) -> Memoize<T>
  where
    Self: 'static,
    T: Clone + Send + 'static,
  {
    Memoize::new(self, || false)
  }

  /// Memoize, recomputing on the next subscription after `invalidate`
  /// returns `true`.
  fn memoize_until<P>(self, invalidate: P) -> Memoize<T>
  where
    Self: 'static,
    T: Clone + Send + 'static,
    P: Fn() -> bool + Send + Sync + 'static,
  {
    Memoize::new(self, invalidate)
  }

  /// Memoize, recomputing once the cached outcome is older than `duration`.
  ///
  /// `clock` returns the current time as an offset from any fixed origin; a
  /// [`TestScheduler`](crate::scheduler::TestScheduler)'s `now` works as well
  /// as an `Instant`-based clock.
  fn memoize_at_least<C>(self, duration: Duration, clock: C) -> Memoize<T>
  where
    Self: 'static,
    T: Clone + Send + 'static,
    C: Fn() -> Duration + Send + Sync + 'static,
  {
    Memoize::at_least(self, duration, clock)
  }

  /// Consume the result through the credit-based protocol: the upstream is
  /// subscribed on the first request and its item is followed by completion.
  fn to_multi(self) -> UniToMulti<Self> { UniToMulti::new(self) }
}

impl<T, U: Uni<T>> UniExt<T> for U {}
