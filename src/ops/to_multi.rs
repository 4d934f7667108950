use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::{
  error::Failure,
  infrastructure::handle_dropped_exception,
  multi::{Multi, MultiSubscriberHandle},
  subscription::{
    Latch, Subscription, SubscriptionSlot, TerminalGuard, UniSubscription, UniSubscriptionHandle,
  },
  uni::{Uni, UniSubscriber},
};

/// A [`Uni`] consumed through the credit-based protocol.
///
/// The upstream is subscribed on the first positive request; its item is
/// followed by completion.
pub struct UniToMulti<U> {
  upstream: Arc<U>,
}

impl<U> UniToMulti<U> {
  #[inline]
  pub fn new(upstream: U) -> Self { Self { upstream: Arc::new(upstream) } }
}

impl<T, U> Multi<T> for UniToMulti<U>
where
  T: Send + 'static,
  U: Uni<T> + 'static,
{
  fn subscribe(&self, subscriber: MultiSubscriberHandle<T>) {
    let state = Arc::new(ToMultiState {
      guard: TerminalGuard::new(),
      requested: AtomicBool::new(false),
      upstream: SubscriptionSlot::new(),
      downstream: subscriber,
    });
    let source: Arc<dyn Uni<T>> = self.upstream.clone();
    state
      .downstream
      .on_subscribe(Arc::new(ToMultiSubscription { state: state.clone(), source }));
  }
}

struct ToMultiState<T> {
  guard: TerminalGuard,
  requested: AtomicBool,
  upstream: SubscriptionSlot<dyn UniSubscription>,
  downstream: MultiSubscriberHandle<T>,
}

impl<T> ToMultiState<T> {
  fn release_upstream(&self) {
    if let Latch::Won(Some(upstream)) = self.upstream.latch() {
      upstream.cancel();
    }
  }
}

struct ToMultiSubscription<T> {
  state: Arc<ToMultiState<T>>,
  source: Arc<dyn Uni<T>>,
}

impl<T: Send + 'static> Subscription for ToMultiSubscription<T> {
  fn request(&self, n: u64) {
    let state = &self.state;
    if n == 0 {
      if state.guard.try_terminate() {
        state.release_upstream();
        state.downstream.on_error(Failure::InvalidRequest(n));
      }
      return;
    }
    if state.guard.is_terminated() {
      return;
    }
    if state
      .requested
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.source.subscribe(Arc::new(ToMultiSubscriber { state: state.clone() }));
    }
  }

  fn cancel(&self) {
    if self.state.guard.try_terminate() {
      self.state.release_upstream();
    }
  }
}

struct ToMultiSubscriber<T> {
  state: Arc<ToMultiState<T>>,
}

impl<T: Send + 'static> UniSubscriber<T> for ToMultiSubscriber<T> {
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) {
    if !self.state.upstream.install(subscription.clone()) {
      subscription.cancel();
    }
  }

  fn on_item(&self, item: T) {
    if self.state.guard.try_terminate() {
      let _ = self.state.upstream.latch();
      self.state.downstream.on_next(item);
      self.state.downstream.on_complete();
    }
  }

  fn on_failure(&self, failure: Failure) {
    if self.state.guard.try_terminate() {
      let _ = self.state.upstream.latch();
      self.state.downstream.on_error(failure);
    } else {
      handle_dropped_exception(failure);
    }
  }
}

#[cfg(test)]
mod test {
  use crate::{
    prelude::*,
    testing::{MultiEvent, MultiRecorder, UniProbe},
  };

  #[rxsignal_macro::test]
  fn subscribes_upstream_on_first_request_only() {
    let probe = UniProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::new();
    probe.clone().to_multi().subscribe(recorder.clone());
    assert_eq!(probe.subscriptions(), 0);

    recorder.request(1);
    recorder.request(5);
    assert_eq!(probe.subscriptions(), 1);

    probe.emit_item(7);
    assert_eq!(
      recorder.events(),
      vec![MultiEvent::Subscribed, MultiEvent::Next(7), MultiEvent::Complete]
    );
  }

  #[rxsignal_macro::test]
  fn zero_request_fails_the_stream() {
    let probe = UniProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::new();
    probe.clone().to_multi().subscribe(recorder.clone());

    recorder.request(0);
    recorder.request(1);
    assert!(matches!(recorder.failure(), Some(Failure::InvalidRequest(0))));
    assert_eq!(recorder.terminal_count(), 1);
    assert_eq!(probe.subscriptions(), 0);
  }

  #[rxsignal_macro::test]
  fn cancel_before_request_never_subscribes() {
    let probe = UniProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::new();
    probe.clone().to_multi().subscribe(recorder.clone());

    recorder.cancel();
    recorder.request(1);
    assert_eq!(probe.subscriptions(), 0);
    assert_eq!(recorder.events(), vec![MultiEvent::Subscribed]);
  }

  #[rxsignal_macro::test]
  fn cancel_after_request_cancels_upstream() {
    let probe = UniProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::with_request(1);
    probe.clone().to_multi().subscribe(recorder.clone());

    recorder.cancel();
    recorder.cancel();
    probe.emit_item(1);
    assert_eq!(probe.cancellations(), 1);
    assert_eq!(recorder.events(), vec![MultiEvent::Subscribed]);
  }

  #[rxsignal_macro::test]
  fn upstream_failure_fails_the_stream() {
    let recorder = MultiRecorder::<i32>::with_request(3);
    uni::failure::<i32>("no row").to_multi().subscribe(recorder.clone());
    assert_eq!(
      recorder.events(),
      vec![MultiEvent::Subscribed, MultiEvent::Error("no row".into())]
    );
  }
}
