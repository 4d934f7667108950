use std::sync::Arc;

use crate::{
  error::{guarded, Failure, Result},
  subscription::{cancelled_uni, UniSubscription, UniSubscriptionHandle},
  uni::{Uni, UniSubscriber, UniSubscriberHandle},
};

/// Runs a callback with the upstream subscription before the downstream sees
/// it.
pub struct OnSubscribeInvokeOp<S, F> {
  source: S,
  callback: Arc<F>,
}

impl<S, F> OnSubscribeInvokeOp<S, F> {
  #[inline]
  pub fn new(source: S, callback: F) -> Self { Self { source, callback: Arc::new(callback) } }
}

impl<T, S, F> Uni<T> for OnSubscribeInvokeOp<S, F>
where
  T: 'static,
  S: Uni<T>,
  F: Fn(&UniSubscriptionHandle) -> Result<()> + Send + Sync + 'static,
{
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    self
      .source
      .subscribe(Arc::new(OnSubscribeInvokeSubscriber { downstream: subscriber, callback: self.callback.clone() }));
  }
}

struct OnSubscribeInvokeSubscriber<T, F> {
  downstream: UniSubscriberHandle<T>,
  callback: Arc<F>,
}

impl<T, F> UniSubscriber<T> for OnSubscribeInvokeSubscriber<T, F>
where
  F: Fn(&UniSubscriptionHandle) -> Result<()> + Send + Sync,
{
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) {
    match guarded(|| (self.callback)(&subscription)) {
      Ok(()) => self.downstream.on_subscribe(subscription),
      Err(failure) => {
        subscription.cancel();
        self.downstream.on_subscribe(cancelled_uni());
        self.downstream.on_failure(failure);
      }
    }
  }

  #[inline]
  fn on_item(&self, item: T) { self.downstream.on_item(item); }

  #[inline]
  fn on_failure(&self, failure: Failure) { self.downstream.on_failure(failure); }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::{
    prelude::*,
    testing::{UniEvent, UniProbe, UniRecorder},
  };

  #[rxsignal_macro::test]
  fn forwards_the_subscription_after_the_callback() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c_calls = calls.clone();
    let recorder = UniRecorder::<i32>::new();
    uni::item(5)
      .on_subscribe_invoke(move |_| {
        c_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
      })
      .subscribe(recorder.clone());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.events(), vec![UniEvent::Subscribed, UniEvent::Item(5)]);
  }

  #[rxsignal_macro::test]
  fn failing_callback_cancels_upstream_and_fails_downstream() {
    let probe = UniProbe::<i32>::new();
    let recorder = UniRecorder::<i32>::new();
    probe
      .clone()
      .on_subscribe_invoke(|_| Err(Failure::msg("not allowed")))
      .subscribe(recorder.clone());

    assert_eq!(probe.cancellations(), 1);
    assert_eq!(
      recorder.events(),
      vec![UniEvent::Subscribed, UniEvent::Failure("not allowed".into())]
    );
  }

  #[rxsignal_macro::test]
  fn panicking_callback_is_a_failure() {
    let probe = UniProbe::<i32>::new();
    let recorder = UniRecorder::<i32>::new();
    probe
      .clone()
      .on_subscribe_invoke(|_| panic!("callback exploded"))
      .subscribe(recorder.clone());

    assert_eq!(probe.cancellations(), 1);
    assert!(matches!(recorder.failure(), Some(Failure::Panicked(_))));
  }

  #[rxsignal_macro::test]
  fn downstream_cancel_reaches_upstream() {
    let probe = UniProbe::<i32>::new();
    let recorder = UniRecorder::<i32>::new();
    probe.clone().on_subscribe_invoke(|_| Ok(())).subscribe(recorder.clone());
    recorder.cancel();
    assert_eq!(probe.cancellations(), 1);
  }
}
