use std::{
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use crate::{
  error::{guarded, Failure, Result},
  infrastructure::handle_dropped_exception,
  subscription::{UniSubscription, UniSubscriptionHandle},
  uni::{Uni, UniExt, UniSubscriber, UniSubscriberHandle},
};

/// Defers the upstream cancellation until an asynchronous hook has settled.
///
/// `H` is the item type of the hook's Uni; its value is ignored.
pub struct OnCancellationCallOp<S, F, H> {
  source: S,
  hook: Arc<F>,
  _hook_item: PhantomData<fn() -> H>,
}

impl<S, F, H> OnCancellationCallOp<S, F, H> {
  #[inline]
  pub fn new(source: S, hook: F) -> Self {
    Self { source, hook: Arc::new(hook), _hook_item: PhantomData }
  }
}

impl<T, S, F, V, H> Uni<T> for OnCancellationCallOp<S, F, H>
where
  T: 'static,
  S: Uni<T>,
  F: Fn() -> Result<V> + Send + Sync + 'static,
  V: Uni<H>,
  H: Send + 'static,
{
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    self.source.subscribe(Arc::new(CancellationCallSubscriber {
      downstream: subscriber,
      hook: self.hook.clone(),
      cancelled: Arc::new(AtomicBool::new(false)),
      _hook_item: PhantomData::<fn() -> H>,
    }));
  }
}

struct CancellationCallSubscriber<T, F, H> {
  downstream: UniSubscriberHandle<T>,
  hook: Arc<F>,
  cancelled: Arc<AtomicBool>,
  _hook_item: PhantomData<fn() -> H>,
}

impl<T, F, V, H> UniSubscriber<T> for CancellationCallSubscriber<T, F, H>
where
  F: Fn() -> Result<V> + Send + Sync + 'static,
  V: Uni<H>,
  H: Send + 'static,
{
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) {
    self.downstream.on_subscribe(Arc::new(CancellationCallSubscription {
      upstream: subscription,
      hook: self.hook.clone(),
      called: self.cancelled.clone(),
      _hook_item: PhantomData::<fn() -> H>,
    }));
  }

  fn on_item(&self, item: T) {
    if !self.cancelled.load(Ordering::Acquire) {
      self.downstream.on_item(item);
    }
  }

  fn on_failure(&self, failure: Failure) {
    if self.cancelled.load(Ordering::Acquire) {
      handle_dropped_exception(failure);
    } else {
      self.downstream.on_failure(failure);
    }
  }
}

struct CancellationCallSubscription<F, H> {
  upstream: UniSubscriptionHandle,
  hook: Arc<F>,
  called: Arc<AtomicBool>,
  _hook_item: PhantomData<fn() -> H>,
}

impl<F, V, H> UniSubscription for CancellationCallSubscription<F, H>
where
  F: Fn() -> Result<V> + Send + Sync,
  V: Uni<H>,
  H: Send + 'static,
{
  fn cancel(&self) {
    if self
      .called
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return;
    }
    match guarded(|| (self.hook)()) {
      Ok(hook) => {
        let (on_item, on_failure) = (self.upstream.clone(), self.upstream.clone());
        hook.subscribe_with(
          move |_| on_item.cancel(),
          move |failure| {
            handle_dropped_exception(failure);
            on_failure.cancel();
          },
        );
      }
      Err(failure) => {
        handle_dropped_exception(failure);
        self.upstream.cancel();
      }
    }
  }
}
