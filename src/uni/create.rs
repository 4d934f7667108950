//! Minimal sources for building single-result flows.

use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use super::{Uni, UniSubscriberHandle};
use crate::{
  error::{guarded, Failure, Result},
  subscription::{cancelled_uni, GuardSubscription, TerminalGuard, UniSubscription},
};

// ==================== item / failure ====================

/// Resolves every subscriber with a clone of the same value.
#[derive(Clone)]
pub struct ItemUni<T> {
  value: T,
}

/// A Uni resolving with `value`.
pub fn item<T: Clone + Send + Sync>(value: T) -> ItemUni<T> { ItemUni { value } }

impl<T: Clone + Send + Sync> Uni<T> for ItemUni<T> {
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    let guard = Arc::new(TerminalGuard::new());
    subscriber.on_subscribe(Arc::new(GuardSubscription(guard.clone())));
    if guard.try_terminate() {
      subscriber.on_item(self.value.clone());
    }
  }
}

/// Fails every subscriber with the same failure.
pub struct FailureUni<T> {
  failure: Failure,
  _item: PhantomData<fn() -> T>,
}

/// A Uni failing with `failure`.
pub fn failure<T>(failure: impl Into<Failure>) -> FailureUni<T> {
  FailureUni { failure: failure.into(), _item: PhantomData }
}

impl<T> Uni<T> for FailureUni<T> {
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    let guard = Arc::new(TerminalGuard::new());
    subscriber.on_subscribe(Arc::new(GuardSubscription(guard.clone())));
    if guard.try_terminate() {
      subscriber.on_failure(self.failure.clone());
    }
  }
}

// ==================== deferred ====================

/// Calls its supplier once per subscriber.
pub struct Deferred<F> {
  supplier: F,
}

/// A Uni resolving with whatever `supplier` returns at subscription time. A
/// panicking supplier fails the subscriber with [`Failure::Panicked`].
pub fn deferred<T, F>(supplier: F) -> Deferred<F>
where
  F: Fn() -> Result<T> + Send + Sync,
{
  Deferred { supplier }
}

impl<T, F> Uni<T> for Deferred<F>
where
  F: Fn() -> Result<T> + Send + Sync,
{
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    let guard = Arc::new(TerminalGuard::new());
    subscriber.on_subscribe(Arc::new(GuardSubscription(guard.clone())));
    if guard.is_terminated() {
      return;
    }
    let outcome = guarded(&self.supplier);
    if guard.try_terminate() {
      match outcome {
        Ok(value) => subscriber.on_item(value),
        Err(failure) => subscriber.on_failure(failure),
      }
    }
  }
}

// ==================== emitter ====================

type TerminationHook = Box<dyn FnOnce() + Send>;

struct EmitterState<T> {
  guard: TerminalGuard,
  downstream: UniSubscriberHandle<T>,
  on_termination: Mutex<Option<TerminationHook>>,
}

impl<T> EmitterState<T> {
  fn run_termination(&self) {
    let hook = self.on_termination.lock().take();
    if let Some(hook) = hook {
      hook();
    }
  }
}

/// Completion side of an [`emitter`] Uni. Cloneable and usable from any
/// thread; only the first `complete`/`fail` counts.
pub struct UniEmitter<T> {
  state: Arc<EmitterState<T>>,
}

impl<T> Clone for UniEmitter<T> {
  fn clone(&self) -> Self { Self { state: self.state.clone() } }
}

impl<T> UniEmitter<T> {
  /// Resolve with `value` unless already resolved or cancelled.
  pub fn complete(&self, value: T) {
    if self.state.guard.try_terminate() {
      self.state.downstream.on_item(value);
      self.state.run_termination();
    }
  }

  /// Fail unless already resolved or cancelled.
  pub fn fail(&self, failure: impl Into<Failure>) {
    if self.state.guard.try_terminate() {
      self.state.downstream.on_failure(failure.into());
      self.state.run_termination();
    }
  }

  /// Whether the emission is over, by resolution or by cancellation.
  pub fn is_terminated(&self) -> bool { self.state.guard.is_terminated() }

  /// Run `hook` once the emission is over, including when the subscriber
  /// cancels. Runs immediately when it already is.
  pub fn on_termination(&self, hook: impl FnOnce() + Send + 'static) {
    *self.state.on_termination.lock() = Some(Box::new(hook));
    if self.state.guard.is_terminated() {
      self.state.run_termination();
    }
  }
}

struct EmitterSubscription<T> {
  state: Arc<EmitterState<T>>,
}

impl<T> UniSubscription for EmitterSubscription<T> {
  fn cancel(&self) {
    if self.state.guard.try_terminate() {
      self.state.run_termination();
    }
  }
}

/// Produces its outcome through a [`UniEmitter`].
pub struct EmitterUni<F> {
  callback: F,
}

/// A Uni driven by `callback`, called once per subscriber with an emitter the
/// callback completes now or later, from any thread.
pub fn emitter<T, F>(callback: F) -> EmitterUni<F>
where
  F: Fn(UniEmitter<T>) + Send + Sync,
{
  EmitterUni { callback }
}

impl<T, F> Uni<T> for EmitterUni<F>
where
  T: Send + 'static,
  F: Fn(UniEmitter<T>) + Send + Sync,
{
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    let state = Arc::new(EmitterState {
      guard: TerminalGuard::new(),
      downstream: subscriber.clone(),
      on_termination: Mutex::new(None),
    });
    subscriber.on_subscribe(Arc::new(EmitterSubscription { state: state.clone() }));
    let emitter = UniEmitter { state };
    let c_emitter = emitter.clone();
    if let Err(failure) = guarded(move || {
      (self.callback)(c_emitter);
      Ok(())
    }) {
      emitter.fail(failure);
    }
  }
}

// ==================== never ====================

/// Never resolves.
pub struct Never<T>(PhantomData<fn() -> T>);

/// A Uni that acknowledges the subscription and then stays silent.
pub fn never<T>() -> Never<T> { Never(PhantomData) }

impl<T> Uni<T> for Never<T> {
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) { subscriber.on_subscribe(cancelled_uni()) }
}
