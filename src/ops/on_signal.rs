use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc, Weak,
};

use crate::{
  error::{guarded, Failure, Result},
  log::log_debug,
  multi::{Multi, MultiSubscriber, MultiSubscriberHandle},
  subscription::{cancelled, Latch, Subscription, SubscriptionHandle, SubscriptionSlot},
};

type Action = Box<dyn Fn() -> Result<()> + Send + Sync>;
type SubscriptionHook = Box<dyn Fn(&SubscriptionHandle) -> Result<()> + Send + Sync>;
type ItemHook<T> = Box<dyn Fn(&T) -> Result<()> + Send + Sync>;
type FailureHook = Box<dyn Fn(&Failure) -> Result<()> + Send + Sync>;

/// Optional observers for each multi-result signal.
///
/// Every observer may fail. A failure (or a panic) in the subscription, item,
/// completion or cancellation observer terminates the flow with that failure;
/// a failure in the failure observer is merged with the upstream failure; a
/// failure in the termination observer is only logged.
pub struct SignalHooks<T> {
  on_subscription: Option<SubscriptionHook>,
  on_item: Option<ItemHook<T>>,
  on_failure: Option<FailureHook>,
  on_completion: Option<Action>,
  on_termination: Option<Action>,
  on_cancellation: Option<Action>,
}

impl<T> Default for SignalHooks<T> {
  fn default() -> Self {
    Self {
      on_subscription: None,
      on_item: None,
      on_failure: None,
      on_completion: None,
      on_termination: None,
      on_cancellation: None,
    }
  }
}

impl<T> SignalHooks<T> {
  pub fn new() -> Self { Self::default() }

  #[must_use]
  pub fn on_subscription<F>(mut self, hook: F) -> Self
  where
    F: Fn(&SubscriptionHandle) -> Result<()> + Send + Sync + 'static,
  {
    self.on_subscription = Some(Box::new(hook));
    self
  }

  #[must_use]
  pub fn on_item<F>(mut self, hook: F) -> Self
  where
    F: Fn(&T) -> Result<()> + Send + Sync + 'static,
  {
    self.on_item = Some(Box::new(hook));
    self
  }

  #[must_use]
  pub fn on_failure<F>(mut self, hook: F) -> Self
  where
    F: Fn(&Failure) -> Result<()> + Send + Sync + 'static,
  {
    self.on_failure = Some(Box::new(hook));
    self
  }

  #[must_use]
  pub fn on_completion<F>(mut self, hook: F) -> Self
  where
    F: Fn() -> Result<()> + Send + Sync + 'static,
  {
    self.on_completion = Some(Box::new(hook));
    self
  }

  #[must_use]
  pub fn on_termination<F>(mut self, hook: F) -> Self
  where
    F: Fn() -> Result<()> + Send + Sync + 'static,
  {
    self.on_termination = Some(Box::new(hook));
    self
  }

  #[must_use]
  pub fn on_cancellation<F>(mut self, hook: F) -> Self
  where
    F: Fn() -> Result<()> + Send + Sync + 'static,
  {
    self.on_cancellation = Some(Box::new(hook));
    self
  }

  fn subscribed(&self, subscription: &SubscriptionHandle) -> Result<()> {
    self.on_subscription.as_ref().map_or(Ok(()), |hook| guarded(|| hook(subscription)))
  }

  fn item(&self, item: &T) -> Result<()> {
    self.on_item.as_ref().map_or(Ok(()), |hook| guarded(|| hook(item)))
  }

  fn failed(&self, failure: &Failure) -> Result<()> {
    self.on_failure.as_ref().map_or(Ok(()), |hook| guarded(|| hook(failure)))
  }

  fn completed(&self) -> Result<()> { run(&self.on_completion) }

  fn terminated(&self) -> Result<()> { run(&self.on_termination) }

  fn cancelled(&self) -> Result<()> { run(&self.on_cancellation) }
}

fn run(action: &Option<Action>) -> Result<()> {
  action.as_ref().map_or(Ok(()), |action| guarded(|| action()))
}

// ==================== OnSignalOp ====================

/// Attaches [`SignalHooks`] to a multi-result flow.
pub struct OnSignalOp<S, T> {
  source: S,
  hooks: Arc<SignalHooks<T>>,
}

impl<S, T> OnSignalOp<S, T> {
  #[inline]
  pub fn new(source: S, hooks: SignalHooks<T>) -> Self { Self { source, hooks: Arc::new(hooks) } }
}

impl<T, S> Multi<T> for OnSignalOp<S, T>
where
  T: Send + 'static,
  S: Multi<T>,
{
  fn subscribe(&self, subscriber: MultiSubscriberHandle<T>) {
    let hooks = self.hooks.clone();
    let signal_subscriber = Arc::new_cyclic(|me| SignalSubscriber {
      downstream: subscriber,
      hooks,
      upstream: SubscriptionSlot::new(),
      cancelling: AtomicBool::new(false),
      me: me.clone(),
    });
    self.source.subscribe(signal_subscriber);
  }
}

/// Sits between upstream and downstream in both directions: it is the
/// upstream's subscriber and the downstream's subscription.
///
/// The upstream slot doubles as the terminal latch. Whoever latches it first
/// (a terminal signal, a cancellation, or a failing hook) owns the single
/// terminal transition.
struct SignalSubscriber<T> {
  downstream: MultiSubscriberHandle<T>,
  hooks: Arc<SignalHooks<T>>,
  upstream: SubscriptionSlot<dyn Subscription>,
  // Claimed by the one `cancel` call that runs the cancellation hook.
  cancelling: AtomicBool,
  me: Weak<SignalSubscriber<T>>,
}

impl<T: Send + 'static> SignalSubscriber<T> {
  fn fail_from_hook(&self, failure: Failure) {
    match self.upstream.latch() {
      Latch::Lost => {}
      Latch::Won(upstream) => {
        if let Some(upstream) = upstream {
          upstream.cancel();
        }
        self.deliver_error(failure);
      }
    }
  }

  fn deliver_error(&self, failure: Failure) {
    let failure = match self.hooks.failed(&failure) {
      Ok(()) => failure,
      Err(hook_failure) => Failure::composite(failure, hook_failure),
    };
    self.downstream.on_error(failure);
    self.terminate();
  }

  fn terminate(&self) {
    if let Err(failure) = self.hooks.terminated() {
      log_debug!("termination hook failed after the terminal signal: {}", failure);
    }
  }
}

impl<T: Send + 'static> MultiSubscriber<T> for SignalSubscriber<T> {
  fn on_subscribe(&self, subscription: SubscriptionHandle) {
    if !self.upstream.install(subscription.clone()) {
      subscription.cancel();
      return;
    }
    if let Err(failure) = self.hooks.subscribed(&subscription) {
      if let Latch::Won(Some(upstream)) = self.upstream.latch() {
        upstream.cancel();
      }
      self.downstream.on_subscribe(cancelled());
      self.downstream.on_error(failure);
      return;
    }
    if let Some(me) = self.me.upgrade() {
      self.downstream.on_subscribe(me);
    }
  }

  fn on_next(&self, item: T) {
    if self.upstream.is_cancelled() {
      return;
    }
    match self.hooks.item(&item) {
      Ok(()) => self.downstream.on_next(item),
      Err(failure) => self.fail_from_hook(failure),
    }
  }

  fn on_error(&self, failure: Failure) {
    if let Latch::Won(_) = self.upstream.latch() {
      self.deliver_error(failure);
    }
  }

  fn on_complete(&self) {
    if let Latch::Lost = self.upstream.latch() {
      return;
    }
    match self.hooks.completed() {
      Ok(()) => self.downstream.on_complete(),
      Err(failure) => self.downstream.on_error(failure),
    }
    self.terminate();
  }
}

impl<T: Send + 'static> Subscription for SignalSubscriber<T> {
  fn request(&self, n: u64) {
    if let Some(upstream) = self.upstream.current() {
      upstream.request(n);
    }
  }

  fn cancel(&self) {
    if self.upstream.is_cancelled() || self.cancelling.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Err(failure) = self.hooks.cancelled() {
      self.fail_from_hook(failure);
      return;
    }
    if let Latch::Won(Some(upstream)) = self.upstream.latch() {
      upstream.cancel();
    }
  }
}

#[cfg(test)]
mod test {
  use std::{
    sync::{
      atomic::{AtomicUsize, Ordering},
      Arc, Barrier,
    },
    thread,
  };

  use parking_lot::Mutex;

  use crate::{
    prelude::*,
    testing::{MultiEvent, MultiProbe, MultiRecorder},
  };

  type Journal = Arc<Mutex<Vec<String>>>;

  fn journaled(journal: &Journal) -> SignalHooks<i32> {
    let log = |journal: &Journal, entry: &'static str| {
      let journal = journal.clone();
      move || -> crate::error::Result<()> {
        journal.lock().push(entry.to_string());
        Ok(())
      }
    };
    let (j_sub, j_item, j_fail) = (journal.clone(), journal.clone(), journal.clone());
    SignalHooks::new()
      .on_subscription(move |_| {
        j_sub.lock().push("subscription".into());
        Ok(())
      })
      .on_item(move |v: &i32| {
        j_item.lock().push(format!("item {v}"));
        Ok(())
      })
      .on_failure(move |f: &Failure| {
        j_fail.lock().push(format!("failure {f}"));
        Ok(())
      })
      .on_completion(log(journal, "completion"))
      .on_termination(log(journal, "termination"))
      .on_cancellation(log(journal, "cancellation"))
  }

  #[rxsignal_macro::test]
  fn observes_every_signal_in_order() {
    let journal = Journal::default();
    let probe = MultiProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::with_request(10);
    probe.clone().on_signal(journaled(&journal)).subscribe(recorder.clone());

    probe.next(1);
    probe.next(2);
    probe.complete();
    probe.complete();

    assert_eq!(probe.requested(), 10);
    assert_eq!(
      *journal.lock(),
      vec!["subscription", "item 1", "item 2", "completion", "termination"]
    );
    assert_eq!(
      recorder.events(),
      vec![MultiEvent::Subscribed, MultiEvent::Next(1), MultiEvent::Next(2), MultiEvent::Complete]
    );
  }

  #[rxsignal_macro::test]
  fn failing_subscription_hook_never_forwards_the_subscription() {
    let probe = MultiProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::with_request(1);
    probe
      .clone()
      .on_subscription_invoke(|_| Err(Failure::msg("refused")))
      .subscribe(recorder.clone());

    assert_eq!(probe.cancellations(), 1);
    assert_eq!(probe.requested(), 0);
    probe.next(1);
    assert_eq!(
      recorder.events(),
      vec![MultiEvent::Subscribed, MultiEvent::Error("refused".into())]
    );
  }

  #[rxsignal_macro::test]
  fn failing_item_hook_terminates_the_flow() {
    let probe = MultiProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::with_request(5);
    probe
      .clone()
      .on_item_invoke(|v: &i32| if *v == 2 { Err(Failure::msg("bad item")) } else { Ok(()) })
      .subscribe(recorder.clone());

    probe.next(1);
    probe.next(2);
    probe.next(3);
    probe.complete();

    assert_eq!(probe.cancellations(), 1);
    assert_eq!(
      recorder.events(),
      vec![MultiEvent::Subscribed, MultiEvent::Next(1), MultiEvent::Error("bad item".into())]
    );
  }

  #[rxsignal_macro::test]
  fn failing_failure_hook_is_merged() {
    let probe = MultiProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::new();
    probe
      .clone()
      .on_signal(
        SignalHooks::new()
          .on_failure(|_| Err(Failure::msg("hook")))
          .on_termination(|| Err(Failure::msg("ignored"))),
      )
      .subscribe(recorder.clone());

    probe.error("upstream");
    let failure = recorder.failure().unwrap();
    let causes: Vec<String> = failure.causes().iter().map(|f| f.to_string()).collect();
    assert_eq!(causes, vec!["upstream", "hook"]);
    assert_eq!(recorder.terminal_count(), 1);
  }

  #[rxsignal_macro::test]
  fn failing_completion_hook_turns_completion_into_failure() {
    let probe = MultiProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::new();
    probe
      .clone()
      .on_completion_invoke(|| Err(Failure::msg("flush failed")))
      .subscribe(recorder.clone());
    probe.complete();
    assert_eq!(
      recorder.events(),
      vec![MultiEvent::Subscribed, MultiEvent::Error("flush failed".into())]
    );
  }

  #[rxsignal_macro::test]
  fn cancellation_runs_the_hook_then_cancels_upstream() {
    let journal = Journal::default();
    let probe = MultiProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::with_request(1);
    probe.clone().on_signal(journaled(&journal)).subscribe(recorder.clone());

    recorder.cancel();
    recorder.cancel();
    probe.next(1);
    recorder.request(3);

    assert_eq!(probe.cancellations(), 1);
    assert_eq!(probe.requested(), 1);
    assert_eq!(*journal.lock(), vec!["subscription", "cancellation"]);
    assert_eq!(recorder.events(), vec![MultiEvent::Subscribed]);
  }

  #[rxsignal_macro::test]
  fn failing_cancellation_hook_fails_the_flow_instead() {
    let probe = MultiProbe::<i32>::new();
    let recorder = MultiRecorder::<i32>::new();
    probe
      .clone()
      .on_cancellation_invoke(|| Err(Failure::msg("must not cancel")))
      .subscribe(recorder.clone());

    recorder.cancel();
    assert_eq!(
      recorder.events(),
      vec![MultiEvent::Subscribed, MultiEvent::Error("must not cancel".into())]
    );
    assert_eq!(probe.cancellations(), 1);
  }

  #[rxsignal_macro::test]
  fn racing_terminal_signals_deliver_exactly_one() {
    const THREADS: usize = 6;
    for _ in 0..50 {
      let probe = MultiProbe::<i32>::new();
      let recorder = MultiRecorder::<i32>::new();
      probe.clone().on_termination_invoke(|| Ok(())).subscribe(recorder.clone());

      let barrier = Arc::new(Barrier::new(THREADS));
      let handles: Vec<_> = (0..THREADS)
        .map(|i| {
          let (probe, barrier) = (probe.clone(), barrier.clone());
          thread::spawn(move || {
            barrier.wait();
            if i % 2 == 0 {
              probe.complete();
            } else {
              probe.error("racing");
            }
          })
        })
        .collect();
      for handle in handles {
        handle.join().unwrap();
      }
      assert_eq!(recorder.terminal_count(), 1);
    }
  }

  #[rxsignal_macro::test]
  fn concurrent_cancels_run_the_hook_once() {
    const THREADS: usize = 4;
    for _ in 0..100 {
      let runs = Arc::new(AtomicUsize::new(0));
      let c_runs = runs.clone();
      let probe = MultiProbe::<i32>::new();
      let recorder = MultiRecorder::<i32>::new();
      probe
        .clone()
        .on_cancellation_invoke(move || {
          c_runs.fetch_add(1, Ordering::SeqCst);
          Ok(())
        })
        .subscribe(recorder.clone());

      let barrier = Arc::new(Barrier::new(THREADS));
      let handles: Vec<_> = (0..THREADS)
        .map(|_| {
          let (recorder, barrier) = (recorder.clone(), barrier.clone());
          thread::spawn(move || {
            barrier.wait();
            recorder.cancel();
          })
        })
        .collect();
      for handle in handles {
        handle.join().unwrap();
      }
      assert_eq!(runs.load(Ordering::SeqCst), 1);
      assert_eq!(probe.cancellations(), 1);
    }
  }
}
