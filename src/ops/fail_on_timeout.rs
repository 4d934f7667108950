use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Duration,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  error::{guarded, Failure},
  infrastructure::handle_dropped_exception,
  log::log_debug,
  scheduler::{Scheduler, TaskHandle},
  subscription::{cancelled_uni, TerminalGuard, UniSubscription, UniSubscriptionHandle},
  uni::{Uni, UniSubscriber, UniSubscriberHandle},
};

/// Produces the failure delivered when the deadline elapses.
pub type FailureSupplier = Arc<dyn Fn() -> Option<Failure> + Send + Sync>;

/// Races a timer against the upstream outcome.
///
/// The timer is armed when the upstream acknowledges the subscription. The
/// first of {item, failure, timer, downstream cancel} settles the flow; the
/// losers are discarded, except a late failure, which goes to the
/// dropped-exception sink.
pub struct FailOnTimeoutOp<S> {
  source: S,
  timeout: Duration,
  scheduler: Arc<dyn Scheduler>,
  supplier: Option<FailureSupplier>,
}

impl<S> FailOnTimeoutOp<S> {
  pub fn new(
    source: S, timeout: Duration, scheduler: Arc<dyn Scheduler>, supplier: Option<FailureSupplier>,
  ) -> Self {
    Self { source, timeout, scheduler, supplier }
  }
}

impl<T, S> Uni<T> for FailOnTimeoutOp<S>
where
  T: Send + 'static,
  S: Uni<T>,
{
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    let state = Arc::new(DeadlineState {
      guard: TerminalGuard::new(),
      downstream: subscriber,
      upstream: OnceCell::new(),
      timer: Mutex::new(None),
      pending: Mutex::new(None),
      forwarded: AtomicBool::new(false),
      timeout: self.timeout,
      supplier: self.supplier.clone(),
    });
    self
      .source
      .subscribe(Arc::new(DeadlineSubscriber { state, scheduler: self.scheduler.clone() }));
  }
}

struct DeadlineState<T> {
  guard: TerminalGuard,
  downstream: UniSubscriberHandle<T>,
  upstream: OnceCell<UniSubscriptionHandle>,
  timer: Mutex<Option<TaskHandle>>,
  // The winning outcome, parked until the downstream holds its subscription.
  pending: Mutex<Option<Result<T, Failure>>>,
  forwarded: AtomicBool,
  timeout: Duration,
  supplier: Option<FailureSupplier>,
}

impl<T> DeadlineState<T> {
  fn cancel_timer(&self) {
    let timer = self.timer.lock().take();
    if let Some(timer) = timer {
      timer.cancel();
    }
  }

  fn cancel_upstream(&self) {
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
  }

  fn fire(&self) {
    if !self.guard.try_terminate() {
      return;
    }
    self.cancel_upstream();
    let failure = match &self.supplier {
      None => Failure::Timeout(self.timeout),
      Some(supplier) => match guarded(|| Ok(supplier())) {
        Ok(Some(failure)) => failure,
        Ok(None) => Failure::SupplierProducedNone,
        Err(panic) => {
          log_debug!("timeout failure supplier panicked: {}", panic);
          Failure::SupplierProducedNone
        }
      },
    };
    self.settle(Err(failure));
  }

  /// Deliver the outcome that won the guard, or park it while the
  /// subscription has not been forwarded yet.
  fn settle(&self, outcome: Result<T, Failure>) {
    *self.pending.lock() = Some(outcome);
    if self.forwarded.load(Ordering::SeqCst) {
      self.flush();
    }
  }

  fn forward(&self, subscription: UniSubscriptionHandle) {
    self.downstream.on_subscribe(subscription);
    self.forwarded.store(true, Ordering::SeqCst);
    self.flush();
  }

  fn flush(&self) {
    let outcome = self.pending.lock().take();
    match outcome {
      Some(Ok(item)) => self.downstream.on_item(item),
      Some(Err(failure)) => self.downstream.on_failure(failure),
      None => {}
    }
  }
}

struct DeadlineSubscriber<T> {
  state: Arc<DeadlineState<T>>,
  scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> UniSubscriber<T> for DeadlineSubscriber<T> {
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) {
    let state = &self.state;
    let _ = state.upstream.set(subscription.clone());

    let c_state = state.clone();
    match self.scheduler.schedule(state.timeout, Box::new(move || c_state.fire())) {
      Ok(timer) => {
        *state.timer.lock() = Some(timer.clone());
        if state.guard.is_terminated() {
          timer.cancel();
        }
      }
      Err(rejection) => {
        log_debug!("deadline timer rejected: {}", rejection);
        if state.guard.try_terminate() {
          subscription.cancel();
          state.downstream.on_subscribe(cancelled_uni());
          state.downstream.on_failure(rejection);
        } else {
          // An upstream outcome won while the scheduler was deciding.
          state.forward(cancelled_uni());
        }
        return;
      }
    }

    state.forward(Arc::new(DeadlineSubscription { state: state.clone() }));
  }

  fn on_item(&self, item: T) {
    if self.state.guard.try_terminate() {
      self.state.cancel_timer();
      self.state.settle(Ok(item));
    }
  }

  fn on_failure(&self, failure: Failure) {
    if self.state.guard.try_terminate() {
      self.state.cancel_timer();
      self.state.settle(Err(failure));
    } else {
      handle_dropped_exception(failure);
    }
  }
}

struct DeadlineSubscription<T> {
  state: Arc<DeadlineState<T>>,
}

impl<T: Send> UniSubscription for DeadlineSubscription<T> {
  fn cancel(&self) {
    if self.state.guard.try_terminate() {
      self.state.cancel_upstream();
      self.state.cancel_timer();
    }
  }
}

#[cfg(test)]
mod test {
  use std::{sync::Arc, thread, time::Duration};

  use parking_lot::Mutex;

  use crate::{
    prelude::*,
    scheduler::ScheduledTask,
    testing::{DroppedFailures, UniEvent, UniProbe, UniRecorder},
  };

  /// Runs an interruption on another thread while arming the timer.
  struct InterruptedScheduler {
    inner: TestScheduler,
    interruption: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    reject: bool,
  }

  impl InterruptedScheduler {
    fn new(reject: bool, interruption: impl FnOnce() + Send + 'static) -> Self {
      Self { inner: TestScheduler::new(), interruption: Mutex::new(Some(Box::new(interruption))), reject }
    }
  }

  impl Scheduler for InterruptedScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle, Failure> {
      let interruption = self.interruption.lock().take();
      if let Some(interruption) = interruption {
        thread::spawn(interruption).join().unwrap();
      }
      if self.reject {
        return Err(Failure::Rejected("busy".into()));
      }
      self.inner.schedule(delay, task)
    }
  }

  const DEADLINE: Duration = Duration::from_millis(100);

  fn guarded_probe(scheduler: &TestScheduler) -> (UniProbe<i32>, std::sync::Arc<UniRecorder<i32>>) {
    let probe = UniProbe::<i32>::new();
    let recorder = UniRecorder::<i32>::new();
    probe
      .clone()
      .fail_on_timeout(DEADLINE, scheduler.clone())
      .subscribe(recorder.clone());
    (probe, recorder)
  }

  #[rxsignal_macro::test]
  fn item_before_the_deadline_cancels_the_timer() {
    let scheduler = TestScheduler::new();
    let (probe, recorder) = guarded_probe(&scheduler);
    assert_eq!(scheduler.pending_count(), 1);

    scheduler.advance_by(Duration::from_millis(99));
    probe.emit_item(1);
    assert_eq!(scheduler.pending_count(), 0);

    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(recorder.events(), vec![UniEvent::Subscribed, UniEvent::Item(1)]);
    assert_eq!(probe.cancellations(), 0);
  }

  #[rxsignal_macro::test]
  fn elapsed_deadline_fails_and_cancels_upstream() {
    let dropped = DroppedFailures::install();
    let scheduler = TestScheduler::new();
    let (probe, recorder) = guarded_probe(&scheduler);

    scheduler.advance_by(DEADLINE);
    assert!(matches!(recorder.failure(), Some(Failure::Timeout(d)) if d == DEADLINE));
    assert_eq!(probe.cancellations(), 1);

    probe.emit_item(2);
    probe.emit_failure("late-failure-to1");
    assert_eq!(recorder.terminal_count(), 1);
    assert!(dropped.contains("late-failure-to1"));
  }

  #[rxsignal_macro::test]
  fn supplier_decides_the_timeout_failure() {
    let scheduler = TestScheduler::new();
    let recorder = UniRecorder::<i32>::new();
    uni::never::<i32>()
      .fail_on_timeout_with(DEADLINE, scheduler.clone(), || Some(Failure::msg("too slow")))
      .subscribe(recorder.clone());
    scheduler.flush();
    assert_eq!(recorder.failure_message().as_deref(), Some("too slow"));

    let absent = UniRecorder::<i32>::new();
    uni::never::<i32>()
      .fail_on_timeout_with(DEADLINE, scheduler.clone(), || None)
      .subscribe(absent.clone());
    let panicking = UniRecorder::<i32>::new();
    uni::never::<i32>()
      .fail_on_timeout_with(DEADLINE, scheduler.clone(), || panic!("supplier exploded"))
      .subscribe(panicking.clone());
    scheduler.flush();
    assert!(matches!(absent.failure(), Some(Failure::SupplierProducedNone)));
    assert!(matches!(panicking.failure(), Some(Failure::SupplierProducedNone)));
  }

  #[rxsignal_macro::test]
  fn rejected_timer_fails_with_a_cancelled_handle() {
    let scheduler = TestScheduler::new();
    scheduler.reject_next("worker pool shut down");
    let (probe, recorder) = guarded_probe(&scheduler);

    assert_eq!(probe.cancellations(), 1);
    assert!(matches!(recorder.failure(), Some(Failure::Rejected(r)) if r == "worker pool shut down"));
    assert_eq!(recorder.events().first(), Some(&UniEvent::Subscribed));
    assert_eq!(recorder.terminal_count(), 1);
  }

  #[rxsignal_macro::test]
  fn downstream_cancel_releases_timer_and_upstream() {
    let scheduler = TestScheduler::new();
    let (probe, recorder) = guarded_probe(&scheduler);
    recorder.cancel();
    recorder.cancel();

    assert_eq!(probe.cancellations(), 1);
    assert_eq!(scheduler.pending_count(), 0);
    scheduler.flush();
    assert_eq!(recorder.events(), vec![UniEvent::Subscribed]);
  }

  #[rxsignal_macro::test]
  fn item_racing_the_timer_arming_follows_the_subscription() {
    let probe = UniProbe::<i32>::silent();
    let recorder = UniRecorder::<i32>::new();
    let c_probe = probe.clone();
    let scheduler = Arc::new(InterruptedScheduler::new(false, move || c_probe.emit_item(7)));
    probe
      .clone()
      .fail_on_timeout(DEADLINE, scheduler.clone())
      .subscribe(recorder.clone());
    probe.acknowledge();

    assert_eq!(recorder.events(), vec![UniEvent::Subscribed, UniEvent::Item(7)]);
    assert_eq!(scheduler.inner.pending_count(), 0);
    assert_eq!(probe.cancellations(), 0);
  }

  #[rxsignal_macro::test]
  fn failure_racing_a_rejected_timer_follows_the_subscription() {
    let probe = UniProbe::<i32>::silent();
    let recorder = UniRecorder::<i32>::new();
    let c_probe = probe.clone();
    let scheduler = InterruptedScheduler::new(true, move || c_probe.emit_failure("upstream-broke-to2"));
    probe
      .clone()
      .fail_on_timeout(DEADLINE, scheduler)
      .subscribe(recorder.clone());
    probe.acknowledge();

    assert_eq!(recorder.events().first(), Some(&UniEvent::Subscribed));
    assert_eq!(recorder.terminal_count(), 1);
    assert_eq!(recorder.failure_message().as_deref(), Some("upstream-broke-to2"));
  }
}
