//! Probes and recorders for exercising operators in tests.
//!
//! Recorders are terminal subscribers that remember every signal they see.
//! Probes are upstream sources driven by hand, so a test decides when and on
//! which thread each signal is emitted.
//!
//! ```rust
//! use rxsignal::{
//!   testing::{UniEvent, UniProbe, UniRecorder},
//!   uni::Uni,
//! };
//!
//! let probe = UniProbe::<u8>::new();
//! let recorder = UniRecorder::<u8>::new();
//! probe.subscribe(recorder.clone());
//! probe.emit_item(3);
//! assert_eq!(recorder.events(), vec![UniEvent::Subscribed, UniEvent::Item(3)]);
//! ```

use std::{
  fmt,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
  time::Duration,
};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Condvar, Mutex};

use crate::{
  error::Failure,
  infrastructure::set_dropped_exception_handler,
  multi::{Multi, MultiSubscriber, MultiSubscriberHandle},
  subscription::{
    CancelFn, Subscription, SubscriptionHandle, UniSubscription, UniSubscriptionHandle,
  },
  uni::{Uni, UniSubscriber, UniSubscriberHandle},
};

// ==================== Signal log ====================

struct SignalLog<E> {
  events: Mutex<Vec<E>>,
  changed: Condvar,
}

impl<E: Clone> SignalLog<E> {
  fn new() -> Self { Self { events: Mutex::new(vec![]), changed: Condvar::new() } }

  fn push(&self, event: E) {
    self.events.lock().push(event);
    self.changed.notify_all();
  }

  fn snapshot(&self) -> Vec<E> { self.events.lock().clone() }

  fn wait_until(&self, timeout: Duration, done: impl Fn(&[E]) -> bool) -> bool {
    let mut events = self.events.lock();
    let deadline = std::time::Instant::now() + timeout;
    while !done(&events) {
      if self.changed.wait_until(&mut events, deadline).timed_out() {
        return done(&events);
      }
    }
    true
  }
}

// ==================== UniRecorder ====================

/// A signal seen by a [`UniRecorder`]. Failures are kept as text so events
/// compare with `==`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniEvent<T> {
  Subscribed,
  Item(T),
  Failure(String),
}

/// A single-result subscriber recording what it receives.
pub struct UniRecorder<T> {
  log: SignalLog<UniEvent<T>>,
  failure: Mutex<Option<Failure>>,
  subscription: Mutex<Option<UniSubscriptionHandle>>,
}

impl<T: Clone + Send> UniRecorder<T> {
  pub fn new() -> Arc<Self> {
    Arc::new(Self { log: SignalLog::new(), failure: Mutex::new(None), subscription: Mutex::new(None) })
  }

  pub fn events(&self) -> Vec<UniEvent<T>> { self.log.snapshot() }

  pub fn is_subscribed(&self) -> bool { self.subscription.lock().is_some() }

  /// The received item, if any.
  pub fn item(&self) -> Option<T> {
    self.log.snapshot().into_iter().find_map(|event| match event {
      UniEvent::Item(item) => Some(item),
      _ => None,
    })
  }

  /// The received failure, if any.
  pub fn failure(&self) -> Option<Failure> { self.failure.lock().clone() }

  pub fn failure_message(&self) -> Option<String> { self.failure().map(|f| f.to_string()) }

  /// Number of terminal signals received. Anything above one is a protocol
  /// violation.
  pub fn terminal_count(&self) -> usize {
    self
      .log
      .snapshot()
      .iter()
      .filter(|event| !matches!(event, UniEvent::Subscribed))
      .count()
  }

  /// Cancel through the subscription received in `on_subscribe`.
  pub fn cancel(&self) {
    let subscription = self.subscription.lock().clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }

  /// Block until a terminal signal arrives or `timeout` elapses.
  pub fn wait_terminal(&self, timeout: Duration) -> bool {
    self.log.wait_until(timeout, |events| {
      events.iter().any(|event| !matches!(event, UniEvent::Subscribed))
    })
  }

  pub fn wait_item(&self, timeout: Duration) -> Option<T> {
    self.wait_terminal(timeout);
    self.item()
  }
}

impl<T: Clone + Send> UniSubscriber<T> for UniRecorder<T> {
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) {
    *self.subscription.lock() = Some(subscription);
    self.log.push(UniEvent::Subscribed);
  }

  fn on_item(&self, item: T) { self.log.push(UniEvent::Item(item)); }

  fn on_failure(&self, failure: Failure) {
    let message = failure.to_string();
    *self.failure.lock() = Some(failure);
    self.log.push(UniEvent::Failure(message));
  }
}

// ==================== MultiRecorder ====================

/// A signal seen by a [`MultiRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiEvent<T> {
  Subscribed,
  Next(T),
  Error(String),
  Complete,
}

/// A multi-result subscriber recording what it receives.
pub struct MultiRecorder<T> {
  log: SignalLog<MultiEvent<T>>,
  failure: Mutex<Option<Failure>>,
  subscription: Mutex<Option<SubscriptionHandle>>,
  initial_request: u64,
}

impl<T: Clone + Send> MultiRecorder<T> {
  /// A recorder that requests nothing until told to.
  pub fn new() -> Arc<Self> { Self::with_request(0) }

  /// A recorder that requests `n` items as soon as it is subscribed.
  pub fn with_request(n: u64) -> Arc<Self> {
    Arc::new(Self {
      log: SignalLog::new(),
      failure: Mutex::new(None),
      subscription: Mutex::new(None),
      initial_request: n,
    })
  }

  pub fn events(&self) -> Vec<MultiEvent<T>> { self.log.snapshot() }

  pub fn items(&self) -> Vec<T> {
    self
      .log
      .snapshot()
      .into_iter()
      .filter_map(|event| match event {
        MultiEvent::Next(item) => Some(item),
        _ => None,
      })
      .collect()
  }

  pub fn is_completed(&self) -> bool {
    self.log.snapshot().iter().any(|event| matches!(event, MultiEvent::Complete))
  }

  pub fn failure(&self) -> Option<Failure> { self.failure.lock().clone() }

  pub fn failure_message(&self) -> Option<String> { self.failure().map(|f| f.to_string()) }

  pub fn terminal_count(&self) -> usize {
    self
      .log
      .snapshot()
      .iter()
      .filter(|event| matches!(event, MultiEvent::Error(_) | MultiEvent::Complete))
      .count()
  }

  pub fn request(&self, n: u64) {
    let subscription = self.subscription.lock().clone();
    if let Some(subscription) = subscription {
      subscription.request(n);
    }
  }

  pub fn cancel(&self) {
    let subscription = self.subscription.lock().clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }

  pub fn wait_terminal(&self, timeout: Duration) -> bool {
    self.log.wait_until(timeout, |events| {
      events
        .iter()
        .any(|event| matches!(event, MultiEvent::Error(_) | MultiEvent::Complete))
    })
  }
}

impl<T: Clone + Send> MultiSubscriber<T> for MultiRecorder<T> {
  fn on_subscribe(&self, subscription: SubscriptionHandle) {
    *self.subscription.lock() = Some(subscription.clone());
    self.log.push(MultiEvent::Subscribed);
    if self.initial_request > 0 {
      subscription.request(self.initial_request);
    }
  }

  fn on_next(&self, item: T) { self.log.push(MultiEvent::Next(item)); }

  fn on_error(&self, failure: Failure) {
    let message = failure.to_string();
    *self.failure.lock() = Some(failure);
    self.log.push(MultiEvent::Error(message));
  }

  fn on_complete(&self) { self.log.push(MultiEvent::Complete); }
}

// ==================== UniProbe ====================

struct UniProbeState<T> {
  subscribers: Mutex<Vec<UniSubscriberHandle<T>>>,
  subscriptions: AtomicUsize,
  cancellations: AtomicUsize,
  acknowledge: AtomicBool,
}

/// A hand-driven single-result upstream.
///
/// Every subscriber is acknowledged with a handle counting cancellations,
/// unless the probe was built [`silent`](Self::silent), in which case the
/// test calls [`acknowledge`](Self::acknowledge). Emissions go to the latest
/// subscriber.
pub struct UniProbe<T> {
  state: Arc<UniProbeState<T>>,
}

impl<T> Clone for UniProbe<T> {
  fn clone(&self) -> Self { Self { state: self.state.clone() } }
}

impl<T: Send + 'static> UniProbe<T> {
  pub fn new() -> Self { Self::build(true) }

  /// A probe that does not acknowledge subscriptions on its own.
  pub fn silent() -> Self { Self::build(false) }

  fn build(acknowledge: bool) -> Self {
    Self {
      state: Arc::new(UniProbeState {
        subscribers: Mutex::new(vec![]),
        subscriptions: AtomicUsize::new(0),
        cancellations: AtomicUsize::new(0),
        acknowledge: AtomicBool::new(acknowledge),
      }),
    }
  }

  /// How many times the probe was subscribed.
  pub fn subscriptions(&self) -> usize { self.state.subscriptions.load(Ordering::SeqCst) }

  /// How many times an issued handle was cancelled.
  pub fn cancellations(&self) -> usize { self.state.cancellations.load(Ordering::SeqCst) }

  /// Acknowledge the latest subscriber of a silent probe.
  pub fn acknowledge(&self) {
    if let Some(subscriber) = self.latest() {
      subscriber.on_subscribe(self.handle());
    }
  }

  pub fn emit_item(&self, item: T) {
    if let Some(subscriber) = self.latest() {
      subscriber.on_item(item);
    }
  }

  pub fn emit_failure(&self, failure: impl Into<Failure>) {
    if let Some(subscriber) = self.latest() {
      subscriber.on_failure(failure.into());
    }
  }

  fn latest(&self) -> Option<UniSubscriberHandle<T>> { self.state.subscribers.lock().last().cloned() }

  fn handle(&self) -> UniSubscriptionHandle {
    let state = self.state.clone();
    Arc::new(CancelFn(move || {
      state.cancellations.fetch_add(1, Ordering::SeqCst);
    }))
  }
}

impl<T: Send + 'static> Default for UniProbe<T> {
  fn default() -> Self { Self::new() }
}

impl<T: Send + 'static> Uni<T> for UniProbe<T> {
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    self.state.subscriptions.fetch_add(1, Ordering::SeqCst);
    self.state.subscribers.lock().push(subscriber.clone());
    if self.state.acknowledge.load(Ordering::SeqCst) {
      subscriber.on_subscribe(self.handle());
    }
  }
}

// ==================== MultiProbe ====================

struct MultiProbeState<T> {
  subscriber: Mutex<Option<MultiSubscriberHandle<T>>>,
  requested: AtomicU64,
  cancellations: AtomicUsize,
}

struct MultiProbeSubscription<T> {
  state: Arc<MultiProbeState<T>>,
}

impl<T: Send> Subscription for MultiProbeSubscription<T> {
  fn request(&self, n: u64) { self.state.requested.fetch_add(n, Ordering::SeqCst); }

  fn cancel(&self) { self.state.cancellations.fetch_add(1, Ordering::SeqCst); }
}

/// A hand-driven multi-result upstream. It ignores demand; tests read
/// [`requested`](Self::requested) and emit accordingly.
pub struct MultiProbe<T> {
  state: Arc<MultiProbeState<T>>,
}

impl<T> Clone for MultiProbe<T> {
  fn clone(&self) -> Self { Self { state: self.state.clone() } }
}

impl<T: Send + 'static> MultiProbe<T> {
  pub fn new() -> Self {
    Self {
      state: Arc::new(MultiProbeState {
        subscriber: Mutex::new(None),
        requested: AtomicU64::new(0),
        cancellations: AtomicUsize::new(0),
      }),
    }
  }

  /// Total demand received so far.
  pub fn requested(&self) -> u64 { self.state.requested.load(Ordering::SeqCst) }

  pub fn cancellations(&self) -> usize { self.state.cancellations.load(Ordering::SeqCst) }

  pub fn next(&self, item: T) {
    if let Some(subscriber) = self.subscriber() {
      subscriber.on_next(item);
    }
  }

  pub fn error(&self, failure: impl Into<Failure>) {
    if let Some(subscriber) = self.subscriber() {
      subscriber.on_error(failure.into());
    }
  }

  pub fn complete(&self) {
    if let Some(subscriber) = self.subscriber() {
      subscriber.on_complete();
    }
  }

  fn subscriber(&self) -> Option<MultiSubscriberHandle<T>> { self.state.subscriber.lock().clone() }
}

impl<T: Send + 'static> Default for MultiProbe<T> {
  fn default() -> Self { Self::new() }
}

impl<T: Send + 'static> Multi<T> for MultiProbe<T> {
  fn subscribe(&self, subscriber: MultiSubscriberHandle<T>) {
    *self.state.subscriber.lock() = Some(subscriber.clone());
    subscriber.on_subscribe(Arc::new(MultiProbeSubscription { state: self.state.clone() }));
  }
}

// ==================== DroppedFailures ====================

static DROPPED: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(vec![]));
static COLLECTOR: OnceCell<bool> = OnceCell::new();

/// Collects everything routed to the dropped-exception sink.
///
/// The sink is process-wide and tests run in parallel, so assertions should
/// look for a message unique to the test.
#[derive(Clone, Copy)]
pub struct DroppedFailures;

impl DroppedFailures {
  /// Install the collector as the process-wide handler. Idempotent.
  pub fn install() -> Self {
    COLLECTOR.get_or_init(|| {
      set_dropped_exception_handler(|failure| DROPPED.lock().push(failure.to_string())).is_ok()
    });
    Self
  }

  /// Whether the collector is the installed handler.
  pub fn is_active(&self) -> bool { COLLECTOR.get().copied().unwrap_or(false) }

  /// How many dropped failures mention `needle`.
  pub fn count(&self, needle: &str) -> usize {
    DROPPED.lock().iter().filter(|message| message.contains(needle)).count()
  }

  pub fn contains(&self, needle: &str) -> bool { self.count(needle) > 0 }
}

impl fmt::Debug for DroppedFailures {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(DROPPED.lock().iter()).finish()
  }
}
