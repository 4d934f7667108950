//! Multicast memoization of a single-result upstream.
//!
//! # Lifecycle
//!
//! ```text
//!   Init ──first subscriber──▶ Subscribing ──upstream ack──▶ Subscribed
//!    ▲                                                          │
//!    │                                                 item / failure
//!    └────────── invalidation (unless Subscribing) ◀── Caching ◀┘
//! ```
//!
//! Consumers that arrive before the outcome wait in two ordered sets,
//! "awaiting subscription" and "awaiting outcome". A single drain worker
//! (elected through the `wip` counter) moves them along as the state
//! advances; every other thread only bumps the counter and leaves. The sets
//! are locked for snapshot and removal only, never while a consumer callback
//! runs.

use std::{
  sync::{
    atomic::{AtomicU8, AtomicUsize, Ordering},
    Arc,
  },
  time::Duration,
};

use parking_lot::Mutex;

use crate::{
  error::{guarded, Failure, Result},
  log::log_trace,
  subscription::{cancelled_uni, DynamicSubscribers, UniSubscription, UniSubscriptionHandle},
  uni::{Uni, UniSubscriber, UniSubscriberHandle},
};

const INIT: u8 = 0;
const SUBSCRIBING: u8 = 1;
const SUBSCRIBED: u8 = 2;
const CACHING: u8 = 3;

type Waiting<T> = Mutex<DynamicSubscribers<UniSubscriberHandle<T>>>;

/// A Uni that subscribes to its upstream once and replays the outcome.
///
/// Cloning shares the cache.
pub struct Memoize<T> {
  core: Arc<MemoizeCore<T>>,
}

impl<T> Clone for Memoize<T> {
  fn clone(&self) -> Self { Self { core: self.core.clone() } }
}

struct MemoizeCore<T> {
  upstream: Box<dyn Uni<T>>,
  invalidation: Box<dyn Fn() -> bool + Send + Sync>,
  state: AtomicU8,
  // Bumped for every upstream subscription; signals from an older one are
  // ignored.
  generation: AtomicUsize,
  wip: AtomicUsize,
  next_id: AtomicUsize,
  awaiting_subscription: Waiting<T>,
  awaiting_outcome: Waiting<T>,
  outcome: Mutex<Option<Result<T>>>,
  upstream_subscription: Mutex<Option<UniSubscriptionHandle>>,
}

impl<T: Clone + Send + 'static> Memoize<T> {
  /// Memoize `source`. `invalidate` is asked on every subscription whether
  /// the cached outcome should be dropped.
  pub fn new<S, P>(source: S, invalidate: P) -> Self
  where
    S: Uni<T> + 'static,
    P: Fn() -> bool + Send + Sync + 'static,
  {
    Self {
      core: Arc::new(MemoizeCore {
        upstream: Box::new(source),
        invalidation: Box::new(invalidate),
        state: AtomicU8::new(INIT),
        generation: AtomicUsize::new(0),
        wip: AtomicUsize::new(0),
        next_id: AtomicUsize::new(0),
        awaiting_subscription: Mutex::new(DynamicSubscribers::new()),
        awaiting_outcome: Mutex::new(DynamicSubscribers::new()),
        outcome: Mutex::new(None),
        upstream_subscription: Mutex::new(None),
      }),
    }
  }

  /// Memoize `source`, recomputing once `duration` has elapsed on `clock`
  /// since the current computation was started.
  pub fn at_least<S, C>(source: S, duration: Duration, clock: C) -> Self
  where
    S: Uni<T> + 'static,
    C: Fn() -> Duration + Send + Sync + 'static,
  {
    let started: Mutex<Option<Duration>> = Mutex::new(None);
    Self::new(source, move || {
      let now = clock();
      let mut started = started.lock();
      match *started {
        Some(at) if now.saturating_sub(at) < duration => false,
        Some(_) => {
          *started = Some(now);
          true
        }
        None => {
          *started = Some(now);
          false
        }
      }
    })
  }

  /// Whether an outcome is currently cached.
  pub fn is_cached(&self) -> bool { self.core.state.load(Ordering::Acquire) == CACHING }
}

impl<T: Clone + Send + 'static> Uni<T> for Memoize<T> {
  fn subscribe(&self, subscriber: UniSubscriberHandle<T>) {
    let core = &self.core;
    if guarded(|| Ok((core.invalidation)())).unwrap_or(false) {
      core.invalidate();
    }

    if core.state.load(Ordering::Acquire) == CACHING {
      let cached = core.outcome.lock().clone();
      if let Some(outcome) = cached {
        subscriber.on_subscribe(cancelled_uni());
        deliver(&subscriber, outcome);
        return;
      }
    }

    let id = core.next_id.fetch_add(1, Ordering::Relaxed);
    core.awaiting_subscription.lock().insert(id, subscriber);
    if core
      .state
      .compare_exchange(INIT, SUBSCRIBING, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      let generation = core.generation.fetch_add(1, Ordering::AcqRel) + 1;
      log_trace!("memoize subscribing upstream, generation {}", generation);
      core
        .upstream
        .subscribe(Arc::new(MemoizeUpstream { core: core.clone(), generation }));
    }
    core.drain();
  }
}

fn deliver<T>(subscriber: &UniSubscriberHandle<T>, outcome: Result<T>) {
  match outcome {
    Ok(item) => subscriber.on_item(item),
    Err(failure) => subscriber.on_failure(failure),
  }
}

impl<T: Clone + Send + 'static> MemoizeCore<T> {
  // A computation that has not been acknowledged yet is left alone; a
  // request arriving then is simply ignored.
  fn invalidate(&self) {
    let mut current = self.state.load(Ordering::Acquire);
    while current == SUBSCRIBED || current == CACHING {
      match self
        .state
        .compare_exchange(current, INIT, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          log_trace!("memoize cache invalidated");
          let live = self.upstream_subscription.lock().take();
          if let Some(live) = live {
            live.cancel();
          }
          return;
        }
        Err(actual) => current = actual,
      }
    }
  }

  fn drain(self: &Arc<Self>) {
    if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
      return;
    }
    let mut missed = 1;
    loop {
      let waiting = self.awaiting_subscription.lock().snapshot();
      for (id, subscriber) in waiting {
        match self.state.load(Ordering::Acquire) {
          SUBSCRIBED => {
            let moved = self.awaiting_subscription.lock().remove(id).is_some();
            if moved {
              self.awaiting_outcome.lock().insert(id, subscriber.clone());
              subscriber.on_subscribe(self.handle(id));
            }
          }
          CACHING => {
            let Some(outcome) = self.outcome.lock().clone() else { continue };
            let removed = self.awaiting_subscription.lock().remove(id).is_some();
            if removed {
              subscriber.on_subscribe(self.handle(id));
              deliver(&subscriber, outcome);
            }
          }
          _ => {}
        }
      }

      if self.state.load(Ordering::Acquire) == CACHING {
        let waiting = self.awaiting_outcome.lock().snapshot();
        for (id, subscriber) in waiting {
          let Some(outcome) = self.outcome.lock().clone() else { break };
          let removed = self.awaiting_outcome.lock().remove(id).is_some();
          if removed {
            deliver(&subscriber, outcome);
          }
        }
      }

      missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        break;
      }
    }
  }

  fn handle(self: &Arc<Self>, id: usize) -> UniSubscriptionHandle {
    Arc::new(MemoizedSubscription { core: self.clone(), id })
  }

  fn is_current(&self, generation: usize) -> bool {
    self.generation.load(Ordering::Acquire) == generation
  }

  // The outcome lock orders this against the acknowledgement of a newer
  // generation, so a matching generation plus a won exchange means the
  // outcome belongs to the live computation.
  fn resolve(self: &Arc<Self>, generation: usize, outcome: Result<T>) {
    {
      let mut cached = self.outcome.lock();
      if !self.is_current(generation)
        || self
          .state
          .compare_exchange(SUBSCRIBED, CACHING, Ordering::AcqRel, Ordering::Acquire)
          .is_err()
      {
        return;
      }
      *cached = Some(outcome);
      self.upstream_subscription.lock().take();
    }
    self.drain();
  }
}

/// The memoizer's own subscriber to the upstream.
struct MemoizeUpstream<T> {
  core: Arc<MemoizeCore<T>>,
  generation: usize,
}

impl<T: Clone + Send + 'static> UniSubscriber<T> for MemoizeUpstream<T> {
  fn on_subscribe(&self, subscription: UniSubscriptionHandle) {
    if !self.core.is_current(self.generation) {
      subscription.cancel();
      return;
    }
    *self.core.upstream_subscription.lock() = Some(subscription.clone());
    let acknowledged = {
      let _resolving = self.core.outcome.lock();
      self
        .core
        .state
        .compare_exchange(SUBSCRIBING, SUBSCRIBED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    };
    if acknowledged {
      self.core.drain();
    } else {
      subscription.cancel();
    }
  }

  fn on_item(&self, item: T) { self.core.resolve(self.generation, Ok(item)); }

  fn on_failure(&self, failure: Failure) { self.core.resolve(self.generation, Err(failure)); }
}

/// Handle issued to a memoized consumer. Cancelling only withdraws that
/// consumer; the shared upstream keeps running for the others.
struct MemoizedSubscription<T> {
  core: Arc<MemoizeCore<T>>,
  id: usize,
}

impl<T: Clone + Send + 'static> UniSubscription for MemoizedSubscription<T> {
  fn cancel(&self) {
    self.core.awaiting_subscription.lock().remove(self.id);
    self.core.awaiting_outcome.lock().remove(self.id);
    self.core.drain();
  }
}
