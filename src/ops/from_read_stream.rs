use std::sync::{
  atomic::{AtomicU8, Ordering},
  Arc, Weak,
};

use once_cell::sync::OnceCell;

use crate::{
  error::{guarded, Failure},
  infrastructure::handle_dropped_exception,
  log::log_debug,
  multi::{Multi, MultiSubscriberHandle},
  read_stream::{EndHandler, ExceptionHandler, ItemHandler, ReadStream},
  subscription::{cancelled, Subscription},
};

const IDLE: u8 = 0;
// Subscribed, handlers still being installed.
const ATTACHING: u8 = 1;
const ACTIVE: u8 = 2;
// Released while attaching; the attaching thread gives the source back.
const RELEASING: u8 = 3;
const RELEASED: u8 = 4;

/// Exposes a pausable [`ReadStream`] as a credit-based [`Multi`].
///
/// The source is paused on construction and every downstream request becomes
/// a `fetch`. Only one subscriber is ever accepted. Cancellation, the end of
/// the stream and a stream failure all release the source the same way:
/// handlers detached, source resumed, exactly once.
pub struct MultiReadStream<T, R> {
  inner: Arc<BridgeInner<T, R>>,
}

struct BridgeInner<T, R> {
  source: Box<dyn ReadStream<T>>,
  transform: Box<dyn Fn(T) -> R + Send + Sync>,
  state: AtomicU8,
  downstream: OnceCell<MultiSubscriberHandle<R>>,
}

/// Bridge a read stream without transforming its items.
pub fn from_read_stream<T, S>(source: S) -> MultiReadStream<T, T>
where
  T: Send + 'static,
  S: ReadStream<T> + 'static,
{
  MultiReadStream::new(source, |item| item)
}

impl<T, R> MultiReadStream<T, R>
where
  T: Send + 'static,
  R: Send + 'static,
{
  pub fn new<S, F>(source: S, transform: F) -> Self
  where
    S: ReadStream<T> + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
  {
    source.pause();
    Self {
      inner: Arc::new(BridgeInner {
        source: Box::new(source),
        transform: Box::new(transform),
        state: AtomicU8::new(IDLE),
        downstream: OnceCell::new(),
      }),
    }
  }
}

impl<T, R> Multi<R> for MultiReadStream<T, R>
where
  T: Send + 'static,
  R: Send + 'static,
{
  fn subscribe(&self, subscriber: MultiSubscriberHandle<R>) {
    let inner = &self.inner;
    if inner
      .state
      .compare_exchange(IDLE, ATTACHING, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      log_debug!("read stream bridge refused a second subscriber");
      subscriber.on_subscribe(cancelled());
      subscriber.on_error(Failure::SingleSubscriberOnly);
      return;
    }
    let _ = inner.downstream.set(subscriber.clone());
    subscriber.on_subscribe(Arc::new(BridgeSubscription { inner: inner.clone() }));

    // Handlers go in after the downstream holds its subscription, so an
    // already-ended source cannot complete it first. Demand requested in the
    // meantime stays buffered in the source. Once released, nothing more is
    // installed.
    let weak = Arc::downgrade(inner);
    let on_item: ItemHandler<T> = {
      let weak = weak.clone();
      Arc::new(move |item: T| with_bridge(&weak, |bridge| bridge.on_item(item)))
    };
    let on_exception: ExceptionHandler = {
      let weak = weak.clone();
      Arc::new(move |failure: Failure| match weak.upgrade() {
        Some(bridge) => bridge.on_exception(failure),
        None => handle_dropped_exception(failure),
      })
    };
    let on_end: EndHandler = Arc::new(move || with_bridge(&weak, |bridge| bridge.on_end()));
    if inner.is_attaching() {
      inner.source.handler(Some(on_item));
    }
    if inner.is_attaching() {
      inner.source.exception_handler(Some(on_exception));
    }
    if inner.is_attaching() {
      inner.source.end_handler(Some(on_end));
    }

    if inner
      .state
      .compare_exchange(ATTACHING, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      // Released while attaching: the source is detached before it resumes,
      // so nothing buffered is drained into a released bridge.
      inner.give_back();
      inner.state.store(RELEASED, Ordering::Release);
    }
  }
}

fn with_bridge<T, R>(weak: &Weak<BridgeInner<T, R>>, f: impl FnOnce(&BridgeInner<T, R>)) {
  if let Some(bridge) = weak.upgrade() {
    f(&bridge);
  }
}

impl<T, R> BridgeInner<T, R> {
  fn is_active(&self) -> bool { matches!(self.state.load(Ordering::Acquire), ATTACHING | ACTIVE) }

  fn is_attaching(&self) -> bool { self.state.load(Ordering::Acquire) == ATTACHING }

  /// Give the source back. Returns the downstream to the single caller that
  /// won the release.
  fn release(&self) -> Option<MultiSubscriberHandle<R>> {
    loop {
      match self.state.load(Ordering::Acquire) {
        ATTACHING => {
          if self
            .state
            .compare_exchange(ATTACHING, RELEASING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
          {
            return self.downstream.get().cloned();
          }
        }
        ACTIVE => {
          if self
            .state
            .compare_exchange(ACTIVE, RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
          {
            self.give_back();
            return self.downstream.get().cloned();
          }
        }
        _ => return None,
      }
    }
  }

  fn give_back(&self) {
    self.detach();
    self.source.resume();
  }

  fn detach(&self) {
    self.source.handler(None);
    self.source.end_handler(None);
    self.source.exception_handler(None);
  }

  fn on_item(&self, item: T) {
    if !self.is_active() {
      return;
    }
    match guarded(|| Ok((self.transform)(item))) {
      Ok(mapped) => {
        if let Some(downstream) = self.downstream.get() {
          downstream.on_next(mapped);
        }
      }
      Err(failure) => {
        if let Some(downstream) = self.release() {
          downstream.on_error(failure);
        }
      }
    }
  }

  fn on_end(&self) {
    if let Some(downstream) = self.release() {
      downstream.on_complete();
    }
  }

  fn on_exception(&self, failure: Failure) {
    match self.release() {
      Some(downstream) => downstream.on_error(failure),
      None => handle_dropped_exception(failure),
    }
  }
}

struct BridgeSubscription<T, R> {
  inner: Arc<BridgeInner<T, R>>,
}

impl<T, R> Subscription for BridgeSubscription<T, R>
where
  T: Send + 'static,
  R: Send + 'static,
{
  fn request(&self, n: u64) {
    if n == 0 {
      if let Some(downstream) = self.inner.release() {
        downstream.on_error(Failure::InvalidRequest(n));
      }
      return;
    }
    if self.inner.is_active() {
      self.inner.source.fetch(n);
    }
  }

  fn cancel(&self) { let _ = self.inner.release(); }
}
