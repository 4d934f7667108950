use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use super::{EndHandler, ExceptionHandler, ItemHandler, ReadStream};
use crate::{error::Failure, log::log_debug};

// Demand value meaning "flowing": items are not counted.
const FLOWING: u64 = u64::MAX;

struct Handlers<T> {
  item: Option<ItemHandler<T>>,
  end: Option<EndHandler>,
  exception: Option<ExceptionHandler>,
}

impl<T> Clone for Handlers<T> {
  fn clone(&self) -> Self {
    Self { item: self.item.clone(), end: self.end.clone(), exception: self.exception.clone() }
  }
}

struct Inner<T> {
  queue: Mutex<VecDeque<T>>,
  capacity: Option<usize>,
  demand: AtomicU64,
  ended: AtomicBool,
  failure: Mutex<Option<Failure>>,
  done: AtomicBool,
  wip: AtomicUsize,
  handlers: Mutex<Handlers<T>>,
}

/// An in-memory [`ReadStream`] fed by hand.
///
/// Writers push items with [`write`](Self::write) and finish with
/// [`end`](Self::end) or [`fail`](Self::fail). Items are buffered while the
/// stream is paused, out of demand, or has no item handler. The end is
/// delivered once the buffer is drained; a failure is delivered right away
/// and discards whatever is still buffered.
///
/// Handlers run on the thread that made them runnable (a `write`, `fetch`,
/// `resume` or handler installation), one at a time.
pub struct BufferedReadStream<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for BufferedReadStream<T> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<T: Send + 'static> Default for BufferedReadStream<T> {
  fn default() -> Self { Self::build(None) }
}

impl<T: Send + 'static> BufferedReadStream<T> {
  /// An unbounded, flowing stream.
  pub fn new() -> Self { Self::build(None) }

  /// A flowing stream reporting [`is_full`](Self::is_full) once `capacity`
  /// items are buffered. Writes are still accepted past that mark; the flag is
  /// the writer's cue to back off.
  pub fn with_capacity(capacity: usize) -> Self { Self::build(Some(capacity)) }

  fn build(capacity: Option<usize>) -> Self {
    Self {
      inner: Arc::new(Inner {
        queue: Mutex::new(capacity.map_or_else(VecDeque::new, VecDeque::with_capacity)),
        capacity,
        demand: AtomicU64::new(FLOWING),
        ended: AtomicBool::new(false),
        failure: Mutex::new(None),
        done: AtomicBool::new(false),
        wip: AtomicUsize::new(0),
        handlers: Mutex::new(Handlers { item: None, end: None, exception: None }),
      }),
    }
  }

  /// Buffer `item` for delivery. Returns `false`, discarding the item, once
  /// the stream has been ended or failed.
  pub fn write(&self, item: T) -> bool {
    if self.is_closed() {
      log_debug!("write after the read stream was closed");
      return false;
    }
    self.inner.queue.lock().push_back(item);
    self.inner.drain();
    true
  }

  /// No more items will be written.
  pub fn end(&self) {
    self.inner.ended.store(true, Ordering::Release);
    self.inner.drain();
  }

  /// Fail the stream. Buffered items are discarded.
  pub fn fail(&self, failure: impl Into<Failure>) {
    if self.is_closed() {
      return;
    }
    self.inner.ended.store(true, Ordering::Release);
    self.inner.queue.lock().clear();
    *self.inner.failure.lock() = Some(failure.into());
    self.inner.drain();
  }

  /// Items buffered and not yet delivered.
  pub fn len(&self) -> usize { self.inner.queue.lock().len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  pub fn is_full(&self) -> bool { self.inner.capacity.is_some_and(|capacity| self.len() >= capacity) }

  /// `true` while no demand is outstanding and the stream is not flowing.
  pub fn is_paused(&self) -> bool { self.inner.demand.load(Ordering::Acquire) == 0 }

  /// Whether any handler is attached.
  pub fn has_handlers(&self) -> bool {
    let handlers = self.inner.handlers.lock();
    handlers.item.is_some() || handlers.end.is_some() || handlers.exception.is_some()
  }

  fn is_closed(&self) -> bool { self.inner.ended.load(Ordering::Acquire) }
}

impl<T> Inner<T> {
  fn drain(&self) {
    if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
      return;
    }
    let mut missed = 1;
    loop {
      self.emit_pending();
      missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        break;
      }
    }
  }

  fn emit_pending(&self) {
    while !self.done.load(Ordering::Acquire) {
      let handlers = self.handlers.lock().clone();

      if let Some(on_exception) = &handlers.exception {
        let failure = self.failure.lock().take();
        if let Some(failure) = failure {
          self.done.store(true, Ordering::Release);
          on_exception(failure);
          return;
        }
      }

      if let Some(on_item) = &handlers.item {
        let item = {
          let mut queue = self.queue.lock();
          if !queue.is_empty() && self.consume_demand() { queue.pop_front() } else { None }
        };
        if let Some(item) = item {
          on_item(item);
          continue;
        }
      }

      if self.ended.load(Ordering::Acquire)
        && self.failure.lock().is_none()
        && self.queue.lock().is_empty()
      {
        if let Some(on_end) = &handlers.end {
          self.done.store(true, Ordering::Release);
          on_end();
        }
      }
      return;
    }
  }

  fn consume_demand(&self) -> bool {
    self
      .demand
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |demand| match demand {
        0 => None,
        FLOWING => Some(FLOWING),
        n => Some(n - 1),
      })
      .is_ok()
  }
}

impl<T: Send + 'static> ReadStream<T> for BufferedReadStream<T> {
  fn pause(&self) { self.inner.demand.store(0, Ordering::Release); }

  fn resume(&self) {
    self.inner.demand.store(FLOWING, Ordering::Release);
    self.inner.drain();
  }

  fn fetch(&self, n: u64) {
    let _ = self
      .inner
      .demand
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |demand| {
        Some(if demand == FLOWING { FLOWING } else { demand.saturating_add(n).min(FLOWING - 1) })
      });
    self.inner.drain();
  }

  fn handler(&self, handler: Option<ItemHandler<T>>) {
    self.inner.handlers.lock().item = handler;
    self.inner.drain();
  }

  fn end_handler(&self, handler: Option<EndHandler>) {
    self.inner.handlers.lock().end = handler;
    self.inner.drain();
  }

  fn exception_handler(&self, handler: Option<ExceptionHandler>) {
    self.inner.handlers.lock().exception = handler;
    self.inner.drain();
  }
}
