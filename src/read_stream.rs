//! Push-style data sources with pause/resume and bounded fetching.
//!
//! A [`ReadStream`] pushes items into a handler. It is *flowing* after
//! [`resume`](ReadStream::resume) and delivers only what was
//! [`fetch`](ReadStream::fetch)ed after [`pause`](ReadStream::pause).
//! Implementations invoke their handlers sequentially, never concurrently.
//!
//! [`MultiReadStream`](crate::ops::from_read_stream::MultiReadStream) turns
//! such a source into a credit-based [`Multi`](crate::multi::Multi).

use std::sync::Arc;

use crate::error::Failure;

mod buffered;

pub use buffered::BufferedReadStream;

pub type ItemHandler<T> = Arc<dyn Fn(T) + Send + Sync>;
pub type EndHandler = Arc<dyn Fn() + Send + Sync>;
pub type ExceptionHandler = Arc<dyn Fn(Failure) + Send + Sync>;

/// A pausable push source.
pub trait ReadStream<T>: Send + Sync {
  /// Stop delivering items and drop any outstanding fetched demand.
  fn pause(&self);

  /// Deliver items as they come, without counting demand.
  fn resume(&self);

  /// Deliver `n` more items, then pause again.
  fn fetch(&self, n: u64);

  /// Set or detach the item handler.
  fn handler(&self, handler: Option<ItemHandler<T>>);

  /// Set or detach the end-of-stream handler.
  fn end_handler(&self, handler: Option<EndHandler>);

  /// Set or detach the failure handler.
  fn exception_handler(&self, handler: Option<ExceptionHandler>);
}

impl<T, S: ReadStream<T> + ?Sized> ReadStream<T> for Arc<S> {
  #[inline]
  fn pause(&self) { (**self).pause() }

  #[inline]
  fn resume(&self) { (**self).resume() }

  #[inline]
  fn fetch(&self, n: u64) { (**self).fetch(n) }

  #[inline]
  fn handler(&self, handler: Option<ItemHandler<T>>) { (**self).handler(handler) }

  #[inline]
  fn end_handler(&self, handler: Option<EndHandler>) { (**self).end_handler(handler) }

  #[inline]
  fn exception_handler(&self, handler: Option<ExceptionHandler>) {
    (**self).exception_handler(handler)
  }
}
