//! Control handles flowing from producers to consumers.
//!
//! A single-result flow hands its consumer a [`UniSubscription`], which can
//! only be cancelled. A multi-result flow hands out a [`Subscription`], which
//! additionally grants demand with [`Subscription::request`].
//!
//! Handles are shared (`Arc`) because signals may arrive on another thread
//! before `on_subscribe` has even returned, and the consumer may cancel from
//! yet another one.

use std::sync::Arc;

mod dynamic;
mod slot;
mod terminal;

pub use dynamic::DynamicSubscribers;
pub use slot::{Latch, SubscriptionSlot};
pub use terminal::TerminalGuard;

// ============================================================================
// Handle traits
// ============================================================================

/// Handle of a single-result subscription.
pub trait UniSubscription: Send + Sync {
  /// Stop caring about the outcome. Idempotent, and a no-op once the terminal
  /// signal has been latched.
  fn cancel(&self);
}

/// Handle of a credit-based multi-result subscription.
pub trait Subscription: Send + Sync {
  /// Grant `n` more items of demand. `n` must be positive.
  fn request(&self, n: u64);

  /// Stop the flow. Idempotent.
  fn cancel(&self);
}

/// Shared single-result handle.
pub type UniSubscriptionHandle = Arc<dyn UniSubscription>;

/// Shared multi-result handle.
pub type SubscriptionHandle = Arc<dyn Subscription>;

// ============================================================================
// Stock handles
// ============================================================================

/// A handle for flows that are already over.
///
/// Issued when a consumer is served synchronously from a known outcome, or
/// when a flow fails before a live subscription could be established.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cancelled;

impl UniSubscription for Cancelled {
  #[inline]
  fn cancel(&self) {}
}

impl Subscription for Cancelled {
  #[inline]
  fn request(&self, _n: u64) {}

  #[inline]
  fn cancel(&self) {}
}

/// A shared [`Cancelled`] single-result handle.
pub fn cancelled_uni() -> UniSubscriptionHandle { Arc::new(Cancelled) }

/// A shared [`Cancelled`] multi-result handle.
pub fn cancelled() -> SubscriptionHandle { Arc::new(Cancelled) }

/// Adapts a closure into a single-result handle.
///
/// The closure may be called more than once; wrap the body in a
/// [`TerminalGuard`] when it must run only once.
pub struct CancelFn<F>(pub F);

impl<F> UniSubscription for CancelFn<F>
where
  F: Fn() + Send + Sync,
{
  #[inline]
  fn cancel(&self) { (self.0)() }
}

/// Single-result handle whose cancellation only latches a guard.
///
/// Sources that know their outcome up front check the guard before emitting.
pub struct GuardSubscription(pub Arc<TerminalGuard>);

impl UniSubscription for GuardSubscription {
  #[inline]
  fn cancel(&self) { self.0.try_terminate(); }
}

impl<S: UniSubscription + ?Sized> UniSubscription for Arc<S> {
  #[inline]
  fn cancel(&self) { (**self).cancel() }
}

impl<S: Subscription + ?Sized> Subscription for Arc<S> {
  #[inline]
  fn request(&self, n: u64) { (**self).request(n) }

  #[inline]
  fn cancel(&self) { (**self).cancel() }
}
