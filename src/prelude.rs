//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Failures
pub use crate::error::Failure;
// Multi-result protocol and operators
pub use crate::multi::{Multi, MultiExt, MultiSubscriber, MultiSubscriberHandle};
pub use crate::ops::{
  from_read_stream::{from_read_stream, MultiReadStream},
  memoize::Memoize,
  on_signal::SignalHooks,
};
// Push sources
pub use crate::read_stream::{BufferedReadStream, ReadStream};
// Schedulers
#[cfg(feature = "futures-scheduler")]
pub use crate::scheduler::ThreadPoolScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use crate::scheduler::TokioScheduler;
pub use crate::scheduler::{Scheduler, TaskHandle, TestScheduler};
// Subscriptions
pub use crate::subscription::{
  cancelled, cancelled_uni, Subscription, SubscriptionHandle, TerminalGuard, UniSubscription,
  UniSubscriptionHandle,
};
// Single-result protocol and operators
pub use crate::uni::{self, Uni, UniExt, UniSubscriber, UniSubscriberHandle};
