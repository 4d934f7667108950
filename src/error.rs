//! Failure values carried by terminal signals.
//!
//! Every operator in this crate reports problems through [`Failure`]. It is
//! cheap to clone because a memoized outcome is handed to any number of late
//! subscribers, and it can merge several causes into a
//! [`Failure::Composite`] so a hook failure never hides the upstream one.

use std::{any::Any, error::Error as StdError, sync::Arc, time::Duration};

/// The failure half of every terminal signal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Failure {
  /// A failure raised by user code or by an upstream producer.
  #[error(transparent)]
  User(Arc<dyn StdError + Send + Sync>),

  /// A failure described only by text.
  #[error("{0}")]
  Message(String),

  /// Several failures that all need to reach the consumer.
  #[error("multiple failures: [{}]", join_causes(.0))]
  Composite(Vec<Failure>),

  /// Default failure of a deadline that elapsed.
  #[error("did not complete within {0:?}")]
  Timeout(Duration),

  /// A failure supplier ran but produced nothing to deliver.
  #[error("supplier produced no failure")]
  SupplierProducedNone,

  /// The scheduling capability refused to accept a task.
  #[error("scheduler rejected the task: {0}")]
  Rejected(String),

  /// A source that supports a single subscriber was subscribed twice.
  #[error("only one subscriber allowed")]
  SingleSubscriberOnly,

  /// Demand must be strictly positive.
  #[error("invalid request of {0} items, demand must be positive")]
  InvalidRequest(u64),

  /// A user callback panicked while the engine was running it.
  #[error("callback panicked: {0}")]
  Panicked(String),
}

fn join_causes(causes: &[Failure]) -> String {
  causes.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl Failure {
  /// Wrap any error produced by user code.
  pub fn user(error: impl StdError + Send + Sync + 'static) -> Self { Self::User(Arc::new(error)) }

  /// A failure carrying only a message.
  pub fn msg(message: impl Into<String>) -> Self { Self::Message(message.into()) }

  /// Merge two failures, keeping both.
  ///
  /// Nested composites are flattened so the result lists every leaf cause in
  /// the order they happened.
  pub fn composite(first: Failure, second: Failure) -> Self {
    let mut causes = Vec::with_capacity(2);
    for failure in [first, second] {
      match failure {
        Self::Composite(inner) => causes.extend(inner),
        other => causes.push(other),
      }
    }
    Self::Composite(causes)
  }

  /// The leaf causes of this failure. A non-composite failure is its own
  /// single cause.
  pub fn causes(&self) -> Vec<&Failure> {
    match self {
      Self::Composite(inner) => inner.iter().flat_map(Failure::causes).collect(),
      other => vec![other],
    }
  }

  #[must_use]
  pub const fn is_timeout(&self) -> bool { matches!(self, Self::Timeout(_)) }

  #[must_use]
  pub const fn is_composite(&self) -> bool { matches!(self, Self::Composite(_)) }

  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
      (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
      text.clone()
    } else {
      "non-string panic payload".to_string()
    };
    Self::Panicked(message)
  }
}

impl From<&str> for Failure {
  fn from(message: &str) -> Self { Self::msg(message) }
}

impl From<String> for Failure {
  fn from(message: String) -> Self { Self::Message(message) }
}

/// Result of any fallible hook or supplier.
pub type Result<T> = std::result::Result<T, Failure>;

/// Run a user callback, turning a panic into a [`Failure::Panicked`].
///
/// Signal boundaries must never be crossed by an unwinding panic, so every
/// hook invocation site goes through here.
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
  std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
    .unwrap_or_else(|payload| Err(Failure::from_panic(payload)))
}
