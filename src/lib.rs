//! # rxsignal: race-free signal delivery for reactive flows
//!
//! Operators for two asynchronous protocols:
//!
//! - **Uni**: a lazy producer of exactly one terminal signal, an item or a
//!   failure.
//! - **Multi**: a credit-based stream where the consumer grants demand with
//!   `request(n)` and the producer answers with at most that many items
//!   followed by one terminal signal.
//!
//! Every operator tolerates signals arriving concurrently from different
//! threads: terminal transitions are latched with compare-and-swap, and
//! consumers waiting on shared state are served by a single drain worker.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rxsignal::{prelude::*, testing::UniRecorder};
//!
//! let scheduler = TestScheduler::new();
//! let recorder = UniRecorder::<&str>::new();
//! uni::never::<&str>()
//!   .fail_on_timeout(Duration::from_secs(1), scheduler.clone())
//!   .subscribe(recorder.clone());
//!
//! scheduler.advance_by(Duration::from_secs(1));
//! assert!(recorder.failure().is_some_and(|f| f.is_timeout()));
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Uni`] / [`Multi`] | The two producer protocols |
//! | [`UniExt`] / [`MultiExt`] | Operators attached fluently |
//! | [`Failure`] | The one failure type every terminal signal carries |
//! | [`Scheduler`] | Delayed-task capability used by deadlines |
//! | [`ReadStream`] | Pausable push source bridged by [`MultiReadStream`] |
//!
//! ## Feature Flags
//!
//! - **`futures-scheduler`** (default): [`ThreadPoolScheduler`] on a `futures`
//!   thread pool
//! - **`tokio-scheduler`**: `TokioScheduler` on the current tokio runtime
//! - **`tracing`** (default): internal diagnostics through `tracing`
//!
//! [`Uni`]: uni::Uni
//! [`Multi`]: multi::Multi
//! [`UniExt`]: uni::UniExt
//! [`MultiExt`]: multi::MultiExt
//! [`Failure`]: error::Failure
//! [`Scheduler`]: scheduler::Scheduler
//! [`ReadStream`]: read_stream::ReadStream
//! [`MultiReadStream`]: ops::from_read_stream::MultiReadStream
//! [`ThreadPoolScheduler`]: scheduler::ThreadPoolScheduler

mod log;

pub mod error;
pub mod infrastructure;
pub mod multi;
pub mod ops;
pub mod prelude;
pub mod read_stream;
pub mod scheduler;
pub mod subscription;
pub mod testing;
pub mod uni;

// Re-export the prelude module
pub use prelude::*;

#[cfg(doctest)]
mod __markdown_doctests {
  mod readme {
    #![doc = include_str!("../README.md")]
  }
}
