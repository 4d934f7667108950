//! Operators. Each is usually reached through [`UniExt`](crate::uni::UniExt)
//! or [`MultiExt`](crate::multi::MultiExt); the types are public so pipelines
//! can be named and stored.

pub mod fail_on_timeout;
pub mod from_read_stream;
pub mod memoize;
pub mod on_cancellation_call;
pub mod on_signal;
pub mod on_subscribe_invoke;
pub mod to_multi;
