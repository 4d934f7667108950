// Conditional logging shim: forwards to `tracing` when the feature is on and
// compiles the arguments away otherwise.

#[cfg(feature = "tracing")]
macro_rules! log_warn {
  ($($arg:tt)*) => {{
    tracing::warn!($($arg)*);
  }};
}

#[cfg(feature = "tracing")]
macro_rules! log_debug {
  ($($arg:tt)*) => {{
    tracing::debug!($($arg)*);
  }};
}

#[cfg(feature = "tracing")]
macro_rules! log_trace {
  ($($arg:tt)*) => {{
    tracing::trace!($($arg)*);
  }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
  ($($arg:tt)*) => {{
    if false {
      let _ = format_args!($($arg)*);
    }
  }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_debug {
  ($($arg:tt)*) => {{
    if false {
      let _ = format_args!($($arg)*);
    }
  }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_trace {
  ($($arg:tt)*) => {{
    if false {
      let _ = format_args!($($arg)*);
    }
  }};
}

pub(crate) use log_debug;
pub(crate) use log_trace;
pub(crate) use log_warn;
