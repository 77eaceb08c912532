//! Domain-aware logging macros.
//!
//! Each macro injects a `domain` field so log consumers can filter by
//! subsystem: `sys` (process lifecycle), `conf` (configuration and
//! compilation), `pipe` (pipeline execution) and `io` (reading input and
//! writing output).
//!
//! ```ignore
//! rv_info!(sys, script = %path.display(), "session ready");
//! rv_warn!(io, line = n, error = %e, "skipping malformed input line");
//! ```
//!
//! The domain is a bare identifier, turned into a string literal by the
//! macro.

#[doc(hidden)]
macro_rules! rv_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

#[allow(unused_macros)]
macro_rules! rv_error {
    ($domain:ident, $($rest:tt)*) => {
        rv_log!(error, $domain, $($rest)*)
    };
}

macro_rules! rv_warn {
    ($domain:ident, $($rest:tt)*) => {
        rv_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! rv_info {
    ($domain:ident, $($rest:tt)*) => {
        rv_log!(info, $domain, $($rest)*)
    };
}

macro_rules! rv_debug {
    ($domain:ident, $($rest:tt)*) => {
        rv_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
macro_rules! rv_trace {
    ($domain:ident, $($rest:tt)*) => {
        rv_log!(trace, $domain, $($rest)*)
    };
}
