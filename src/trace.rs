//! Compile-time observability switches.
//!
//! Three channels, each a cargo feature: `trace-mem` for pool activity,
//! `trace-dispatch` for loop decisions, and `runtime-warnings` for the
//! lag/duration warnings (those are also on whenever `debug_assertions`
//! are). Everything routes through the `log` facade; with the features
//! off the calls compile to nothing.

macro_rules! trace_mem {
    ($($arg:tt)*) => {
        if cfg!(feature = "trace-mem") {
            log::trace!(target: "naptick::mem", $($arg)*);
        }
    };
}

macro_rules! trace_dispatch {
    ($($arg:tt)*) => {
        if cfg!(feature = "trace-dispatch") {
            log::trace!(target: "naptick::dispatch", $($arg)*);
        }
    };
}

macro_rules! runtime_warn {
    ($($arg:tt)*) => {
        if cfg!(any(debug_assertions, feature = "runtime-warnings")) {
            log::warn!(target: "naptick", $($arg)*);
        }
    };
}

pub(crate) use {runtime_warn, trace_dispatch, trace_mem};
