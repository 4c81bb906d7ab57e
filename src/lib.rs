//! Cooperative deadline scheduler with wake coalescing.
//!
//! Callbacks are posted with a deadline and a temporal tolerance; the
//! dispatch loop runs them from a single main context and sleeps as late
//! as it can between events, so callbacks whose tolerance windows overlap
//! are batched into one processor wake. Time is a wrapping finite-width
//! tick counter supplied by a [`Platform`]; posting and cancelling are
//! safe from interrupt context via the `critical-section` crate.
//!
//! ```no_run
//! type Host = naptick::Scheduler<naptick::StdPlatform>;
//!
//! naptick::post(|| println!("tick"))
//!     .delay(Host::ms_to_ticks(500))
//!     .tolerance(Host::ms_to_ticks(100));
//! naptick::start();
//! ```

mod callback;
mod heap;
mod platform;
mod pool;
mod scheduler;
mod time;
mod trace;

pub use callback::Callback;
pub use platform::{Platform, SimClock, SimPlatform, StdPlatform};
pub use scheduler::{
    cancel, instance, now, post, start, stop, CallbackHandle, Post, Scheduler, ToleranceTooWide,
};
pub use time::Tick;

/// Number of queued callbacks to look ahead when choosing the optimal
/// batch to execute. The dispatcher currently always picks the heap root;
/// this is reserved for a smarter coalescing pass.
pub const OPTIMISE_LOOKAHEAD: usize = 5;

/// Warn when a single callback runs longer than this.
pub const WARN_DURATION_MS: u32 = 10;

/// Warn when the loop dispatches this far behind schedule.
pub const WARN_LAG_MS: u32 = 500;

/// Eligibility half-width applied when a posting does not choose one.
pub const DEFAULT_TOLERANCE_MS: u32 = 50;

/// Callback slots preallocated by a fresh scheduler.
pub const INITIAL_EVENT_POOL: usize = 50;

/// Slots added per pool growth; pool memory is never returned.
pub const EVENT_POOL_GROWTH: usize = 100;
