use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::time::Tick;

/// What the scheduler needs from its host: a wrapping tick clock and a way
/// to idle between events.
///
/// Critical sections are deliberately *not* part of this trait; they come
/// from the `critical-section` crate, whose provider the final application
/// selects. That split is what makes `sleep`/`sleep_until` callable with
/// the section held: on hardware the mask-then-WFE idiom wakes on pended
/// interrupts regardless, and the bundled hosted port compensates by
/// sleeping in bounded slices.
pub trait Platform {
    /// Ticks per second.
    const TIME_BASE: Tick;

    /// `2^W - 1` for the clock width `W`; every time value is stored
    /// masked by this.
    const TIME_MASK: Tick;

    /// One-shot host setup, called when a scheduler is materialized.
    fn init(&self) {}

    /// Current tick, wrapping modulo `TIME_MASK + 1`.
    fn now(&self) -> Tick;

    /// Idle until any external event. Called with the critical section
    /// held and an empty queue.
    fn sleep(&self);

    /// Idle until `until` (a forward modular target from `now`) or any
    /// earlier external event. Called with the critical section held.
    fn sleep_until(&self, now: Tick, until: Tick);
}

/// Hosted development port: millisecond ticks over a process-local origin.
///
/// The std critical-section provider is a plain mutex, so a thread posting
/// from "interrupt context" cannot break into a sleep the way a hardware
/// interrupt breaks into WFE. Sleeps are therefore capped at
/// [`StdPlatform::SLEEP_SLICE`]; the dispatch loop re-evaluates after every
/// wake, so cross-thread posts and stops are observed within one slice.
pub struct StdPlatform {
    origin: Instant,
}

impl StdPlatform {
    /// Upper bound on any single hosted sleep.
    pub const SLEEP_SLICE: Duration = Duration::from_millis(5);

    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for StdPlatform {
    const TIME_BASE: Tick = 1000;
    // Full width: the clock wraps roughly every 49.7 days.
    const TIME_MASK: Tick = u32::MAX;

    fn now(&self) -> Tick {
        (self.origin.elapsed().as_millis() & Self::TIME_MASK as u128) as Tick
    }

    fn sleep(&self) {
        thread::sleep(Self::SLEEP_SLICE);
    }

    fn sleep_until(&self, now: Tick, until: Tick) {
        let ticks = until.wrapping_sub(now) & Self::TIME_MASK;
        let ms = ticks as u64 * 1000 / Self::TIME_BASE as u64;
        thread::sleep(Duration::from_millis(ms).min(Self::SLEEP_SLICE));
    }
}

/// Shared handle onto a [`SimPlatform`] clock.
///
/// Cloneable and `Send`, so test callbacks can burn virtual time or
/// inspect when they ran.
#[derive(Clone)]
pub struct SimClock {
    ticks: Arc<AtomicU32>,
}

impl SimClock {
    pub fn get(&self) -> Tick {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn set(&self, t: Tick) {
        self.ticks.store(t, Ordering::Relaxed);
    }

    pub fn advance(&self, d: Tick) {
        self.ticks.fetch_add(d, Ordering::Relaxed);
    }
}

/// Deterministic virtual-clock platform for tests and benches.
///
/// `sleep_until` jumps the clock straight to the target, so simulated
/// hours run in microseconds, and a counter records every sleep for
/// coalescing assertions. `sleep` panics: with an empty queue a
/// simulation has no interrupt that could ever wake it.
pub struct SimPlatform<const MASK: u32 = { u32::MAX }, const BASE: u32 = 1000> {
    clock: SimClock,
    sleeps: Arc<AtomicUsize>,
}

impl<const MASK: u32, const BASE: u32> SimPlatform<MASK, BASE> {
    pub fn new() -> Self {
        const {
            assert!(MASK > 0, "mask must be non-zero");
            assert!(
                MASK & MASK.wrapping_add(1) == 0,
                "mask must be 2^W - 1 for some width W"
            );
            assert!(BASE > 0, "tick rate must be non-zero");
        }

        Self {
            clock: SimClock {
                ticks: Arc::new(AtomicU32::new(0)),
            },
            sleeps: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn clock(&self) -> SimClock {
        self.clock.clone()
    }

    /// Number of times the scheduler has gone to sleep so far.
    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::Relaxed)
    }
}

impl<const MASK: u32, const BASE: u32> Default for SimPlatform<MASK, BASE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MASK: u32, const BASE: u32> Platform for SimPlatform<MASK, BASE> {
    const TIME_BASE: Tick = BASE;
    const TIME_MASK: Tick = MASK;

    fn now(&self) -> Tick {
        self.clock.get() & MASK
    }

    fn sleep(&self) {
        panic!("simulated clock slept with nothing scheduled to wake it");
    }

    fn sleep_until(&self, _now: Tick, until: Tick) {
        self.sleeps.fetch_add(1, Ordering::Relaxed);
        self.clock.set(until & MASK);
    }
}
