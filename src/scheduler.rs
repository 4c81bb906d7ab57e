use std::cell::RefCell;
use std::sync::OnceLock;

use critical_section::Mutex;

use crate::callback::{Callback, CallbackNode};
use crate::heap::DeadlineHeap;
use crate::platform::{Platform, StdPlatform};
use crate::pool::{Key, Pool};
use crate::time::{self, Tick};
use crate::trace::{runtime_warn, trace_dispatch};
use crate::{
    DEFAULT_TOLERANCE_MS, EVENT_POOL_GROWTH, INITIAL_EVENT_POOL, WARN_DURATION_MS, WARN_LAG_MS,
};

/// A tolerance at least half the clock range would make "early" and "late"
/// indistinguishable on the wrapped arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tolerance {0:#x} exceeds half the clock range")]
pub struct ToleranceTooWide(pub Tick);

/// Identity of a queued callback, returned by posting and accepted by
/// [`Scheduler::cancel`].
///
/// Handles are cheap copies and stay harmless after the callback has fired
/// or been cancelled: the slot generation baked into the handle stops
/// matching, so a late `cancel` simply reports `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub(crate) Key);

struct State {
    heap: DeadlineHeap,
    pool: Pool<CallbackNode>,
    /// Epoch for heap ordering: the origin of the forward arc. Only ever
    /// advances (modulo the clock), and never past the root's deadline.
    last_dispatch: Tick,
    /// The virtual "now" reported to callbacks: the intended execution
    /// time of whatever is running, not the wall clock.
    current_dispatch: Tick,
    stop: bool,
}

/// Work selected for execution, carried out of the critical section.
struct Firing {
    key: Key,
    cb: Option<Callback>,
    periodic: bool,
}

enum Step {
    Fire(Firing),
    Slept,
    Stopped,
}

/// Cooperative deadline scheduler over a [`Platform`].
///
/// Callbacks are posted with a deadline and a tolerance; the dispatch loop
/// fires whichever queued callback's latest-acceptable time falls inside
/// the current window and otherwise sleeps as long as it possibly can, so
/// callbacks with overlapping windows share a single wake.
///
/// All shared state lives behind the process's `critical-section`
/// provider, which is what makes [`post`](Scheduler::post) and
/// [`cancel`](Scheduler::cancel) safe to call from interrupt handlers
/// while the loop runs on the main context. Callbacks themselves always
/// run with the section released.
pub struct Scheduler<P: Platform> {
    state: Mutex<RefCell<State>>,
    platform: P,
}

impl<P: Platform> Scheduler<P> {
    /// Set up a scheduler over `platform`, running its one-shot init.
    pub fn new(platform: P) -> Self {
        platform.init();
        let now = time::wrap(platform.now(), P::TIME_MASK);

        Self {
            state: Mutex::new(RefCell::new(State {
                heap: DeadlineHeap::new(),
                pool: Pool::new(INITIAL_EVENT_POOL, EVENT_POOL_GROWTH),
                last_dispatch: now,
                current_dispatch: now,
                stop: false,
            })),
            platform,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Queue `callback` for execution. Returns a builder; the posting
    /// takes effect when the builder is consumed by
    /// [`handle`](Post::handle) or dropped, whichever comes first.
    pub fn post(&self, callback: impl Into<Callback>) -> Post<'_, P> {
        Post {
            scheduler: self,
            cb: Some(callback.into()),
            delay: 0,
            tolerance: Self::ms_to_ticks(DEFAULT_TOLERANCE_MS),
            period: 0,
        }
    }

    /// Remove a queued callback. `true` if it was found and removed,
    /// `false` if it already fired, was already cancelled, or never
    /// existed. A cancel racing a fire resolves inside the critical
    /// section to exactly one of those outcomes.
    pub fn cancel(&self, handle: CallbackHandle) -> bool {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if state
                .heap
                .remove(handle.0, &state.pool, state.last_dispatch, P::TIME_MASK)
            {
                state.pool.remove(handle.0);
                true
            } else {
                false
            }
        })
    }

    /// The scheduled execution time of the current callback.
    ///
    /// This lags the wall clock when the system is busy, and it is NOT
    /// monotonic: callbacks executed out of their scheduled order observe
    /// it jumping backwards.
    pub fn now(&self) -> Tick {
        critical_section::with(|cs| self.state.borrow_ref(cs).current_dispatch)
    }

    /// Number of queued callbacks.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).heap.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Request the dispatch loop to exit after its current iteration.
    /// Returns a snapshot of the queue size.
    pub fn stop(&self) -> usize {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.stop = true;
            state.heap.len()
        })
    }

    /// Run the dispatch loop until [`stop`](Scheduler::stop). Returns the
    /// number of callbacks still queued. Calling `start` again after a
    /// stop resumes dispatching.
    pub fn start(&self) -> usize {
        let warn_lag = warn_threshold(WARN_LAG_MS, P::TIME_BASE, P::TIME_MASK);
        let warn_duration = warn_threshold(WARN_DURATION_MS, P::TIME_BASE, P::TIME_MASK);

        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).stop = false;
        });

        loop {
            let step = critical_section::with(|cs| {
                let mut state = self.state.borrow_ref_mut(cs);
                self.inspect(&mut state, warn_lag)
            });

            match step {
                Step::Stopped => break,
                Step::Slept => {}
                Step::Fire(firing) => self.dispatch(firing, warn_duration),
            }
        }

        critical_section::with(|cs| self.state.borrow_ref(cs).heap.len())
    }

    /// One loop iteration under the critical section: pick eligible work,
    /// or sleep.
    fn inspect(&self, state: &mut State, warn_lag: Tick) -> Step {
        if state.stop {
            return Step::Stopped;
        }

        let mask = P::TIME_MASK;
        let now = time::wrap(self.platform.now(), mask);

        let Some(root) = state.heap.peek() else {
            state.last_dispatch = now;
            trace_dispatch!("queue empty, sleeping");
            self.platform.sleep();
            // Make sure callbacks posted by the interrupt handlers we are
            // about to take observe a fresh time.
            state.current_dispatch = time::wrap(self.platform.now(), mask);
            return Step::Slept;
        };

        let (call_before, tolerance, interval) = {
            let node = &state.pool[root];
            (node.call_before, node.tolerance, node.interval)
        };

        // The root fires now iff its latest-acceptable tick lies on the
        // forward arc from the epoch to now + tolerance. The tolerance was
        // doubled at posting, so this yields the caller's symmetric
        // fire-early-or-on-time band around the deadline.
        let horizon = time::wrap(now.wrapping_add(tolerance), mask);
        if time::in_window(state.last_dispatch, call_before, horizon) {
            state.heap.pop_root(&state.pool, state.last_dispatch, mask);

            // Catch the epoch up towards `now`, but never past the fired
            // node's deadline: that deadline lower-bounds every remaining
            // one, so the heap arrangement stays valid.
            state.last_dispatch = time::smallest_forward(state.last_dispatch, now, call_before);

            let lag = time::wrap(now.wrapping_sub(state.last_dispatch), mask);
            if lag > warn_lag {
                runtime_warn!("event loop lag {}ms", Self::ticks_to_ms(lag));
            }

            // Callbacks are told the centre of their window, the time they
            // were meant to run.
            state.current_dispatch = time::wrap(call_before.wrapping_sub(tolerance / 2), mask);

            let cb = state.pool[root].cb.take();
            let periodic = interval != 0;
            if periodic {
                // Recycle before the call so the callback can cancel itself.
                state.pool[root].call_before = time::wrap(call_before.wrapping_add(interval), mask);
                state
                    .heap
                    .insert(root, &state.pool, state.last_dispatch, mask);
            } else {
                state.pool.remove(root);
            }

            trace_dispatch!("picked root, {} queued behind", state.heap.len());
            return Step::Fire(Firing {
                key: root,
                cb,
                periodic,
            });
        }

        // Nothing is runnable yet. Sleep for as long as possible: to the
        // root's latest-acceptable time, so everything whose window opens
        // before then can share the wake. An interrupt wakes us early and
        // we simply re-evaluate.
        state.last_dispatch = time::smallest_forward(state.last_dispatch, now, call_before);
        trace_dispatch!("sleeping until {call_before:#x}");
        self.platform.sleep_until(now, call_before);

        state.current_dispatch = time::wrap(self.platform.now(), mask);
        Step::Slept
    }

    /// Run selected work with the critical section released.
    fn dispatch(&self, mut firing: Firing, warn_duration: Tick) {
        let Some(cb) = firing.cb.as_mut() else {
            return;
        };
        trace_dispatch!("dispatch {}", cb.name());

        let started = self.platform.now();
        cb.invoke();
        let took = time::wrap(self.platform.now().wrapping_sub(started), P::TIME_MASK);
        if took > warn_duration {
            runtime_warn!("callback {} took {}ms", cb.name(), Self::ticks_to_ms(took));
        }

        if firing.periodic {
            let cb = firing.cb.take();
            critical_section::with(|cs| {
                let mut state = self.state.borrow_ref_mut(cs);
                // If the callback cancelled itself (or an interrupt
                // cancelled it mid-flight) the slot is gone, or already
                // recycled under a newer generation; the work is dropped
                // with `cb` instead of being stitched onto a stranger.
                if let Some(node) = state.pool.get_mut(firing.key) {
                    node.cb = cb;
                }
            });
        }
        // One-shot work is released here, as soon as the call returns.
    }

    fn commit(&self, cb: Callback, delay: Tick, tolerance: Tick, period: Tick) -> CallbackHandle {
        assert!(
            tolerance < P::TIME_MASK / 2 + 1,
            "tolerance {tolerance:#x} exceeds half the clock range"
        );

        let at = self.platform.now().wrapping_add(delay);
        let call_before = time::wrap(at.wrapping_add(period), P::TIME_MASK);
        trace_dispatch!("post {} call_before={call_before:#x}", cb.name());

        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            let key = state.pool.insert(CallbackNode {
                cb: Some(cb),
                call_before,
                tolerance: 2 * tolerance,
                interval: period,
            });
            state
                .heap
                .insert(key, &state.pool, state.last_dispatch, P::TIME_MASK);
            CallbackHandle(key)
        })
    }

    /// Convert milliseconds to platform ticks; panics if the value cannot
    /// be represented on the wrapping clock.
    pub fn ms_to_ticks(ms: u32) -> Tick {
        time::ticks_from_ms(ms, P::TIME_BASE, P::TIME_MASK)
    }

    /// Convert platform ticks to milliseconds; panics on overflow.
    pub fn ticks_to_ms(ticks: Tick) -> u32 {
        time::ms_from_ticks(ticks, P::TIME_BASE)
    }
}

/// Warn thresholds saturate at the mask instead of asserting, so narrow
/// simulated clocks can run the loop; a saturated threshold simply never
/// trips.
fn warn_threshold(ms: u32, base: Tick, mask: Tick) -> Tick {
    ((ms as u64 * base as u64 / 1000).min(mask as u64)) as Tick
}

/// Pending posting: collects delay, tolerance and period, and commits the
/// callback exactly once.
///
/// The builder owns the not-yet-queued callback, so commit happens on
/// every exit path: explicitly through [`handle`](Post::handle) /
/// [`try_handle`](Post::try_handle), or implicitly when the builder is
/// dropped. `sched.post(work).delay(d);` alone is a complete posting.
pub struct Post<'s, P: Platform> {
    scheduler: &'s Scheduler<P>,
    cb: Option<Callback>,
    delay: Tick,
    tolerance: Tick,
    period: Tick,
}

impl<'s, P: Platform> Post<'s, P> {
    /// Fire no earlier than `delay` ticks from now. Default 0.
    pub fn delay(mut self, delay: Tick) -> Self {
        self.delay = delay;
        self
    }

    /// Half-width of the eligibility window around the deadline: the
    /// callback may run up to `tolerance` ticks early or late to share a
    /// wake with its neighbours. Default 50ms.
    pub fn tolerance(mut self, tolerance: Tick) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Reschedule every `period` ticks after each run; `0` means one-shot.
    /// The first fire lands a full period after `now + delay`, even when
    /// the delay is zero.
    pub fn period(mut self, period: Tick) -> Self {
        self.period = period;
        self
    }

    /// Commit now and return the cancellation handle.
    ///
    /// # Panics
    /// Panics if the tolerance reaches half the clock range (the posting
    /// invariant is fatal on the intended targets); use
    /// [`try_handle`](Post::try_handle) for a recoverable check.
    pub fn handle(mut self) -> CallbackHandle {
        match self.commit() {
            Some(handle) => handle,
            // `handle` consumes the builder, so no commit can have
            // happened before this one.
            None => unreachable!(),
        }
    }

    /// Commit now, validating the tolerance instead of panicking. On
    /// error nothing is queued and the callback is dropped.
    pub fn try_handle(mut self) -> Result<CallbackHandle, ToleranceTooWide> {
        if self.tolerance >= P::TIME_MASK / 2 + 1 {
            self.cb = None;
            return Err(ToleranceTooWide(self.tolerance));
        }
        Ok(self.handle())
    }

    fn commit(&mut self) -> Option<CallbackHandle> {
        let cb = self.cb.take()?;
        Some(
            self.scheduler
                .commit(cb, self.delay, self.tolerance, self.period),
        )
    }
}

impl<P: Platform> Drop for Post<'_, P> {
    fn drop(&mut self) {
        let _ = self.commit();
    }
}

static INSTANCE: OnceLock<Scheduler<StdPlatform>> = OnceLock::new();

/// The process-wide scheduler over the hosted platform, materialized on
/// first use and never torn down.
pub fn instance() -> &'static Scheduler<StdPlatform> {
    INSTANCE.get_or_init(|| Scheduler::new(StdPlatform::new()))
}

/// Post to the process-wide scheduler.
pub fn post(callback: impl Into<Callback>) -> Post<'static, StdPlatform> {
    instance().post(callback)
}

/// Cancel on the process-wide scheduler.
pub fn cancel(handle: CallbackHandle) -> bool {
    instance().cancel(handle)
}

/// Run the process-wide dispatch loop; returns the remaining queue size.
pub fn start() -> usize {
    instance().start()
}

/// Stop the process-wide dispatch loop; returns the queue size snapshot.
pub fn stop() -> usize {
    instance().stop()
}

/// The intended execution time of the currently running callback on the
/// process-wide scheduler.
pub fn now() -> Tick {
    instance().now()
}
