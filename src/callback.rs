use std::fmt;

use crate::time::Tick;

/// A scheduled unit of work: any nullary invocable, owning its captures.
///
/// Built from a closure via `From`, or with [`Callback::named`] to attach
/// a label that the dispatch trace and duration warnings will use. There
/// is no useful address to report for a boxed closure, so the label is the
/// only identity a callback carries.
pub struct Callback {
    work: Box<dyn FnMut() + Send>,
    name: Option<&'static str>,
}

impl Callback {
    pub fn new(work: impl FnMut() + Send + 'static) -> Self {
        Self {
            work: Box::new(work),
            name: None,
        }
    }

    /// A callback labelled for diagnostics.
    pub fn named(name: &'static str, work: impl FnMut() + Send + 'static) -> Self {
        Self {
            work: Box::new(work),
            name: Some(name),
        }
    }

    #[inline(always)]
    pub(crate) fn invoke(&mut self) {
        (self.work)();
    }

    #[inline(always)]
    pub(crate) fn name(&self) -> &'static str {
        self.name.unwrap_or("<callback>")
    }
}

impl<F: FnMut() + Send + 'static> From<F> for Callback {
    fn from(work: F) -> Self {
        Self::new(work)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.name()).finish()
    }
}

/// One scheduled activation, as stored in the pool and ordered by the heap.
pub(crate) struct CallbackNode {
    /// Taken out of the node while the dispatcher runs it, so a concurrent
    /// cancel releases the slot without tearing down work in flight.
    pub(crate) cb: Option<Callback>,
    /// Latest wall-tick at which the callback should have started.
    pub(crate) call_before: Tick,
    /// Double-sided eligibility width; the node may run anywhere in
    /// `[call_before - tolerance, call_before + tolerance]` on the wrapped
    /// clock (callers supplied half of this).
    pub(crate) tolerance: Tick,
    /// `0` for one-shot; otherwise the node is rescheduled to
    /// `call_before + interval` after each run.
    pub(crate) interval: Tick,
}
