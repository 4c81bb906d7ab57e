//! Wrap-aware arithmetic over a finite-width tick counter.
//!
//! Every value lives in `[0, mask]` where `mask = 2^W - 1` for the
//! platform's clock width `W`. All helpers take the mask (and tick rate)
//! explicitly so the same code serves a 32-bit hardware counter and a
//! 4-bit simulated one.

/// Platform tick. Stored values are always pre-masked.
pub type Tick = u32;

/// Reduce `t` into the clock range.
#[inline(always)]
pub fn wrap(t: Tick, mask: Tick) -> Tick {
    t & mask
}

/// Convert milliseconds to ticks at `base` ticks per second.
///
/// # Panics
/// Panics if the result does not fit below `mask` — a delay that long can
/// never be represented on the wrapping clock.
#[inline]
pub fn ticks_from_ms(ms: u32, base: Tick, mask: Tick) -> Tick {
    let ticks = (ms as u64 * base as u64) / 1000;
    assert!(
        ticks < mask as u64,
        "{ms}ms exceeds the clock range ({ticks} ticks >= mask {mask:#x})"
    );
    ticks as Tick
}

/// Convert ticks to milliseconds at `base` ticks per second.
///
/// # Panics
/// Panics if the result overflows `u32`.
#[inline]
pub fn ms_from_ticks(t: Tick, base: Tick) -> u32 {
    let ms = (t as u64 * 1000) / base as u64;
    assert!(ms <= u32::MAX as u64, "{t} ticks overflow a u32 millisecond count");
    ms as u32
}

/// True iff `t` lies on the forward modular arc from `start` to `end`,
/// inclusive of `start`, exclusive of `end`. `start == end == t` counts as
/// inside (the arc has collapsed onto the point itself).
///
/// The three arrangements on the circle:
///
/// ```text
///   (A.1)              S    T   E
///      0 --------------|----|---|--- max
///   (A.2): also covers S == T == E
///         E                S    T
///      0 -|----------------|----|--- max
///   (B)
///         T   E                S
///      0 -|---|----------------|---- max
/// ```
#[inline]
pub fn in_window(start: Tick, t: Tick, end: Tick) -> bool {
    (t >= start && (t < end || start >= end)) || (t < start && end < start && end > t)
}

/// Step `from` forward to the earlier of `a` and `b` in modular terms.
///
/// At least one of `a`, `b` must not be in the past relative to `from`;
/// this is what lets the dispatcher advance the epoch without ever moving
/// it backwards or past the next deadline.
#[inline]
pub fn smallest_forward(from: Tick, a: Tick, b: Tick) -> Tick {
    if (a >= from && b >= from) || (a < from && b < from) {
        // Neither wrapped, or both wrapped: plain ordering applies.
        return a.min(b);
    }
    if a > from && b < from {
        // `b` wrapped past zero, so `a` comes first.
        return a;
    }
    debug_assert!(a < from && b >= from);
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK16: Tick = 0xF;

    // ==================== Wrapping ====================

    #[test]
    fn test_wrap_idempotent() {
        for x in [0u32, 1, 7, 14, 15, 16, 17, 0xFFFF_FFFF] {
            assert_eq!(wrap(wrap(x, MASK16), MASK16), wrap(x, MASK16));
        }
        assert_eq!(wrap(16, MASK16), 0);
        assert_eq!(wrap(31, MASK16), 15);
    }

    // ==================== Conversions ====================

    #[test]
    fn test_ms_ticks_round_trip() {
        for ms in [0u32, 1, 10, 50, 500, 30_000] {
            let t = ticks_from_ms(ms, 1000, u32::MAX);
            assert_eq!(ms_from_ticks(t, 1000), ms);
        }
    }

    #[test]
    fn test_ticks_from_ms_scales_with_base() {
        assert_eq!(ticks_from_ms(1000, 32_768, u32::MAX), 32_768);
        assert_eq!(ticks_from_ms(500, 32_768, u32::MAX), 16_384);
        assert_eq!(ms_from_ticks(32_768, 32_768), 1000);
    }

    #[test]
    #[should_panic(expected = "exceeds the clock range")]
    fn test_ticks_from_ms_overflow_is_fatal() {
        ticks_from_ms(1000, 1000, MASK16);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_ms_from_ticks_overflow_is_fatal() {
        // 1 tick/sec: every tick is 1000ms, so the full range overflows u32.
        ms_from_ticks(u32::MAX, 1);
    }

    // ==================== Window membership ====================

    #[test]
    fn test_in_window_plain_arc() {
        assert!(in_window(2, 5, 9));
        assert!(in_window(2, 2, 9));
        assert!(!in_window(2, 9, 9));
        assert!(!in_window(2, 1, 9));
        assert!(!in_window(2, 12, 9));
    }

    #[test]
    fn test_in_window_collapsed_point() {
        assert!(in_window(5, 5, 5));
        assert!(!in_window(5, 4, 5));
    }

    #[test]
    fn test_in_window_wrapped_arc() {
        // Arc from mask-2 across zero to 3 on a 16-tick clock.
        assert!(in_window(MASK16 - 2, 1, 3));
        assert!(in_window(MASK16 - 2, MASK16, 3));
        assert!(in_window(MASK16 - 2, 0, 3));
        assert!(!in_window(MASK16 - 2, 3, 3));
        assert!(!in_window(MASK16 - 2, 7, 3));
    }

    #[test]
    fn test_in_window_start_inside_wrap() {
        // End behind start: everything from start onwards, plus the wrapped
        // prefix, is inside.
        assert!(in_window(10, 12, 4));
        assert!(in_window(10, 2, 4));
        assert!(!in_window(10, 5, 4));
    }

    // ==================== Epoch stepping ====================

    #[test]
    fn test_smallest_forward_no_wrap() {
        assert_eq!(smallest_forward(5, 7, 9), 7);
        assert_eq!(smallest_forward(5, 9, 7), 7);
        assert_eq!(smallest_forward(5, 5, 9), 5);
    }

    #[test]
    fn test_smallest_forward_both_wrapped() {
        // Both candidates already wrapped past zero.
        assert_eq!(smallest_forward(14, 1, 3), 1);
        assert_eq!(smallest_forward(14, 3, 1), 1);
    }

    #[test]
    fn test_smallest_forward_one_wrapped() {
        // The wrapped candidate is further in the future than the plain one.
        assert_eq!(smallest_forward(10, 12, 2), 12);
        assert_eq!(smallest_forward(10, 2, 12), 12);
    }
}
