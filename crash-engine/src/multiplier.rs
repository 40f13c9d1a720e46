//! Multiplier-over-time curve and its inverse (C2).
//!
//! There is exactly one multiplier law, shared by every round and
//! independent of that round's (already-determined but unrevealed) crash
//! point: `m(t) = 1.0024 * 1.0718^t`, `t` in seconds since `running_phase`
//! began. The curve is deterministic and has no state of its own; the Round
//! Engine is the only caller, evaluating it once per tick against a
//! monotonic clock.

/// Curve coefficient: `m(0) = GROWTH_BASE ≈ 1.0024x`.
const GROWTH_BASE: f64 = 1.0024;

/// Curve exponent base.
const GROWTH_RATE: f64 = 1.0718;

/// Multiplier at `t` seconds into `running_phase`.
#[must_use]
pub fn multiplier_at(elapsed_secs: f64) -> f64 {
    GROWTH_BASE * GROWTH_RATE.powf(elapsed_secs)
}

/// Inverse of [`multiplier_at`]: the elapsed time at which the multiplier
/// first reaches `target`.
///
/// Returns a negative value for `target < GROWTH_BASE`, which callers should
/// treat as "already past" rather than clamp — the Round Engine never calls
/// this with a target below the curve's starting value.
#[must_use]
pub fn time_for_multiplier(target: f64) -> f64 {
    (target / GROWTH_BASE).ln() / GROWTH_RATE.ln()
}

/// Whether the multiplier has reached the crash point, given the
/// configured epsilon buffer.
///
/// Comparison is strict `m(t) + epsilon >= crash_point`, per the Open
/// Question resolution: cashout and crash detection never use non-strict
/// `<=`, which would let a cashout land exactly on the crash tick and still
/// win.
#[must_use]
pub fn has_crashed(elapsed_secs: f64, crash_point: f64, epsilon: f64) -> bool {
    multiplier_at(elapsed_secs) + epsilon >= crash_point
}

/// Round a raw multiplier to the 2-decimal precision clients are shown.
#[must_use]
pub fn round_display(multiplier: f64) -> f64 {
    (multiplier * 100.0).round() / 100.0
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_near_base() {
        let m = multiplier_at(0.0);
        assert!((m - GROWTH_BASE).abs() < 1e-9);
    }

    #[test]
    fn increases_monotonically() {
        let mut previous = multiplier_at(0.0);
        for tenth in 1..100 {
            let t = f64::from(tenth) / 10.0;
            let current = multiplier_at(t);
            assert!(current > previous, "multiplier did not increase at t={t}");
            previous = current;
        }
    }

    #[test]
    fn inverse_round_trips() {
        for target in [1.5, 2.0, 5.0, 10.0, 100.0] {
            let t = time_for_multiplier(target);
            let back = multiplier_at(t);
            assert!((back - target).abs() < 1e-6, "target={target} back={back}");
        }
    }

    #[test]
    fn has_crashed_is_strict() {
        let crash_point = 2.0;
        let t = time_for_multiplier(crash_point);
        // Exactly at the crash point, with zero epsilon, this is a crash
        // (`>=`), matching the spec's epsilon-buffered strict comparison —
        // the buffer only ever helps the house, never the player.
        assert!(has_crashed(t, crash_point, 0.0));
        assert!(!has_crashed(t - 0.05, crash_point, 0.0));
    }

    #[test]
    fn epsilon_buffer_triggers_crash_slightly_early() {
        let crash_point = 2.0;
        let t_exact = time_for_multiplier(crash_point);
        let t_just_before = t_exact - 0.001;
        assert!(!has_crashed(t_just_before, crash_point, 0.0));
        assert!(has_crashed(t_just_before, crash_point, 0.01));
    }

    #[test]
    fn round_display_two_decimals() {
        assert!((round_display(2.34567) - 2.35).abs() < 1e-9);
    }
}
