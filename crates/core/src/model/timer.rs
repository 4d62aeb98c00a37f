use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted countdown state for one attempt.
///
/// `remaining_seconds` is monotonically non-increasing while a session is
/// active. On resume the value is corrected by the wall-clock time elapsed
/// since `last_tick_at`, so a killed or suspended app never grants free time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub remaining_seconds: u32,
    pub started_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
}

/// Outcome of resuming a persisted timer at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerResume {
    /// Time left after drift correction.
    Running(u32),
    /// The session ran out while the app was closed or suspended. The caller
    /// must route straight into auto-submit instead of starting a new
    /// interval.
    Expired,
}

impl TimerState {
    /// Fresh state for a timed attempt starting now.
    #[must_use]
    pub fn start(allowed_seconds: u32, now: DateTime<Utc>) -> Self {
        Self {
            remaining_seconds: allowed_seconds,
            started_at: now,
            last_tick_at: now,
        }
    }

    /// Drift-corrected remaining time at `now`.
    ///
    /// The delta is clamped at zero so a backwards clock step never inflates
    /// the remaining time.
    #[must_use]
    pub fn resume(&self, now: DateTime<Utc>) -> TimerResume {
        let drift = (now - self.last_tick_at).num_seconds().max(0);
        let drift = u32::try_from(drift).unwrap_or(u32::MAX);
        match self.remaining_seconds.checked_sub(drift) {
            Some(remaining) if remaining > 0 => TimerResume::Running(remaining),
            _ => TimerResume::Expired,
        }
    }

    /// State after one 1-second tick observed at `now`.
    ///
    /// `started_at` is preserved; only the countdown and the tick anchor move.
    #[must_use]
    pub fn tick(&self, now: DateTime<Utc>) -> Self {
        Self {
            remaining_seconds: self.remaining_seconds.saturating_sub(1),
            started_at: self.started_at,
            last_tick_at: now,
        }
    }

    /// Seconds spent so far, measured from `started_at`.
    #[must_use]
    pub fn elapsed(&self, allowed_seconds: u32) -> u32 {
        allowed_seconds.saturating_sub(self.remaining_seconds)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn resume_subtracts_wall_clock_drift() {
        let t0 = fixed_now();
        let state = TimerState {
            remaining_seconds: 400,
            started_at: t0,
            last_tick_at: t0,
        };
        assert_eq!(
            state.resume(t0 + Duration::seconds(150)),
            TimerResume::Running(250)
        );
    }

    #[test]
    fn resume_after_long_gap_expires() {
        // Scenario: closed at remaining=400, reopened 1000s later.
        let t0 = fixed_now();
        let state = TimerState {
            remaining_seconds: 400,
            started_at: t0,
            last_tick_at: t0,
        };
        assert_eq!(
            state.resume(t0 + Duration::seconds(1000)),
            TimerResume::Expired
        );
    }

    #[test]
    fn resume_to_exactly_zero_is_expired() {
        let t0 = fixed_now();
        let state = TimerState {
            remaining_seconds: 60,
            started_at: t0,
            last_tick_at: t0,
        };
        assert_eq!(state.resume(t0 + Duration::seconds(60)), TimerResume::Expired);
    }

    #[test]
    fn backwards_clock_never_adds_time() {
        let t0 = fixed_now();
        let state = TimerState {
            remaining_seconds: 100,
            started_at: t0,
            last_tick_at: t0,
        };
        assert_eq!(
            state.resume(t0 - Duration::seconds(30)),
            TimerResume::Running(100)
        );
    }

    #[test]
    fn tick_decrements_and_reanchors() {
        let t0 = fixed_now();
        let state = TimerState::start(10, t0);
        let t1 = t0 + Duration::seconds(1);
        let ticked = state.tick(t1);
        assert_eq!(ticked.remaining_seconds, 9);
        assert_eq!(ticked.last_tick_at, t1);
        assert_eq!(ticked.started_at, t0);
    }

    #[test]
    fn tick_saturates_at_zero() {
        let t0 = fixed_now();
        let state = TimerState {
            remaining_seconds: 0,
            started_at: t0,
            last_tick_at: t0,
        };
        assert_eq!(state.tick(t0).remaining_seconds, 0);
    }

    #[test]
    fn elapsed_is_allowed_minus_remaining() {
        let t0 = fixed_now();
        let mut state = TimerState::start(600, t0);
        state.remaining_seconds = 400;
        assert_eq!(state.elapsed(600), 200);
    }
}
