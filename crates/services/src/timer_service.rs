use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use exam_core::Clock;
use exam_core::model::{AttemptKey, TimerResume, TimerState};
use storage::repository::KeyValueStore;

/// Outcome of initializing the countdown for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerInit {
    /// The test carries no time limit; no timer state is created at all.
    Untimed,
    /// Seconds left; the caller drives `tick` on a 1-second cadence.
    Running(u32),
    /// The session expired while the app was closed or suspended. The caller
    /// must route straight into auto-submit instead of starting an interval,
    /// so a resurrected timer never grants free extra time.
    ExpiredOnResume,
}

/// Drift-corrected countdown for one attempt, persisted on every tick.
///
/// The persisted state is the anchor for drift correction; the in-memory copy
/// keeps the countdown correct for ticks whose write failed. A later
/// successful write re-anchors the persisted state.
pub struct SessionTimerService {
    clock: Clock,
    kv: Arc<dyn KeyValueStore>,
    live: Mutex<HashMap<String, TimerState>>,
}

impl SessionTimerService {
    #[must_use]
    pub fn new(clock: Clock, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            clock,
            kv,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Initialize the countdown for `key` with `allowed_seconds` of total time.
    ///
    /// Resumes persisted state with wall-clock drift correction; a fresh state
    /// is written when none exists. Store failures fall back to a fresh
    /// in-memory timer (logged, never surfaced).
    pub async fn init(&self, key: &AttemptKey, allowed_seconds: u32) -> TimerInit {
        if allowed_seconds == 0 {
            return TimerInit::Untimed;
        }

        let now = self.clock.now();
        let store_key = key.timer_key();

        let stored = match self.kv.get(&store_key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "timer read failed; starting fresh");
                None
            }
        };

        let state = match stored.as_deref().map(serde_json::from_str::<TimerState>) {
            Some(Ok(state)) => match state.resume(now) {
                TimerResume::Running(remaining) => {
                    // Re-anchor so the next resume measures drift from now.
                    let state = TimerState {
                        remaining_seconds: remaining,
                        started_at: state.started_at,
                        last_tick_at: now,
                    };
                    self.persist(&store_key, &state).await;
                    self.remember(&store_key, state);
                    return TimerInit::Running(remaining);
                }
                TimerResume::Expired => {
                    let state = TimerState {
                        remaining_seconds: 0,
                        started_at: state.started_at,
                        last_tick_at: now,
                    };
                    self.remember(&store_key, state);
                    return TimerInit::ExpiredOnResume;
                }
            },
            Some(Err(err)) => {
                tracing::warn!(key = %store_key, error = %err, "corrupt timer state; starting fresh");
                TimerState::start(allowed_seconds, now)
            }
            None => TimerState::start(allowed_seconds, now),
        };

        self.persist(&store_key, &state).await;
        self.remember(&store_key, state);
        TimerInit::Running(allowed_seconds)
    }

    /// Advance the countdown by one second and persist the new state.
    ///
    /// Returns the new remaining value; on reaching 0 the caller stops ticking
    /// and triggers auto-submit exactly once.
    pub async fn tick(&self, key: &AttemptKey) -> u32 {
        let now = self.clock.now();
        let store_key = key.timer_key();

        let Some(state) = self.cached(&store_key) else {
            // Tick without init: nothing to count down (untimed or cleared).
            return 0;
        };

        let ticked = state.tick(now);
        self.remember(&store_key, ticked);
        self.persist(&store_key, &ticked).await;
        ticked.remaining_seconds
    }

    /// Seconds spent so far out of `allowed_seconds`.
    #[must_use]
    pub fn elapsed(&self, key: &AttemptKey, allowed_seconds: u32) -> u32 {
        match self.cached(&key.timer_key()) {
            Some(state) => state.elapsed(allowed_seconds),
            None => 0,
        }
    }

    /// Drop the persisted and in-memory state for a finished attempt.
    pub async fn clear(&self, key: &AttemptKey) {
        let store_key = key.timer_key();
        if let Ok(mut guard) = self.live.lock() {
            guard.remove(&store_key);
        }
        if let Err(err) = self.kv.remove(&store_key).await {
            tracing::warn!(key = %store_key, error = %err, "timer clear failed");
        }
    }

    fn cached(&self, store_key: &str) -> Option<TimerState> {
        self.live.lock().ok()?.get(store_key).copied()
    }

    fn remember(&self, store_key: &str, state: TimerState) {
        if let Ok(mut guard) = self.live.lock() {
            guard.insert(store_key.to_string(), state);
        }
    }

    async fn persist(&self, store_key: &str, state: &TimerState) {
        let json = match serde_json::to_string(state) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "timer state failed to encode");
                return;
            }
        };
        if let Err(err) = self.kv.set(store_key, &json).await {
            tracing::warn!(key = %store_key, error = %err, "timer tick persist failed");
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
