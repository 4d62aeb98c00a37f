use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use exam_core::Clock;
use exam_core::model::{AttemptKey, ExamId, ExamMembership, ExamTestRef, NavState, StudentId, TestId, TestType};
use storage::repository::KeyValueStore;

use crate::backend::ExamListing;
use crate::error::ExamError;

/// Sequencing across the member tests of one exam.
///
/// The membership is loaded once per navigation session and its order is
/// server-authoritative. The exam's own countdown is derived from
/// `total_minutes` and a persisted exam-level start time, independent of each
/// member test's local timer, so it keeps running underneath whichever member
/// test is displayed.
pub struct ExamNavigator {
    clock: Clock,
    kv: Arc<dyn KeyValueStore>,
    listing: Arc<dyn ExamListing>,
}

impl ExamNavigator {
    #[must_use]
    pub fn new(clock: Clock, kv: Arc<dyn KeyValueStore>, listing: Arc<dyn ExamListing>) -> Self {
        Self { clock, kv, listing }
    }

    /// Fetch the exam's ordered member-test list.
    ///
    /// # Errors
    ///
    /// Returns `ExamError` on transport failure; entry to the exam is blocked
    /// and the caller offers retry.
    pub async fn load(&self, exam_id: ExamId) -> Result<ExamMembership, ExamError> {
        Ok(self.listing.load_exam(exam_id).await?)
    }

    /// Index of the active screen's test inside the exam, if it is a member.
    #[must_use]
    pub fn current_position(
        &self,
        membership: &ExamMembership,
        test_id: TestId,
        test_type: TestType,
    ) -> Option<usize> {
        membership.position_of(test_id, test_type)
    }

    /// Navigation affordances for the active screen.
    #[must_use]
    pub fn nav_state(
        &self,
        membership: &ExamMembership,
        test_id: TestId,
        test_type: TestType,
    ) -> NavState {
        NavState::at(membership.position_of(test_id, test_type), membership.len())
    }

    /// The member test before the given position, if any.
    #[must_use]
    pub fn prev_target<'a>(
        &self,
        membership: &'a ExamMembership,
        index: usize,
    ) -> Option<&'a ExamTestRef> {
        index.checked_sub(1).and_then(|i| membership.tests().get(i))
    }

    /// The member test after the given position, if any.
    #[must_use]
    pub fn next_target<'a>(
        &self,
        membership: &'a ExamMembership,
        index: usize,
    ) -> Option<&'a ExamTestRef> {
        membership.tests().get(index + 1)
    }

    /// Cached answers for every member test, keyed by the exam-answer store
    /// key. Best-effort: a failed read for one member never aborts the rest.
    pub async fn prefetch_answers(
        &self,
        student_id: StudentId,
        membership: &ExamMembership,
    ) -> BTreeMap<String, String> {
        let mut cached = BTreeMap::new();
        for test in membership.tests() {
            let key = AttemptKey::new(student_id, test.test_type, test.test_id);
            let store_key = key.exam_answer_key(membership.exam_id());
            match self.kv.get(&store_key).await {
                Ok(Some(payload)) => {
                    cached.insert(store_key, payload);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key = %store_key, error = %err, "exam answer prefetch failed");
                }
            }
        }
        cached
    }

    /// Seconds left on the exam-level countdown.
    ///
    /// The start time is persisted on first call so the exam clock, like the
    /// per-test timer, survives app restarts. A store failure degrades to a
    /// full allowance from now.
    pub async fn exam_remaining_seconds(
        &self,
        student_id: StudentId,
        membership: &ExamMembership,
    ) -> u32 {
        let now = self.clock.now();
        let total_seconds = membership.total_minutes() * 60;
        let store_key = membership.start_key(student_id);

        let started_at = match self.kv.get(&store_key).await {
            Ok(Some(stored)) => match stored.parse::<DateTime<Utc>>() {
                Ok(at) => at,
                Err(err) => {
                    tracing::warn!(key = %store_key, error = %err, "corrupt exam start discarded");
                    self.persist_start(&store_key, now).await;
                    now
                }
            },
            Ok(None) => {
                self.persist_start(&store_key, now).await;
                now
            }
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "exam start read failed");
                now
            }
        };

        let elapsed = (now - started_at).num_seconds().max(0);
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        total_seconds.saturating_sub(elapsed)
    }

    /// Drop the persisted exam start time once the exam is over.
    pub async fn clear_exam_start(&self, student_id: StudentId, membership: &ExamMembership) {
        let store_key = membership.start_key(student_id);
        if let Err(err) = self.kv.remove(&store_key).await {
            tracing::warn!(key = %store_key, error = %err, "exam start clear failed");
        }
    }

    async fn persist_start(&self, store_key: &str, at: DateTime<Utc>) {
        if let Err(err) = self.kv.set(store_key, &at.to_rfc3339()).await {
            tracing::warn!(key = %store_key, error = %err, "exam start persist failed");
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use exam_core::time::fixed_now;
    use storage::repository::InMemoryKeyValueStore;

    use crate::backend::ActiveTestEntry;
    use crate::error::BackendError;

    struct FixedListing(ExamMembership);

    #[async_trait]
    impl ExamListing for FixedListing {
        async fn load_exam(&self, _exam_id: ExamId) -> Result<ExamMembership, BackendError> {
            Ok(self.0.clone())
        }

        async fn active_tests(
            &self,
            _student_id: StudentId,
        ) -> Result<Vec<ActiveTestEntry>, BackendError> {
            Ok(Vec::new())
        }
    }

    fn membership() -> ExamMembership {
        ExamMembership::new(
            ExamId::new(3),
            "Midterm",
            90,
            vec![
                ExamTestRef {
                    test_id: TestId::new(1),
                    test_type: TestType::MultipleChoice,
                    test_name: "Vocabulary".into(),
                },
                ExamTestRef {
                    test_id: TestId::new(2),
                    test_type: TestType::FillBlanks,
                    test_name: "Grammar".into(),
                },
                ExamTestRef {
                    test_id: TestId::new(3),
                    test_type: TestType::Speaking,
                    test_name: "Speaking".into(),
                },
            ],
        )
    }

    fn navigator(store: &InMemoryKeyValueStore, clock: Clock) -> ExamNavigator {
        ExamNavigator::new(
            clock,
            Arc::new(store.clone()),
            Arc::new(FixedListing(membership())),
        )
    }

    #[tokio::test]
    async fn middle_member_navigates_both_ways() {
        let store = InMemoryKeyValueStore::new();
        let nav = navigator(&store, Clock::fixed(fixed_now()));
        let m = nav.load(ExamId::new(3)).await.unwrap();

        let state = nav.nav_state(&m, TestId::new(2), TestType::FillBlanks);
        assert_eq!(state.index, Some(1));
        assert!(state.has_prev);
        assert!(state.has_next);
        assert!(!state.can_review);
    }

    #[tokio::test]
    async fn last_member_only_reviews() {
        let store = InMemoryKeyValueStore::new();
        let nav = navigator(&store, Clock::fixed(fixed_now()));
        let m = nav.load(ExamId::new(3)).await.unwrap();

        let state = nav.nav_state(&m, TestId::new(3), TestType::Speaking);
        assert!(!state.has_next);
        assert!(state.can_review);
        assert!(nav.next_target(&m, 2).is_none());
        assert_eq!(nav.prev_target(&m, 2).unwrap().test_id, TestId::new(2));
    }

    #[tokio::test]
    async fn unknown_test_degrades_to_disabled() {
        let store = InMemoryKeyValueStore::new();
        let nav = navigator(&store, Clock::fixed(fixed_now()));
        let m = nav.load(ExamId::new(3)).await.unwrap();

        let state = nav.nav_state(&m, TestId::new(99), TestType::Drawing);
        assert_eq!(state.index, None);
        assert!(!state.has_prev && !state.has_next && !state.can_review);
    }

    #[tokio::test]
    async fn prefetch_collects_present_keys_only() {
        let store = InMemoryKeyValueStore::new();
        store
            .set("examAnswer:42:3:1:mc", r#"{"answers":{}}"#)
            .await
            .unwrap();

        let nav = navigator(&store, Clock::fixed(fixed_now()));
        let m = nav.load(ExamId::new(3)).await.unwrap();
        let cached = nav.prefetch_answers(StudentId::new(42), &m).await;

        assert_eq!(cached.len(), 1);
        assert!(cached.contains_key("examAnswer:42:3:1:mc"));
    }

    #[tokio::test]
    async fn exam_countdown_survives_restart() {
        let store = InMemoryKeyValueStore::new();
        let t0 = fixed_now();

        let nav = navigator(&store, Clock::fixed(t0));
        let m = nav.load(ExamId::new(3)).await.unwrap();
        assert_eq!(nav.exam_remaining_seconds(StudentId::new(42), &m).await, 5400);

        // 10 minutes later, new navigator over the same store.
        let nav = navigator(&store, Clock::fixed(t0 + Duration::minutes(10)));
        assert_eq!(nav.exam_remaining_seconds(StudentId::new(42), &m).await, 4800);
    }

    #[tokio::test]
    async fn exam_countdown_clamps_at_zero() {
        let store = InMemoryKeyValueStore::new();
        let t0 = fixed_now();
        let nav = navigator(&store, Clock::fixed(t0));
        let m = nav.load(ExamId::new(3)).await.unwrap();
        nav.exam_remaining_seconds(StudentId::new(42), &m).await;

        let nav = navigator(&store, Clock::fixed(t0 + Duration::hours(2)));
        assert_eq!(nav.exam_remaining_seconds(StudentId::new(42), &m).await, 0);
    }
}
