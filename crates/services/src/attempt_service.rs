use std::sync::Arc;

use exam_core::model::{AssignmentId, AttemptKey, AttemptMarkers, AttemptStatus};
use storage::repository::KeyValueStore;

use crate::backend::{ActiveTestEntry, RetestSignal};
use crate::error::AttemptError;

/// Why entry to a test was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    AlreadyCompleted,
}

/// Verdict of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<AccessDenied>,
}

impl AccessDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: AccessDenied) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

const MARKER: &str = "true";

/// Completion/retest lifecycle per `(student, test type, test)`.
///
/// The backend and the local store are two independent sources of truth. The
/// rules: never let local state assert an eligibility the server did not
/// grant, and let a freshly granted retest marker outrank a stale completion
/// marker for access without deleting the completion marker itself. Only the
/// next `mark_completed` clears retest state. Deleting the completion marker
/// on grant instead would reopen a race where a dashboard refresh lands
/// moments before the server has durably recorded the previous submission.
pub struct AttemptStatusService {
    kv: Arc<dyn KeyValueStore>,
}

impl AttemptStatusService {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// One batched probe of the attempt's marker keys.
    ///
    /// Read failures degrade to absent markers (access-friendly defaults) and
    /// are logged, never surfaced. The retest marker is read first so a grant
    /// can never be observed later than the completion flag it overrides.
    pub async fn read_markers(&self, key: &AttemptKey) -> AttemptMarkers {
        let retest_eligible = self.marker_set(&key.retest_key()).await;
        let completed = self.marker_set(&key.completed_key()).await;
        let has_local_progress = self.key_present(&key.answers_key()).await
            || self.key_present(&key.timer_key()).await;

        AttemptMarkers {
            completed,
            retest_eligible,
            has_local_progress,
        }
    }

    /// Explicit lifecycle state derived from one marker probe.
    pub async fn status(&self, key: &AttemptKey) -> AttemptStatus {
        AttemptStatus::from_markers(self.read_markers(key).await)
    }

    /// May the student enter this test?
    ///
    /// The retest marker always overrides a stale completion flag.
    pub async fn check_access(&self, key: &AttemptKey) -> AccessDecision {
        let markers = self.read_markers(key).await;
        if markers.retest_eligible {
            return AccessDecision::allow();
        }
        if markers.completed {
            return AccessDecision::deny(AccessDenied::AlreadyCompleted);
        }
        AccessDecision::allow()
    }

    /// Commit a successful submission.
    ///
    /// Sets the completion marker and clears every other marker for the
    /// attempt: retest state (a non-retest submission clears leftover grant
    /// markers too) and the timer/answer keys, which must not resurrect a
    /// finished session. Safe to call twice.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError` if the completion marker cannot be written; the
    /// auxiliary clears are best-effort.
    pub async fn mark_completed(&self, key: &AttemptKey) -> Result<(), AttemptError> {
        self.kv.set(&key.completed_key(), MARKER).await?;

        for store_key in [
            key.retest_key(),
            key.retest_assignment_key(),
            key.answers_key(),
            key.drawing_doc_key(),
            key.timer_key(),
        ] {
            if let Err(err) = self.kv.remove(&store_key).await {
                tracing::warn!(key = %store_key, error = %err, "attempt cleanup failed");
            }
        }
        Ok(())
    }

    /// Cache a server-granted retest signal.
    ///
    /// Idempotent: this runs on every poll of the active-tests listing. A
    /// non-available signal is a no-op — the server is authoritative and the
    /// client never invents eligibility. The completion marker is left
    /// untouched on purpose (see the type-level doc).
    ///
    /// # Errors
    ///
    /// Returns `AttemptError` if the markers cannot be written.
    pub async fn ingest_retest_availability(
        &self,
        key: &AttemptKey,
        signal: RetestSignal,
    ) -> Result<(), AttemptError> {
        if !signal.available {
            return Ok(());
        }

        self.kv.set(&key.retest_key(), MARKER).await?;
        if let Some(assignment_id) = signal.assignment_id {
            self.kv
                .set(&key.retest_assignment_key(), &assignment_id.to_string())
                .await?;
        }
        Ok(())
    }

    /// Ingest the retest signals for a whole active-tests listing.
    ///
    /// Per-test failures are logged and do not abort the rest of the listing.
    pub async fn ingest_active_tests(&self, student: exam_core::model::StudentId, entries: &[ActiveTestEntry]) {
        for entry in entries {
            let key = AttemptKey::new(student, entry.test_type, entry.test_id);
            if let Err(err) = self.ingest_retest_availability(&key, entry.retest).await {
                tracing::warn!(
                    test_id = %entry.test_id,
                    error = %err,
                    "retest signal ingest failed"
                );
            }
        }
    }

    /// The cached retest assignment id, if one was granted.
    pub async fn retest_assignment(&self, key: &AttemptKey) -> Option<AssignmentId> {
        let stored = match self.kv.get(&key.retest_assignment_key()).await {
            Ok(value) => value?,
            Err(err) => {
                tracing::warn!(error = %err, "retest assignment read failed");
                return None;
            }
        };
        stored.parse().ok()
    }

    async fn marker_set(&self, store_key: &str) -> bool {
        match self.kv.get(store_key).await {
            Ok(value) => value.as_deref() == Some(MARKER),
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "marker read failed");
                false
            }
        }
    }

    async fn key_present(&self, store_key: &str) -> bool {
        match self.kv.get(store_key).await {
            Ok(value) => value.is_some(),
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "marker read failed");
                false
            }
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{StudentId, TestId, TestType};
    use storage::repository::InMemoryKeyValueStore;

    fn key() -> AttemptKey {
        AttemptKey::new(StudentId::new(42), TestType::MultipleChoice, TestId::new(7))
    }

    fn service(store: &InMemoryKeyValueStore) -> AttemptStatusService {
        AttemptStatusService::new(Arc::new(store.clone()))
    }

    fn grant(assignment: Option<u64>) -> RetestSignal {
        RetestSignal {
            available: true,
            attempts_left: Some(1),
            assignment_id: assignment.map(AssignmentId::new),
        }
    }

    #[tokio::test]
    async fn fresh_attempt_is_accessible() {
        let store = InMemoryKeyValueStore::new();
        let attempts = service(&store);
        let decision = attempts.check_access(&key()).await;
        assert!(decision.allowed);
        assert_eq!(attempts.status(&key()).await, AttemptStatus::NotStarted);
    }

    #[tokio::test]
    async fn completed_attempt_is_blocked() {
        let store = InMemoryKeyValueStore::new();
        let attempts = service(&store);
        attempts.mark_completed(&key()).await.unwrap();

        let decision = attempts.check_access(&key()).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(AccessDenied::AlreadyCompleted));
        assert_eq!(attempts.status(&key()).await, AttemptStatus::Completed);
    }

    #[tokio::test]
    async fn mark_completed_purges_session_state() {
        let store = InMemoryKeyValueStore::new();
        store.set("answers:42:mc:7", "{}").await.unwrap();
        store.set("timer:42:mc:7", "{}").await.unwrap();
        store.set("retest:42:mc:7", "true").await.unwrap();
        store.set("retestAssignment:42:mc:7", "55").await.unwrap();

        let attempts = service(&store);
        attempts.mark_completed(&key()).await.unwrap();

        assert_eq!(store.get("answers:42:mc:7").await.unwrap(), None);
        assert_eq!(store.get("timer:42:mc:7").await.unwrap(), None);
        assert_eq!(store.get("retest:42:mc:7").await.unwrap(), None);
        assert_eq!(store.get("retestAssignment:42:mc:7").await.unwrap(), None);
        assert_eq!(
            store.get("completed:42:mc:7").await.unwrap().as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn mark_completed_twice_is_idempotent() {
        let store = InMemoryKeyValueStore::new();
        let attempts = service(&store);
        attempts.mark_completed(&key()).await.unwrap();
        attempts.mark_completed(&key()).await.unwrap();
        assert_eq!(attempts.status(&key()).await, AttemptStatus::Completed);
    }

    #[tokio::test]
    async fn retest_grant_overrides_completion_without_deleting_it() {
        // Scenario: retest {available:true, assignmentId:55} while completed.
        let store = InMemoryKeyValueStore::new();
        let attempts = service(&store);
        attempts.mark_completed(&key()).await.unwrap();

        attempts
            .ingest_retest_availability(&key(), grant(Some(55)))
            .await
            .unwrap();

        let decision = attempts.check_access(&key()).await;
        assert!(decision.allowed);
        // Completion marker is still readable until the next mark_completed.
        assert_eq!(
            store.get("completed:42:mc:7").await.unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(
            attempts.retest_assignment(&key()).await,
            Some(AssignmentId::new(55))
        );
        assert_eq!(attempts.status(&key()).await, AttemptStatus::RetestEligible);
    }

    #[tokio::test]
    async fn unavailable_signal_is_a_no_op() {
        let store = InMemoryKeyValueStore::new();
        let attempts = service(&store);
        attempts
            .ingest_retest_availability(
                &key(),
                RetestSignal {
                    available: false,
                    attempts_left: None,
                    assignment_id: Some(AssignmentId::new(99)),
                },
            )
            .await
            .unwrap();

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn repeated_ingest_is_idempotent() {
        let store = InMemoryKeyValueStore::new();
        let attempts = service(&store);
        attempts
            .ingest_retest_availability(&key(), grant(Some(55)))
            .await
            .unwrap();
        attempts
            .ingest_retest_availability(&key(), grant(Some(55)))
            .await
            .unwrap();
        assert_eq!(attempts.status(&key()).await, AttemptStatus::RetestEligible);
    }

    #[tokio::test]
    async fn retest_submission_clears_grant_markers() {
        let store = InMemoryKeyValueStore::new();
        let attempts = service(&store);
        attempts
            .ingest_retest_availability(&key(), grant(Some(55)))
            .await
            .unwrap();
        attempts.mark_completed(&key()).await.unwrap();

        assert_eq!(attempts.status(&key()).await, AttemptStatus::Completed);
        assert_eq!(attempts.retest_assignment(&key()).await, None);
    }

    #[tokio::test]
    async fn local_progress_shows_in_progress() {
        let store = InMemoryKeyValueStore::new();
        store.set("answers:42:mc:7", "{}").await.unwrap();
        let attempts = service(&store);
        assert_eq!(attempts.status(&key()).await, AttemptStatus::InProgress);
    }
}
