use std::sync::Arc;

use exam_core::model::{AnswerSnapshot, AttemptKey, ExamId};
use storage::repository::KeyValueStore;

/// Periodic snapshotting of in-progress answers, and resumption from the
/// latest snapshot.
///
/// Saves are whole-value replacements (last write wins); a single
/// device/session writes each key, so there is no merge. The snapshot's
/// monotonic `seq` is the one reinforcement on top of the unordered store: a
/// write that is not newer than what is stored is discarded, so an in-flight
/// stale save racing past a fresher one cannot roll answers back.
///
/// Failures are logged, never surfaced: an autosave failure must never lose
/// the in-memory answers, only risk losing them on a later crash.
pub struct AnswerAutosaveService {
    kv: Arc<dyn KeyValueStore>,
}

impl AnswerAutosaveService {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Latest snapshot for `key`, or `None` when absent or unreadable.
    pub async fn restore(&self, key: &AttemptKey) -> Option<AnswerSnapshot> {
        let store_key = key.answers_key();
        let stored = match self.kv.get(&store_key).await {
            Ok(value) => value?,
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "snapshot read failed");
                return None;
            }
        };

        match serde_json::from_str(&stored) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "corrupt snapshot discarded");
                None
            }
        }
    }

    /// Persist `snapshot`, replacing the previous one.
    ///
    /// Drawing answers are additionally mirrored into the structured document
    /// shape the submission reads, in this same call and under the same key
    /// scheme, so restore and submission always observe consistent state.
    pub async fn save(&self, key: &AttemptKey, snapshot: &AnswerSnapshot) {
        let store_key = key.answers_key();

        if let Some(stored) = self.stored_seq(&store_key).await {
            if stored >= snapshot.seq {
                tracing::debug!(
                    key = %store_key,
                    stored_seq = stored,
                    write_seq = snapshot.seq,
                    "out-of-order snapshot write discarded"
                );
                return;
            }
        }

        self.write_json(&store_key, snapshot).await;

        // The mirror tracks the snapshot in the same call, including the
        // erased-to-empty case; a skipped write would leave stale strokes
        // behind for restore and submission to read.
        let doc = snapshot.drawing_document();
        if doc.shapes.is_empty() {
            if let Err(err) = self.kv.remove(&key.drawing_doc_key()).await {
                tracing::warn!(key = %key.drawing_doc_key(), error = %err, "drawing mirror clear failed");
            }
        } else {
            self.write_json(&key.drawing_doc_key(), &doc).await;
        }
    }

    /// Mirror the snapshot under the exam-scoped cache key so sibling tests in
    /// the same exam can prefetch it.
    pub async fn save_exam_mirror(
        &self,
        key: &AttemptKey,
        exam_id: ExamId,
        snapshot: &AnswerSnapshot,
    ) {
        self.write_json(&key.exam_answer_key(exam_id), snapshot).await;
    }

    /// Drop the snapshot and the mirrored drawing document.
    pub async fn clear(&self, key: &AttemptKey) {
        for store_key in [key.answers_key(), key.drawing_doc_key()] {
            if let Err(err) = self.kv.remove(&store_key).await {
                tracing::warn!(key = %store_key, error = %err, "snapshot clear failed");
            }
        }
    }

    async fn stored_seq(&self, store_key: &str) -> Option<u64> {
        let stored = self.kv.get(store_key).await.ok()??;
        let snapshot: AnswerSnapshot = serde_json::from_str(&stored).ok()?;
        Some(snapshot.seq)
    }

    async fn write_json<T: serde::Serialize>(&self, store_key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "snapshot failed to encode");
                return;
            }
        };
        if let Err(err) = self.kv.set(store_key, &json).await {
            tracing::warn!(key = %store_key, error = %err, "snapshot persist failed");
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
