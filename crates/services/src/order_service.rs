use std::collections::BTreeSet;
use std::sync::Arc;

use exam_core::model::{AttemptKey, QuestionId};
use exam_core::shuffle;
use storage::repository::KeyValueStore;

/// Per-student deterministic question order, cached per attempt.
///
/// The order is computed once from the attempt's seed and persisted, so
/// re-entering the test reproduces the identical order and answer indices
/// recorded mid-session stay valid on resume. The cache is invalidated only
/// when the live question list itself changes (a different id set), in which
/// case the order is recomputed from the seed — still deterministic.
pub struct QuestionOrderService {
    kv: Arc<dyn KeyValueStore>,
}

impl QuestionOrderService {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// The question order for this attempt, given the live question ids.
    pub async fn order_for(&self, key: &AttemptKey, live_ids: &[QuestionId]) -> Vec<QuestionId> {
        let store_key = key.order_key();

        if let Some(cached) = self.cached_order(&store_key).await {
            if same_id_set(&cached, live_ids) {
                return cached;
            }
            tracing::debug!(key = %store_key, "question list changed; recomputing order");
        }

        let order = shuffle::shuffle(&key.shuffle_seed(), live_ids.to_vec());
        match serde_json::to_string(&order) {
            Ok(json) => {
                if let Err(err) = self.kv.set(&store_key, &json).await {
                    tracing::warn!(key = %store_key, error = %err, "order cache write failed");
                }
            }
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "order failed to encode");
            }
        }
        order
    }

    /// Drop the cached order (used when an attempt is fully reset).
    pub async fn clear(&self, key: &AttemptKey) {
        let store_key = key.order_key();
        if let Err(err) = self.kv.remove(&store_key).await {
            tracing::warn!(key = %store_key, error = %err, "order cache clear failed");
        }
    }

    async fn cached_order(&self, store_key: &str) -> Option<Vec<QuestionId>> {
        let stored = match self.kv.get(store_key).await {
            Ok(value) => value?,
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "order cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&stored) {
            Ok(order) => Some(order),
            Err(err) => {
                tracing::warn!(key = %store_key, error = %err, "corrupt order cache discarded");
                None
            }
        }
    }
}

fn same_id_set(a: &[QuestionId], b: &[QuestionId]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let a: BTreeSet<_> = a.iter().collect();
    let b: BTreeSet<_> = b.iter().collect();
    a == b
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

    fn ids(raw: &[u64]) -> Vec<QuestionId> {
        raw.iter().copied().map(QuestionId::new).collect()
    }

    fn service(store: &InMemoryKeyValueStore) -> QuestionOrderService {
        QuestionOrderService::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn order_is_cached_across_sessions() {
        let store = InMemoryKeyValueStore::new();
        let first = service(&store).order_for(&key(), &ids(&[1, 2, 3, 4, 5])).await;
        // New service instance over the same store: same order.
        let second = service(&store).order_for(&key(), &ids(&[1, 2, 3, 4, 5])).await;
        assert_eq!(first, second);
        assert!(store.get("shuffleOrder:42:mc:7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn order_is_a_permutation_of_live_ids() {
        let store = InMemoryKeyValueStore::new();
        let live = ids(&[10, 20, 30, 40]);
        let order = service(&store).order_for(&key(), &live).await;
        let mut sorted = order.clone();
        sorted.sort();
        let mut expected = live.clone();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[tokio::test]
    async fn changed_question_list_recomputes() {
        let store = InMemoryKeyValueStore::new();
        let svc = service(&store);
        let first = svc.order_for(&key(), &ids(&[1, 2, 3])).await;
        let second = svc.order_for(&key(), &ids(&[1, 2, 3, 4])).await;
        assert_ne!(first.len(), second.len());
        // And the new order is now the cached one.
        let third = svc.order_for(&key(), &ids(&[1, 2, 3, 4])).await;
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn corrupt_cache_recomputes_deterministically() {
        let store = InMemoryKeyValueStore::new();
        store.set("shuffleOrder:42:mc:7", "garbage").await.unwrap();
        let order = service(&store).order_for(&key(), &ids(&[1, 2])).await;
        assert_eq!(order.len(), 2);
    }

    #[tokio::test]
    async fn clear_drops_cache() {
        let store = InMemoryKeyValueStore::new();
        let svc = service(&store);
        svc.order_for(&key(), &ids(&[1, 2])).await;
        svc.clear(&key()).await;
        assert!(store.get("shuffleOrder:42:mc:7").await.unwrap().is_none());
    }
}
