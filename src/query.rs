use crate::config::FailurePolicy;
use crate::document::Document;
use crate::error::QueryError;
use crate::store::DocumentStore;
use crate::timestamp;

/// Window used when a caller gives no lower bound.
pub const DEFAULT_WINDOW_SECS: i64 = 300;

/// Inclusive timestamp bounds; a missing start means "300 seconds before
/// now", a missing end means "now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl Window {
    pub fn between(start_ms: i64, end_ms: i64) -> Self {
        Self {
            start_ms: Some(start_ms),
            end_ms: Some(end_ms),
        }
    }

    pub fn since(start_ms: i64) -> Self {
        Self {
            start_ms: Some(start_ms),
            end_ms: None,
        }
    }

    pub fn resolve(&self, now_ms: i64) -> (i64, i64) {
        let start = self
            .start_ms
            .unwrap_or_else(|| timestamp::shift(now_ms, -DEFAULT_WINDOW_SECS));
        let end = self.end_ms.unwrap_or(now_ms);
        (start, end)
    }
}

/// Range lookups over one collection. Each call re-queries the store.
#[derive(Clone, Copy)]
pub struct WindowQuery<'a> {
    store: &'a dyn DocumentStore,
    policy: FailurePolicy,
}

impl<'a> WindowQuery<'a> {
    pub fn new(store: &'a dyn DocumentStore, policy: FailurePolicy) -> Self {
        Self { store, policy }
    }

    pub async fn fetch(&self, collection: &str, window: Window) -> Result<Vec<Document>, QueryError> {
        let (start_ms, end_ms) = window.resolve(timestamp::now_ms());
        self.fetch_range(collection, start_ms, end_ms).await
    }

    /// Under `FailOpen` a store fault is logged and reads as an empty result,
    /// so callers cannot tell an outage from a quiet window.
    pub async fn fetch_range(
        &self,
        collection: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Document>, QueryError> {
        if start_ms > end_ms {
            return Err(QueryError::InvalidRange { start_ms, end_ms });
        }

        match self.store.find_range(collection, start_ms, end_ms).await {
            Ok(documents) => {
                tracing::debug!(
                    collection,
                    start_ms,
                    end_ms,
                    count = documents.len(),
                    "window query"
                );
                Ok(documents)
            }
            Err(err) if self.policy.is_fail_open() => {
                tracing::error!(error=%err, collection, "window query failed; treating as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::test_support::{doc, MemoryStore};
    use serde_json::json;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new("tesla");
        for ts in [500, 1000, 1500, 2000, 2500] {
            store.seed("vehicle", doc(json!({"vin": "V1", "timestamp": ts})));
        }
        store
    }

    #[tokio::test]
    async fn bounds_are_inclusive() {
        let store = seeded_store();
        let query = WindowQuery::new(&store, FailurePolicy::FailOpen);
        let docs = query.fetch_range("vehicle", 1000, 2000).await.unwrap();
        let stamps: Vec<i64> = docs.iter().filter_map(|d| d.timestamp_ms()).collect();
        assert_eq!(stamps, vec![1000, 1500, 2000]);
    }

    #[tokio::test]
    async fn inverted_range_never_reaches_the_store() {
        let store = seeded_store();
        for policy in [FailurePolicy::FailOpen, FailurePolicy::FailFast] {
            let query = WindowQuery::new(&store, policy);
            let err = query.fetch_range("vehicle", 2001, 2000).await.unwrap_err();
            assert!(matches!(
                err,
                QueryError::InvalidRange {
                    start_ms: 2001,
                    end_ms: 2000
                }
            ));
        }
        assert_eq!(store.range_queries(), 0);
    }

    #[tokio::test]
    async fn store_faults_follow_policy() {
        let store = seeded_store();
        store.fail_reads(true);

        let open = WindowQuery::new(&store, FailurePolicy::FailOpen)
            .fetch_range("vehicle", 0, 5000)
            .await
            .unwrap();
        assert!(open.is_empty());

        let fast = WindowQuery::new(&store, FailurePolicy::FailFast)
            .fetch_range("vehicle", 0, 5000)
            .await;
        assert!(matches!(fast, Err(QueryError::Store(StoreError::Database(_)))));
    }

    #[test]
    fn default_window_is_last_five_minutes() {
        assert_eq!(Window::default().resolve(1_000_000), (700_000, 1_000_000));
        assert_eq!(Window::since(10).resolve(1_000_000), (10, 1_000_000));
        assert_eq!(Window::between(1, 2).resolve(1_000_000), (1, 2));
    }

    #[tokio::test]
    async fn fetch_uses_resolved_window() {
        let store = MemoryStore::new("tesla");
        let now = timestamp::now_ms();
        store.seed("vehicle", doc(json!({"vin": "V1", "timestamp": now - 10_000})));
        store.seed("vehicle", doc(json!({"vin": "V1", "timestamp": now - 600_000})));
        let docs = WindowQuery::new(&store, FailurePolicy::FailOpen)
            .fetch("vehicle", Window::default())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
    }
}
