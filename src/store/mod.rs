pub mod postgres;

use crate::config::FailurePolicy;
use crate::document::Document;
use crate::error::StoreError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A freshly inserted document, as delivered by the insert feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub namespace: String,
    pub collection: String,
    pub document: Document,
}

impl ChangeEvent {
    pub fn topic(&self) -> String {
        format!("{}/{}", self.namespace, self.collection)
    }
}

pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

/// Named-collection document store. Duplicate `vin + timestamp` pairs are
/// allowed and consumers must tolerate them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn namespace(&self) -> &str;

    async fn insert_one(&self, collection: &str, document: &Document) -> Result<(), StoreError>;

    /// Documents whose `timestamp` lies in `[start_ms, end_ms]`, in store order.
    async fn find_range(
        &self,
        collection: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    async fn watch_inserts(&self) -> Result<ChangeStream, StoreError>;
}

/// Insert one document honoring the `write_to_store` toggle and the failure
/// policy. Returns whether the document was written.
pub async fn write_document(
    store: &dyn DocumentStore,
    enabled: bool,
    policy: FailurePolicy,
    collection: &str,
    document: &Document,
) -> Result<bool, StoreError> {
    if !enabled {
        tracing::debug!(collection, "writing to the document store is disabled");
        return Ok(false);
    }

    match store.insert_one(collection, document).await {
        Ok(()) => {
            tracing::debug!(collection, vin = ?document.vin(), "inserted document");
            Ok(true)
        }
        Err(err) if policy.is_fail_open() => {
            tracing::error!(error=%err, collection, "failed to write document to the store");
            tracing::error!(collection, document = ?document, "document was not written");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}
