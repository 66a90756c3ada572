use crate::document::Document;
use crate::error::{PublishError, SinkError, SourceError, StoreError};
use crate::pubsub::Publisher;
use crate::sink::{MetricSink, Point};
use crate::source::VehicleApi;
use crate::store::{ChangeEvent, ChangeStream, DocumentStore};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

pub fn doc(value: Value) -> Document {
    Document::from_value(value).expect("test document must be a JSON object")
}

fn simulated_fault() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

/// Insertion-ordered in-memory store. `find_range` returns documents in the
/// order they were inserted, which lets tests control "store order".
pub struct MemoryStore {
    namespace: String,
    documents: Mutex<Vec<(String, Document)>>,
    failing_reads: Mutex<HashSet<String>>,
    fail_all_reads: AtomicBool,
    fail_writes: AtomicBool,
    range_queries: AtomicUsize,
    subscriptions: AtomicUsize,
    refused_subscriptions: AtomicUsize,
    feed: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new(namespace: &str) -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            namespace: namespace.to_string(),
            documents: Mutex::new(Vec::new()),
            failing_reads: Mutex::new(HashSet::new()),
            fail_all_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            range_queries: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            refused_subscriptions: AtomicUsize::new(0),
            feed,
        }
    }

    pub fn seed(&self, collection: &str, document: Document) {
        self.documents
            .lock()
            .unwrap()
            .push((collection.to_string(), document));
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == collection)
            .map(|(_, document)| document.clone())
            .collect()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_all_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads_for(&self, collection: &str) {
        self.failing_reads
            .lock()
            .unwrap()
            .insert(collection.to_string());
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn range_queries(&self) -> usize {
        self.range_queries.load(Ordering::SeqCst)
    }

    /// The next `count` calls to `watch_inserts` fail.
    pub fn refuse_subscriptions(&self, count: usize) {
        self.refused_subscriptions.store(count, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn check_read(&self, collection: &str) -> Result<(), StoreError> {
        if self.fail_all_reads.load(Ordering::SeqCst)
            || self.failing_reads.lock().unwrap().contains(collection)
        {
            return Err(simulated_fault());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn insert_one(&self, collection: &str, document: &Document) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(simulated_fault());
        }
        if document.timestamp_ms().is_none() {
            return Err(StoreError::MissingField("timestamp"));
        }
        self.seed(collection, document.clone());
        let _ = self.feed.send(ChangeEvent {
            namespace: self.namespace.clone(),
            collection: collection.to_string(),
            document: document.clone(),
        });
        Ok(())
    }

    async fn find_range(
        &self,
        collection: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Document>, StoreError> {
        self.range_queries.fetch_add(1, Ordering::SeqCst);
        self.check_read(collection)?;
        Ok(self
            .documents(collection)
            .into_iter()
            .filter(|document| {
                document
                    .timestamp_ms()
                    .map(|ts| ts >= start_ms && ts <= end_ms)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.check_read(collection)?;
        Ok(self.documents(collection))
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .documents
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn watch_inserts(&self) -> Result<ChangeStream, StoreError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refused_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if refused.is_ok() {
            return Err(simulated_fault());
        }
        let stream = BroadcastStream::new(self.feed.subscribe())
            .map(|item| item.map_err(|_| StoreError::FeedClosed));
        Ok(stream.boxed())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    points: Mutex<Vec<Point>>,
    failing: AtomicBool,
    rejected_entities: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }

    pub fn entity_points(&self, entity: &str) -> Vec<Point> {
        self.points()
            .into_iter()
            .filter(|point| point.entity == entity)
            .collect()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only the points for `entity`.
    pub fn reject_entity(&self, entity: &str) {
        self.rejected_entities
            .lock()
            .unwrap()
            .insert(entity.to_string());
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn write_point(&self, point: &Point) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst)
            || self.rejected_entities.lock().unwrap().contains(point.entity)
        {
            return Err(SinkError::Rejected(point.to_line_protocol()));
        }
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Value,
}

pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    connected: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PublishError::Disconnected);
        }
        let payload: Value = serde_json::from_slice(&payload)?;
        self.messages.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Scripted telemetry source: one vehicle summary plus per-endpoint
/// responses; endpoints without a response fail.
pub struct FakeVehicleApi {
    vehicle: Mutex<Option<Document>>,
    endpoints: Mutex<HashMap<String, Document>>,
    endpoint_calls: AtomicUsize,
}

impl FakeVehicleApi {
    pub fn new() -> Self {
        Self {
            vehicle: Mutex::new(None),
            endpoints: Mutex::new(HashMap::new()),
            endpoint_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_vehicle(&self, vehicle: Option<Document>) {
        *self.vehicle.lock().unwrap() = vehicle;
    }

    pub fn set_endpoint(&self, endpoint: &str, data: Document) {
        self.endpoints
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), data);
    }

    pub fn endpoint_calls(&self) -> usize {
        self.endpoint_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VehicleApi for FakeVehicleApi {
    async fn vehicle(&self, vin: &str) -> Result<Document, SourceError> {
        self.vehicle
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SourceError::VehicleNotFound(vin.to_string()))
    }

    async fn endpoint(&self, _vehicle_id: i64, endpoint: &str) -> Result<Document, SourceError> {
        self.endpoint_calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or(SourceError::Status(408))
    }
}
