use crate::error::StoreError;
use crate::mapper::{MapOutcome, MetricMapper};
use crate::pubsub::{publish_document, Publisher};
use crate::sink::{PointWriter, WriteTally};
use crate::store::{ChangeEvent, ChangeStream, DocumentStore};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Wait before re-subscribing to a broken insert feed.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub published: bool,
    pub unrecognized: bool,
    pub points: WriteTally,
}

/// Forwards freshly inserted documents to the broker and the metrics sink.
pub struct LiveBridge {
    store: Arc<dyn DocumentStore>,
    publisher: Option<Arc<dyn Publisher>>,
    writer: PointWriter,
    mapper: MetricMapper,
}

impl LiveBridge {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Option<Arc<dyn Publisher>>,
        writer: PointWriter,
        mapper: MetricMapper,
    ) -> Self {
        Self {
            store,
            publisher,
            writer,
            mapper,
        }
    }

    pub async fn handle_event(&self, event: ChangeEvent) -> EventOutcome {
        let topic = event.topic();
        let ChangeEvent {
            collection,
            mut document,
            ..
        } = event;
        document.strip_internal_ids();

        let mut outcome = EventOutcome::default();
        if let Some(publisher) = &self.publisher {
            match publish_document(publisher.as_ref(), &topic, &document).await {
                Ok(()) => {
                    tracing::debug!(topic=%topic, "published document");
                    outcome.published = true;
                }
                Err(err) => tracing::warn!(error=%err, topic=%topic, "document not published"),
            }
        }

        match self.mapper.map(&collection, &document) {
            MapOutcome::Points(points) => {
                for point in &points {
                    match self.writer.write(point).await {
                        Ok(tally) => outcome.points.absorb(tally),
                        Err(err) => {
                            tracing::error!(error=%err, collection=%collection, entity = point.entity, "failed to write point");
                            outcome.points.dropped += 1;
                        }
                    }
                }
            }
            MapOutcome::Rejected(fault) => {
                tracing::warn!(collection=%collection, fault = ?fault, "skipping document");
            }
            MapOutcome::Unrecognized => {
                tracing::info!(collection=%collection, "there is no mapping for collection");
                outcome.unrecognized = true;
            }
        }
        outcome
    }

    /// Drains one subscription. Returns `Ok` when the feed ends and the
    /// feed's error when the listener breaks. Events that cannot be read are
    /// logged and skipped.
    pub async fn pump(&self, mut feed: ChangeStream) -> Result<(), StoreError> {
        while let Some(item) = feed.next().await {
            match item {
                Ok(event) => {
                    self.handle_event(event).await;
                }
                Err(err) if err.ends_feed() => return Err(err),
                Err(err) => tracing::error!(error=%err, "skipping unreadable insert event"),
            }
        }
        Ok(())
    }

    pub async fn run(&self) {
        loop {
            match self.store.watch_inserts().await {
                Ok(feed) => match self.pump(feed).await {
                    Ok(()) => tracing::warn!("insert feed ended; re-subscribing"),
                    Err(err) => tracing::error!(error=%err, "insert feed broke; re-subscribing"),
                },
                Err(err) => tracing::error!(error=%err, "could not subscribe to inserts"),
            }
            sleep(RESUBSCRIBE_DELAY).await;
        }
    }
}
