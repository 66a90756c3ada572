use crate::config::{Config, FailurePolicy};
use crate::correlator::{CorrelationReport, CorrelatorSettings, SleepCorrelator};
use crate::error::ReplayError;
use crate::mapper::{MapOutcome, MetricMapper, VehicleStrategy};
use crate::query::WindowQuery;
use crate::sink::{MetricSink, PointWriter, WriteTally};
use crate::store::DocumentStore;
use crate::timestamp;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPhase {
    RunningCorrelation,
    RunningReplay,
}

impl fmt::Display for ReplayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayPhase::RunningCorrelation => write!(f, "running correlation"),
            ReplayPhase::RunningReplay => write!(f, "running replay"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySettings {
    pub seconds_back: i64,
    pub collections: Vec<String>,
    pub correlator: CorrelatorSettings,
    pub vehicle_strategy: VehicleStrategy,
    pub write_to_sink: bool,
    /// Governs both the window queries and the point writes of a run.
    pub failure_policy: FailurePolicy,
}

impl ReplaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            seconds_back: config.replay.seconds_back,
            collections: config.replay.collections.clone(),
            correlator: CorrelatorSettings::from(&config.correlation),
            vehicle_strategy: config.vehicle_strategy,
            write_to_sink: config.write_to_sink,
            failure_policy: config.failure_policy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub correlation: CorrelationReport,
    pub documents: usize,
    pub rejected: usize,
    pub unrecognized: Vec<String>,
    pub points: WriteTally,
}

/// One replay run: the sleep correlator, then every tracked collection over
/// the last `seconds_back` seconds pushed through the metric mapper.
pub struct ReplayDriver<'a> {
    store: &'a dyn DocumentStore,
    writer: PointWriter,
    settings: ReplaySettings,
}

impl<'a> ReplayDriver<'a> {
    pub fn new(store: &'a dyn DocumentStore, sink: Arc<dyn MetricSink>, settings: ReplaySettings) -> Self {
        let writer = PointWriter::new(sink, settings.write_to_sink, settings.failure_policy);
        Self {
            store,
            writer,
            settings,
        }
    }

    pub async fn run_once(&self, now_ms: i64) -> Result<ReplayReport, ReplayError> {
        let query = WindowQuery::new(self.store, self.settings.failure_policy);
        let mut report = ReplayReport::default();

        tracing::info!(phase=%ReplayPhase::RunningCorrelation, lookback_secs = self.settings.correlator.lookback_secs, "replay phase");
        report.correlation = SleepCorrelator::new(self.settings.correlator)
            .run(query, &self.writer, now_ms)
            .await?;

        tracing::info!(phase=%ReplayPhase::RunningReplay, seconds_back = self.settings.seconds_back, "replay phase");
        let mapper = MetricMapper::new(self.settings.vehicle_strategy);
        let start_ms = timestamp::shift(now_ms, -self.settings.seconds_back);

        for collection in &self.settings.collections {
            let documents = query.fetch_range(collection, start_ms, now_ms).await?;
            tracing::info!(collection=%collection, count = documents.len(), "got documents from the store");

            for document in &documents {
                match mapper.map(collection, document) {
                    MapOutcome::Points(points) => {
                        report.documents += 1;
                        report.points.absorb(self.writer.write_all(&points).await?);
                    }
                    MapOutcome::Rejected(fault) => {
                        tracing::warn!(collection=%collection, fault = ?fault, "skipping document");
                        report.rejected += 1;
                    }
                    MapOutcome::Unrecognized => {
                        tracing::error!(collection=%collection, "there is no mapping for collection");
                        report.unrecognized.push(collection.clone());
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Repeats `run_once` forever, `interval` apart. A failed run is logged
    /// and the next one still happens.
    pub async fn run_daemon(&self, interval: Duration) {
        loop {
            match self.run_once(timestamp::now_ms()).await {
                Ok(report) => log_report(&report),
                Err(err) => tracing::error!(error=%err, "replay run failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }
}

pub fn log_report(report: &ReplayReport) {
    tracing::info!(
        markers = report.correlation.markers_seen,
        samples = report.correlation.samples_emitted,
        documents = report.documents,
        rejected = report.rejected,
        written = report.points.written + report.correlation.points.written,
        dropped = report.points.dropped + report.correlation.points.dropped,
        "replay finished"
    );
}
