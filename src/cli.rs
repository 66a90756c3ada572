use crate::config::Config;
use crate::logging::init_tracing;
use crate::sink::influx::InfluxSink;
use crate::sink::{MetricSink, PointWriter};
use crate::store::postgres::PgDocumentStore;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

/// Options every binary accepts.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to config.yaml; the well-known locations are searched when omitted.
    #[arg(long)]
    pub configfile: Option<PathBuf>,
}

impl ConfigArgs {
    /// Loads the configuration and installs tracing under `service`.
    pub fn bootstrap(&self, service: &str) -> Result<Config> {
        let config = Config::load(self.configfile.as_deref()).context("failed to load configuration")?;
        init_tracing(service, &config)?;
        Ok(config)
    }
}

pub async fn connect_store(config: &Config) -> Result<PgDocumentStore> {
    let database_url = config.database_url()?;
    PgDocumentStore::connect(database_url, &config.store.namespace, config.store.pool_size)
        .await
        .with_context(|| format!("failed to open document store `{}`", config.store.namespace))
}

pub fn metrics_sink(config: &Config) -> Result<Arc<dyn MetricSink>> {
    let sink = InfluxSink::new(&config.sink).context("failed to build metrics sink client")?;
    Ok(Arc::new(sink))
}

pub fn point_writer(config: &Config) -> Result<PointWriter> {
    Ok(PointWriter::from_config(metrics_sink(config)?, config))
}
