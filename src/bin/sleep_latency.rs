use anyhow::{ensure, Result};
use clap::Parser;
use vehicle_telemetry::cli::{connect_store, point_writer, ConfigArgs};
use vehicle_telemetry::correlator::{CorrelatorSettings, SleepCorrelator};
use vehicle_telemetry::query::WindowQuery;
use vehicle_telemetry::timestamp;

#[derive(Parser, Debug)]
#[command(about = "Write the seconds between idle markers and sleep transitions to the metrics sink")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long)]
    lookback_secs: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config.bootstrap(env!("CARGO_BIN_NAME"))?;

    let mut settings = CorrelatorSettings::from(&config.correlation);
    if let Some(lookback) = args.lookback_secs {
        ensure!(lookback > 0, "--lookback-secs must be > 0");
        settings.lookback_secs = lookback;
    }

    let store = connect_store(&config).await?;
    let writer = point_writer(&config)?;
    let report = SleepCorrelator::new(settings)
        .run(
            WindowQuery::new(&store, config.failure_policy),
            &writer,
            timestamp::now_ms(),
        )
        .await?;

    tracing::info!(
        markers = report.markers_seen,
        samples = report.samples_emitted,
        skipped = report.markers_skipped,
        faulted = report.markers_faulted,
        "sleep latency finished"
    );
    Ok(())
}
