use anyhow::{ensure, Result};
use clap::Parser;
use std::time::Duration;
use vehicle_telemetry::cli::{connect_store, metrics_sink, ConfigArgs};
use vehicle_telemetry::replay::{log_report, ReplayDriver, ReplaySettings};
use vehicle_telemetry::timestamp;

#[derive(Parser, Debug)]
#[command(about = "Correlate sleep latency and replay stored telemetry into the metrics sink")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,
    /// Replay documents this many seconds old and newer (default 3600).
    #[arg(long)]
    secondsback: Option<i64>,
    /// How far back to look for idle markers.
    #[arg(long)]
    lookback_secs: Option<i64>,
    /// Keep running, one replay every N seconds.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config.bootstrap(env!("CARGO_BIN_NAME"))?;

    let mut settings = ReplaySettings::from_config(&config);
    if let Some(seconds_back) = args.secondsback {
        ensure!(seconds_back > 0, "--secondsback must be > 0");
        settings.seconds_back = seconds_back;
    }
    if let Some(lookback) = args.lookback_secs {
        ensure!(lookback > 0, "--lookback-secs must be > 0");
        settings.correlator.lookback_secs = lookback;
    }

    let store = connect_store(&config).await?;
    let driver = ReplayDriver::new(&store, metrics_sink(&config)?, settings);

    match args.interval_secs {
        Some(interval) => {
            ensure!(interval > 0, "--interval-secs must be > 0");
            tracing::info!(interval_secs = interval, "starting replay daemon");
            tokio::select! {
                _ = driver.run_daemon(Duration::from_secs(interval)) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
            }
        }
        None => {
            let report = driver.run_once(timestamp::now_ms()).await?;
            log_report(&report);
        }
    }

    Ok(())
}
