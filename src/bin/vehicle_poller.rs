use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use vehicle_telemetry::cli::{connect_store, ConfigArgs};
use vehicle_telemetry::poller::Poller;
use vehicle_telemetry::source::HttpVehicleApi;

#[derive(Parser, Debug)]
#[command(about = "Poll the vehicle telemetry api and store every snapshot")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config.bootstrap(env!("CARGO_BIN_NAME"))?;

    let token = config
        .access_token
        .as_deref()
        .context("access_token not configured (set it in the config file or VT_ACCESS_TOKEN)")?;
    let api = Arc::new(HttpVehicleApi::new(&config.api_base_url, token)?);
    let store = Arc::new(connect_store(&config).await?);
    let mut poller = Poller::from_config(api, store, &config)?;

    tracing::info!(poll_interval_secs = config.poll_interval_secs, "starting vehicle poller");
    tokio::select! {
        res = poller.run(config.poll_interval()) => {
            res.context("poller stopped on a store failure")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    Ok(())
}
