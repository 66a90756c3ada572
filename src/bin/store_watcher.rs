use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use vehicle_telemetry::bridge::LiveBridge;
use vehicle_telemetry::cli::{connect_store, point_writer, ConfigArgs};
use vehicle_telemetry::mapper::MetricMapper;
use vehicle_telemetry::pubsub::{MqttPublisher, Publisher};

#[derive(Parser, Debug)]
#[command(about = "Forward newly stored telemetry documents to MQTT and the metrics sink")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config.bootstrap(env!("CARGO_BIN_NAME"))?;

    let store = Arc::new(connect_store(&config).await?);

    let (publisher, mqtt_handle) = if config.publish_on_event {
        let (publisher, handle) = MqttPublisher::connect(&config.pubsub);
        (Some(Arc::new(publisher) as Arc<dyn Publisher>), Some(handle))
    } else {
        (None, None)
    };

    let bridge = LiveBridge::new(
        store,
        publisher,
        point_writer(&config)?,
        MetricMapper::new(config.vehicle_strategy),
    );

    tracing::info!(namespace=%config.store.namespace, "watching for new documents");
    tokio::select! {
        _ = bridge.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Some(handle) = mqtt_handle {
        handle.abort();
    }
    Ok(())
}
