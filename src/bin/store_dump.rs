use anyhow::Result;
use clap::Parser;
use std::io::Write;
use vehicle_telemetry::cli::{connect_store, ConfigArgs};
use vehicle_telemetry::dump::{dump_all, dump_collection};
use vehicle_telemetry::store::DocumentStore;

#[derive(Parser, Debug)]
#[command(about = "Print stored telemetry documents as JSON lines")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,
    /// Collection to print; every collection when omitted.
    #[arg(long)]
    collection: Option<String>,
    /// Show fields that changed since the previous document.
    #[arg(long, default_value_t = false)]
    diff: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config.bootstrap(env!("CARGO_BIN_NAME"))?;
    let store = connect_store(&config).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Using namespace {}", store.namespace())?;
    let count = match args.collection.as_deref() {
        Some("all") | None => dump_all(&store, args.diff, &mut out).await?,
        Some(collection) => dump_collection(&store, collection, args.diff, &mut out).await?,
    };
    out.flush()?;
    tracing::debug!(count, "dumped documents");
    Ok(())
}
