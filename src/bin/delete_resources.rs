//! Best-effort teardown of the pipeline's resources
//!
//! Deletes the stream and the aggregation table; "not found" is success
//! and any other failure is logged without aborting, so this can always
//! run after a crashed or interrupted pipeline. Wired to the in-memory
//! transports; point it at a real client by swapping the trait objects.

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use thermostream::{
    InMemoryStreamTransport, InMemoryTableStore, LifecycleOptions, PipelineConfig,
    ShutdownController, StreamLifecycleManager, StreamTransport, TableLifecycleManager, TableStore,
};

#[derive(Parser, Debug)]
#[command(name = "delete-resources")]
#[command(about = "Deletes the temperature stream and aggregation table")]
struct Args {
    /// Name of the stream to delete
    #[arg(long)]
    stream_name: Option<String>,

    /// Name of the aggregation table to delete
    #[arg(long)]
    table_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(stream_name) = args.stream_name {
        config.stream_name = stream_name;
    }
    if let Some(table_name) = args.table_name {
        config.table_name = table_name;
    }

    let options = LifecycleOptions {
        poll_interval: Duration::from_millis(100),
        creation_timeout: config.creation_timeout,
        deletion_timeout: config.deletion_timeout,
    };
    let controller = ShutdownController::new();

    let transport: Arc<dyn StreamTransport> = Arc::new(InMemoryStreamTransport::new());
    let store: Arc<dyn TableStore> = Arc::new(InMemoryTableStore::new());

    let streams = StreamLifecycleManager::new(transport, options, controller.token());
    let tables = TableLifecycleManager::new(store, options, controller.token());

    tables.delete(&config.table_name).await;
    streams.delete(&config.stream_name).await;
    Ok(())
}
