//! Temperature consumer pipeline
//!
//! Provisions the stream and aggregation table, launches one worker per
//! shard and runs until SIGINT/SIGTERM. The bundled in-memory transports
//! stand in for the managed services; a real client plugs in behind the
//! same `StreamTransport`/`TableStore` traits. A small feeder publishes a
//! deterministic set of readings so the pipeline has something to chew on,
//! and the final aggregation snapshot is printed as JSON on exit.

use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thermostream::{
    codec, InMemoryStreamTransport, InMemoryTableStore, PipelineConfig, PipelineCoordinator,
    Reading, ShutdownController, StreamTransport, TableStore, TemperatureQuery,
};

#[derive(Parser, Debug)]
#[command(name = "temperature-consumer")]
#[command(about = "Aggregates per-sensor temperature readings from a partitioned stream")]
struct Args {
    /// Name of the stream to consume
    #[arg(long)]
    stream_name: Option<String>,

    /// Name of the aggregation table
    #[arg(long)]
    table_name: Option<String>,

    /// Shards to create the stream with (ignored if it already exists)
    #[arg(long)]
    shards: Option<usize>,

    /// Demo readings to publish per sensor
    #[arg(long, default_value_t = 10)]
    readings_per_sensor: usize,

    /// Sensors to simulate
    #[arg(long, default_value_t = 4)]
    sensors: usize,
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
    if let Some(shards) = args.shards {
        config.shard_count = shards;
    }
    // The in-memory transports settle quickly; no need for the managed
    // services' multi-second polling cadence here.
    config.stream_poll_interval = Duration::from_millis(50);
    config.table_poll_interval = Duration::from_millis(50);
    config.idle_backoff = Duration::from_millis(100);

    let transport = Arc::new(
        InMemoryStreamTransport::new()
            .with_activation_polls(2)
            .with_deletion_polls(1),
    );
    let store = Arc::new(
        InMemoryTableStore::new()
            .with_activation_polls(2)
            .with_deletion_polls(1),
    );

    let controller = ShutdownController::new();
    let coordinator = PipelineCoordinator::new(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn TableStore>,
        config.clone(),
        controller.token(),
    );

    let pipeline = tokio::spawn(async move { coordinator.run().await });

    let feeder_transport = Arc::clone(&transport);
    let feeder_config = config.clone();
    let sensors = args.sensors;
    let readings_per_sensor = args.readings_per_sensor;
    let feeder = tokio::spawn(async move {
        feed_demo_readings(&feeder_transport, &feeder_config, sensors, readings_per_sensor).await
    });

    let signal = thermostream::shutdown_signal();
    tokio::select! {
        received = signal => info!("Received {}, stopping pipeline", received),
        _ = wait_for_drain(&transport, &store, &config) => {
            info!("All published readings are aggregated, stopping pipeline")
        }
    }
    controller.shutdown();

    if let Err(err) = feeder.await? {
        error!("Feeder failed: {}", err);
    }
    pipeline.await??;

    let query = TemperatureQuery::new(
        Arc::clone(&store) as Arc<dyn TableStore>,
        config.table_name.clone(),
    );
    let snapshot = query.all_sensor_temperatures().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Publish a deterministic ramp of readings for each simulated sensor,
/// all stamped with this execution's run id.
async fn feed_demo_readings(
    transport: &InMemoryStreamTransport,
    config: &PipelineConfig,
    sensors: usize,
    readings_per_sensor: usize,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let run_id = SystemTime::now()
        .duration_since(UNIX_EPOCH)?
        .as_millis() as u64;

    // Wait for provisioning to finish before publishing.
    let mut created = false;
    for _ in 0..200 {
        if transport.describe_stream(&config.stream_name).await.is_ok() {
            created = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    if !created {
        return Err("stream was not provisioned in time".into());
    }

    for index in 0..readings_per_sensor {
        for sensor in 0..sensors {
            let reading = Reading {
                sequence: index as u64 + 1,
                temperature: 15.0 + sensor as f64 + index as f64 * 0.1,
                sensor_id: format!("tempSensor{}", sensor + 1),
                origin_timestamp_millis: run_id + index as u64 * 1_000,
                run_id,
            };
            let record = codec::encode(&reading, config.record_length);
            // Spread one run's records across shards the way producers do:
            // same partition key, explicit per-record hash.
            let hash = (sensor * readings_per_sensor + index) as u64;
            transport.push_record(&config.stream_name, record, Some(hash))?;
        }
    }
    info!(
        "Published {} readings across {} sensors (run {})",
        readings_per_sensor * sensors,
        sensors,
        run_id
    );
    Ok(())
}

/// Resolve once every published record has been checkpointed, meaning its
/// readings are merged into the table.
async fn wait_for_drain(
    transport: &InMemoryStreamTransport,
    store: &InMemoryTableStore,
    config: &PipelineConfig,
) {
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let Ok(description) = transport.describe_stream(&config.stream_name).await else {
            continue;
        };
        if store.row_count(&config.table_name) == 0 {
            continue;
        }
        let drained = description.shards.iter().all(|shard| {
            transport
                .pending_records(&config.stream_name, shard)
                .unwrap_or(1)
                == 0
        });
        if drained {
            return;
        }
    }
}
