//! # thermostream
//!
//! A durable aggregation pipeline for per-sensor temperature readings
//! delivered over a partitioned, at-least-once stream transport and
//! persisted into an eventually-consistent key-value table.
//!
//! ## Features
//!
//! - **Idempotent provisioning**: stream and table creation with
//!   polling-based readiness detection and bounded wait budgets
//! - **Per-shard processing**: one worker per shard buffers, decodes and
//!   merges readings before committing progress
//! - **Read-merge-write persistence**: row updates union the stored
//!   timestamp map with new readings instead of overwriting it
//! - **Checkpoint-after-flush**: shard progress is committed only once the
//!   corresponding readings are durably merged into the table
//! - **Graceful shutdown**: in-flight polls and shard workers observe a
//!   cancellation token and finish with one final checkpoint attempt
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thermostream::{
//!     InMemoryStreamTransport, InMemoryTableStore, PipelineConfig,
//!     PipelineCoordinator, ShutdownController,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(InMemoryStreamTransport::new());
//!     let store = Arc::new(InMemoryTableStore::new());
//!     let controller = ShutdownController::new();
//!
//!     let coordinator = PipelineCoordinator::new(
//!         transport,
//!         store,
//!         PipelineConfig::from_env(),
//!         controller.token(),
//!     );
//!     coordinator.run().await?;
//!     Ok(())
//! }
//! ```

pub mod thermostream;

// Re-export the main API at the crate root for easy access
pub use thermostream::{
    aggregator::ShardAggregator,
    codec::{self, MalformedRecord, Reading},
    config::{PipelineConfig, PipelineDefaults},
    coordinator::PipelineCoordinator,
    error::PipelineError,
    lifecycle::{LifecycleOptions, StreamLifecycleManager, TableLifecycleManager},
    processor::{BatchOutcome, ProcessorState, ShardRecordProcessor, ShutdownReason},
    query::TemperatureQuery,
    run::{RunObservation, RunRegister},
    shutdown::{shutdown_signal, ShutdownController, ShutdownSignal, ShutdownToken},
    transport::{
        AggregationRow, Checkpointer, CheckpointMarker, GetRecordsOutput,
        InMemoryStreamTransport, InMemoryTableStore, KeySchema, RawRecord, ShardCheckpointer,
        ShardId, ShardIterator, StreamDescription, StreamStatus, StreamTransport, TableStatus,
        TableStore, ThroughputHint, TransportError,
    },
};
