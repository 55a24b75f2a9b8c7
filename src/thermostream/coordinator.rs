//! Top-level pipeline driver
//!
//! Provisions the stream and the aggregation table, confirms both are
//! active, and only then launches one worker task per shard. Provisioning
//! is a hard ordering barrier: no worker starts, and therefore no flush
//! can happen, before the table exists.
//!
//! Workers run until the stream lease is lost or shutdown is requested;
//! there is no natural end state while the stream has data.

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::thermostream::aggregator::ShardAggregator;
use crate::thermostream::config::PipelineConfig;
use crate::thermostream::error::PipelineError;
use crate::thermostream::lifecycle::{LifecycleOptions, StreamLifecycleManager, TableLifecycleManager};
use crate::thermostream::processor::{BatchOutcome, ShardRecordProcessor, ShutdownReason};
use crate::thermostream::run::RunRegister;
use crate::thermostream::shutdown::ShutdownToken;
use crate::thermostream::transport::{ShardCheckpointer, ShardId, StreamTransport, TableStore};

pub struct PipelineCoordinator {
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn TableStore>,
    config: PipelineConfig,
    runs: Arc<RunRegister>,
    shutdown: ShutdownToken,
}

impl PipelineCoordinator {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        store: Arc<dyn TableStore>,
        config: PipelineConfig,
        shutdown: ShutdownToken,
    ) -> Self {
        PipelineCoordinator {
            transport,
            store,
            config,
            runs: Arc::new(RunRegister::new()),
            shutdown,
        }
    }

    /// The run register shared by all shard workers.
    pub fn run_register(&self) -> Arc<RunRegister> {
        Arc::clone(&self.runs)
    }

    /// Provision resources, launch shard workers and supervise them until
    /// shutdown or lease loss.
    pub async fn run(&self) -> Result<(), PipelineError> {
        self.provision().await?;

        let description = self
            .transport
            .describe_stream(&self.config.stream_name)
            .await?;
        info!(
            "Starting {} shard workers for stream {}",
            description.shards.len(),
            self.config.stream_name
        );

        let mut workers = Vec::with_capacity(description.shards.len());
        for shard in description.shards {
            workers.push(tokio::spawn(shard_worker(
                Arc::clone(&self.transport),
                Arc::clone(&self.store),
                self.config.clone(),
                shard,
                Arc::clone(&self.runs),
                self.shutdown.clone(),
            )));
        }

        let mut first_failure = None;
        for joined in futures::future::join_all(workers).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!("Shard worker failed: {}", err);
                    first_failure.get_or_insert(err);
                }
                Err(err) => error!("Shard worker panicked: {}", err),
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn provision(&self) -> Result<(), PipelineError> {
        let streams = StreamLifecycleManager::new(
            Arc::clone(&self.transport),
            self.stream_lifecycle_options(),
            self.shutdown.clone(),
        );
        let tables = TableLifecycleManager::new(
            Arc::clone(&self.store),
            self.table_lifecycle_options(),
            self.shutdown.clone(),
        );

        streams
            .create_if_absent(&self.config.stream_name, self.config.shard_count)
            .await?;

        let key_schema = self.config.key_schema();
        let throughput = self.config.throughput_hint();
        if self.config.reset_table_on_start {
            // The table holds one run's aggregation; a fresh start discards
            // whatever the previous run left behind.
            tables
                .recreate(&self.config.table_name, &key_schema, &throughput)
                .await?;
        } else {
            tables
                .create_if_absent(&self.config.table_name, &key_schema, &throughput)
                .await?;
        }
        info!(
            "Stream {} and table {} are active",
            self.config.stream_name, self.config.table_name
        );
        Ok(())
    }

    fn stream_lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            poll_interval: self.config.stream_poll_interval,
            creation_timeout: self.config.creation_timeout,
            deletion_timeout: self.config.deletion_timeout,
        }
    }

    fn table_lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            poll_interval: self.config.table_poll_interval,
            creation_timeout: self.config.creation_timeout,
            deletion_timeout: self.config.deletion_timeout,
        }
    }
}

/// Drive one shard: fetch batches in order, hand them to the processor,
/// and finish with the processor's shutdown path.
async fn shard_worker(
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn TableStore>,
    config: PipelineConfig,
    shard: ShardId,
    runs: Arc<RunRegister>,
    shutdown: ShutdownToken,
) -> Result<(), PipelineError> {
    let aggregator = ShardAggregator::new(store, config.table_name.clone(), config.flush_threshold);
    let mut processor = ShardRecordProcessor::new(shard.clone(), aggregator, runs);
    processor.initialize()?;

    let checkpointer = ShardCheckpointer::new(
        Arc::clone(&transport),
        config.stream_name.clone(),
        shard.clone(),
    );
    let mut iterator = transport
        .resume_iterator(&config.stream_name, &shard)
        .await?;

    let reason: ShutdownReason;
    loop {
        if shutdown.is_cancelled() {
            reason = ShutdownReason::RequestedTermination;
            break;
        }

        let output = tokio::select! {
            _ = shutdown.cancelled() => {
                reason = ShutdownReason::RequestedTermination;
                break;
            }
            fetched = transport.get_records(&config.stream_name, &shard, &iterator) => {
                match fetched {
                    Ok(output) => output,
                    Err(err) if err.is_not_found() => {
                        warn!("Lost lease on shard {}: {}", shard, err);
                        reason = ShutdownReason::LeaseLost;
                        break;
                    }
                    Err(err) => {
                        error!("Error fetching records for shard {}: {}", shard, err);
                        if !idle(&config, &shutdown).await {
                            reason = ShutdownReason::RequestedTermination;
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        if output.records.is_empty() {
            // Nothing available; keep the iterator and back off briefly.
            if !idle(&config, &shutdown).await {
                reason = ShutdownReason::RequestedTermination;
                break;
            }
            iterator = output.next_iterator;
            continue;
        }

        checkpointer.advance_to(output.checkpoint.clone());
        match processor.process_batch(&output.records, &checkpointer).await {
            Ok(outcome) => {
                if outcome == BatchOutcome::Retained {
                    // The flush did not land; the pending position must not
                    // be committed by a later checkpoint.
                    checkpointer.clear_pending();
                }
            }
            Err(err) => {
                error!("Fatal error processing shard {}: {}", shard, err);
                checkpointer.clear_pending();
                processor
                    .shutdown(&checkpointer, ShutdownReason::RequestedTermination)
                    .await;
                return Err(err);
            }
        }
        iterator = output.next_iterator;
    }

    processor.shutdown(&checkpointer, reason).await;
    Ok(())
}

/// Sleep out the idle backoff; `false` if shutdown interrupted it.
async fn idle(config: &PipelineConfig, shutdown: &ShutdownToken) -> bool {
    let backoff = config.idle_backoff.max(Duration::from_millis(1));
    tokio::select! {
        _ = tokio::time::sleep(backoff) => true,
        _ = shutdown.cancelled() => false,
    }
}
