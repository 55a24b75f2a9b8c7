//! Per-shard record processor
//!
//! One processor exists per shard for the lifetime of that shard's lease
//! and moves through `Initialized -> Processing -> ShuttingDown ->
//! Terminated`. Each batch is decoded, discriminated by run, merged into
//! the shard's aggregation buffer and flushed; the shard's checkpoint is
//! requested only after the flush completed, so a committed position never
//! covers readings that are not in the table.
//!
//! A record that fails to decode is skipped and counted rather than
//! aborting the shard: one corrupt payload must not forfeit the shard's
//! unflushed progress.

use chrono::DateTime;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;

use crate::thermostream::aggregator::ShardAggregator;
use crate::thermostream::codec::{self, Reading};
use crate::thermostream::error::PipelineError;
use crate::thermostream::run::RunRegister;
use crate::thermostream::transport::{Checkpointer, RawRecord, ShardId};

/// Why a shard processor is being shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Another worker took over the shard while this one was stalled
    ZombieShardLoss,
    /// The shard lease expired or the shard disappeared
    LeaseLost,
    /// The process was asked to stop
    RequestedTermination,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::ZombieShardLoss => write!(f, "zombie shard loss"),
            ShutdownReason::LeaseLost => write!(f, "lease lost"),
            ShutdownReason::RequestedTermination => write!(f, "requested termination"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Initialized,
    Processing,
    ShuttingDown,
    Terminated,
}

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Readings merged into the table; a checkpoint was requested
    Flushed,
    /// Flush failed transiently; readings stay buffered and the caller
    /// must not commit this batch's position
    Retained,
    /// The batch belonged to a superseded run and was dropped
    Discarded,
}

pub struct ShardRecordProcessor {
    shard: ShardId,
    state: ProcessorState,
    aggregator: ShardAggregator,
    runs: Arc<RunRegister>,
    /// Run the buffered readings belong to; 0 until the first batch.
    current_run: u64,
    processed_records: u64,
    malformed_records: u64,
}

impl ShardRecordProcessor {
    pub fn new(shard: ShardId, aggregator: ShardAggregator, runs: Arc<RunRegister>) -> Self {
        ShardRecordProcessor {
            shard,
            state: ProcessorState::Initialized,
            aggregator,
            runs,
            current_run: 0,
            processed_records: 0,
            malformed_records: 0,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn processed_records(&self) -> u64 {
        self.processed_records
    }

    pub fn malformed_records(&self) -> u64 {
        self.malformed_records
    }

    /// Transition to `Processing`. The shard's stream and table handles
    /// were acquired at construction.
    pub fn initialize(&mut self) -> Result<(), PipelineError> {
        if self.state != ProcessorState::Initialized {
            return Err(PipelineError::State {
                operation: "initialize",
                state: self.state,
            });
        }
        info!("Initializing processor for shard {}", self.shard);
        self.state = ProcessorState::Processing;
        Ok(())
    }

    /// Process one delivered batch: decode, discriminate by run, merge,
    /// flush, checkpoint.
    ///
    /// Checkpoint failures are logged and absorbed; the position stays
    /// pending and a later successful checkpoint covers the gap. A missing
    /// aggregation table is fatal and propagated.
    pub async fn process_batch(
        &mut self,
        records: &[RawRecord],
        checkpointer: &dyn Checkpointer,
    ) -> Result<BatchOutcome, PipelineError> {
        if self.state != ProcessorState::Processing {
            return Err(PipelineError::State {
                operation: "process_batch",
                state: self.state,
            });
        }

        let mut readings = Vec::with_capacity(records.len());
        for record in records {
            match codec::decode(record) {
                Ok(reading) => readings.push(reading),
                Err(err) => {
                    self.malformed_records += 1;
                    warn!("Skipping malformed record on shard {}: {}", self.shard, err);
                }
            }
        }
        if readings.is_empty() {
            return Ok(BatchOutcome::Flushed);
        }

        // The whole batch carries one run: the largest run id among its
        // records, exactly as the producer stamps partition keys.
        let batch_run = readings.iter().map(|r| r.run_id).max().unwrap_or(0);
        let observation = self.runs.observe(batch_run);
        if !observation.is_current {
            info!(
                "Discarding batch of {} readings from run {} on shard {}; run {} has started",
                readings.len(),
                batch_run,
                self.shard,
                observation.current_max
            );
            self.aggregator.reset();
            return Ok(BatchOutcome::Discarded);
        }
        if batch_run > self.current_run && self.current_run != 0 && !self.aggregator.is_empty() {
            info!(
                "Run {} supersedes run {} on shard {}; discarding buffered readings",
                batch_run, self.current_run, self.shard
            );
            self.aggregator.reset();
        }
        self.current_run = batch_run;

        for (index, reading) in readings.iter().enumerate() {
            self.log_reading(index, reading);
            self.aggregator.merge(reading);
            self.processed_records += 1;
            match self.aggregator.flush_if_threshold(batch_run).await {
                Ok(()) => {}
                Err(err @ PipelineError::TableMissing { .. }) => return Err(err),
                Err(err) => {
                    error!("Early flush failed on shard {}: {}", self.shard, err);
                }
            }
        }

        match self.aggregator.flush(batch_run).await {
            Ok(()) => {
                if let Err(err) = checkpointer.checkpoint().await {
                    error!(
                        "Error while trying to checkpoint shard {} (will retry on a later batch): {}",
                        self.shard, err
                    );
                }
                Ok(BatchOutcome::Flushed)
            }
            Err(err @ PipelineError::TableMissing { .. }) => Err(err),
            Err(err) => {
                error!(
                    "Flush failed on shard {}; {} readings stay buffered: {}",
                    self.shard,
                    self.aggregator.buffered(),
                    err
                );
                Ok(BatchOutcome::Retained)
            }
        }
    }

    /// Finish this shard: attempt one final checkpoint regardless of the
    /// reason, then terminate. A failure here is logged only; the shard is
    /// ending either way and an uncommitted position is simply redelivered
    /// to the next lease holder.
    pub async fn shutdown(&mut self, checkpointer: &dyn Checkpointer, reason: ShutdownReason) {
        match self.state {
            ProcessorState::ShuttingDown | ProcessorState::Terminated => return,
            ProcessorState::Initialized => {
                info!(
                    "Shutting down shard {} before processing started, reason: {}",
                    self.shard, reason
                );
                self.state = ProcessorState::Terminated;
                return;
            }
            ProcessorState::Processing => {}
        }

        self.state = ProcessorState::ShuttingDown;
        info!("Shutting down shard {}, reason: {}", self.shard, reason);
        if let Err(err) = checkpointer.checkpoint().await {
            error!(
                "Error while trying to checkpoint shard {} during shutdown: {}",
                self.shard, err
            );
        }
        self.state = ProcessorState::Terminated;
    }

    fn log_reading(&self, index: usize, reading: &Reading) {
        if let Some(when) = DateTime::from_timestamp_millis(reading.run_id as i64) {
            debug!(
                "Temperature #{} of {} in the run of {} is {}",
                index,
                reading.sensor_id,
                when.format("%d.%m.%Y %H:%M:%S%.3f"),
                reading.temperature
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::thermostream::transport::{
        AggregationRow, KeySchema, TableStatus, TableStore, ThroughputHint, TransportError,
    };

    /// Table store that records flush activity into a shared event log and
    /// can fail puts on demand.
    struct RecordingTable {
        events: Arc<Mutex<Vec<String>>>,
        fail_puts: Mutex<u32>,
    }

    #[async_trait]
    impl TableStore for RecordingTable {
        async fn describe_table(&self, _name: &str) -> Result<TableStatus, TransportError> {
            Ok(TableStatus::Active)
        }

        async fn create_table(
            &self,
            _name: &str,
            _key_schema: &KeySchema,
            _throughput: &ThroughputHint,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn delete_table(&self, _name: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn get_item(
            &self,
            _name: &str,
            _sensor: &str,
            _run_id: &str,
        ) -> Result<Option<AggregationRow>, TransportError> {
            Ok(None)
        }

        async fn put_item(&self, _name: &str, row: AggregationRow) -> Result<(), TransportError> {
            let mut remaining = self.fail_puts.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::service("write throttled"));
            }
            self.events
                .lock()
                .unwrap()
                .push(format!("put:{}", row.sensor));
            Ok(())
        }

        async fn scan(&self, _name: &str) -> Result<Vec<AggregationRow>, TransportError> {
            Ok(Vec::new())
        }
    }

    struct RecordingCheckpointer {
        events: Arc<Mutex<Vec<String>>>,
        fail: Mutex<u32>,
    }

    #[async_trait]
    impl Checkpointer for RecordingCheckpointer {
        async fn checkpoint(&self) -> Result<(), TransportError> {
            let mut remaining = self.fail.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::service("checkpoint unavailable"));
            }
            self.events.lock().unwrap().push("checkpoint".to_string());
            Ok(())
        }
    }

    fn harness(
        fail_puts: u32,
        fail_checkpoints: u32,
    ) -> (
        ShardRecordProcessor,
        RecordingCheckpointer,
        Arc<Mutex<Vec<String>>>,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let table = Arc::new(RecordingTable {
            events: Arc::clone(&events),
            fail_puts: Mutex::new(fail_puts),
        });
        let aggregator = ShardAggregator::new(table, "temps", 0);
        let processor = ShardRecordProcessor::new(
            ShardId::new("shardId-000000000000"),
            aggregator,
            Arc::new(RunRegister::new()),
        );
        let checkpointer = RecordingCheckpointer {
            events: Arc::clone(&events),
            fail: Mutex::new(fail_checkpoints),
        };
        (processor, checkpointer, events)
    }

    fn wire_batch() -> Vec<RawRecord> {
        vec![
            RawRecord::new("1000000", b"1;21.5;tempSensor1;1000000".to_vec()),
            RawRecord::new("1000000", b"2;21.6;tempSensor1;1000001".to_vec()),
            RawRecord::new("1000000", b"3;19.0;tempSensor2;1000002".to_vec()),
        ]
    }

    #[tokio::test]
    async fn test_checkpoint_comes_after_every_flush() {
        let (mut processor, checkpointer, events) = harness(0, 0);
        processor.initialize().unwrap();

        let outcome = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Flushed);

        let events = events.lock().unwrap();
        let checkpoint_at = events.iter().position(|e| e == "checkpoint").unwrap();
        assert_eq!(checkpoint_at, events.len() - 1);
        assert_eq!(events.iter().filter(|e| e.starts_with("put:")).count(), 2);
    }

    #[tokio::test]
    async fn test_no_checkpoint_when_flush_fails() {
        let (mut processor, checkpointer, events) = harness(1, 0);
        processor.initialize().unwrap();

        let outcome = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Retained);
        assert!(!events.lock().unwrap().iter().any(|e| e == "checkpoint"));

        // The retry flushes the retained readings and checkpoints.
        let outcome = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Flushed);
        assert!(events.lock().unwrap().iter().any(|e| e == "checkpoint"));
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_stop_processing() {
        let (mut processor, checkpointer, _events) = harness(0, 1);
        processor.initialize().unwrap();

        let outcome = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Flushed);
        assert_eq!(processor.state(), ProcessorState::Processing);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped_and_counted() {
        let (mut processor, checkpointer, events) = harness(0, 0);
        processor.initialize().unwrap();

        let batch = vec![
            RawRecord::new("1000000", b"not a reading".to_vec()),
            RawRecord::new("1000000", b"1;21.5;tempSensor1;1000000".to_vec()),
            RawRecord::new("1000000", b"2;bogus;tempSensor1;1000001".to_vec()),
        ];
        processor.process_batch(&batch, &checkpointer).await.unwrap();

        assert_eq!(processor.malformed_records(), 2);
        assert_eq!(processor.processed_records(), 1);
        assert!(events.lock().unwrap().iter().any(|e| e == "checkpoint"));
    }

    #[tokio::test]
    async fn test_stale_run_batch_is_discarded() {
        let (mut processor, checkpointer, events) = harness(0, 0);
        processor.initialize().unwrap();

        // Another shard has already seen a newer run.
        processor.runs.observe(2_000_000);

        let outcome = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Discarded);
        assert!(!events.lock().unwrap().iter().any(|e| e.starts_with("put:")));
    }

    #[tokio::test]
    async fn test_newer_run_resets_buffered_readings() {
        let (mut processor, checkpointer, _events) = harness(1, 0);
        processor.initialize().unwrap();

        // First batch's flush fails, leaving run-1000000 readings buffered.
        let outcome = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Retained);

        // A batch from a newer run discards them before merging its own.
        let newer = vec![RawRecord::new(
            "2000000",
            b"1;30.0;tempSensor1;2000000".to_vec(),
        )];
        let outcome = processor.process_batch(&newer, &checkpointer).await.unwrap();
        assert_eq!(outcome, BatchOutcome::Flushed);
        assert_eq!(processor.current_run, 2_000_000);
    }

    #[tokio::test]
    async fn test_shutdown_attempts_final_checkpoint_for_every_reason() {
        for reason in [
            ShutdownReason::ZombieShardLoss,
            ShutdownReason::LeaseLost,
            ShutdownReason::RequestedTermination,
        ] {
            let (mut processor, checkpointer, events) = harness(0, 0);
            processor.initialize().unwrap();
            processor.shutdown(&checkpointer, reason).await;

            assert_eq!(processor.state(), ProcessorState::Terminated);
            assert_eq!(
                events.lock().unwrap().iter().filter(|e| *e == "checkpoint").count(),
                1
            );
        }
    }

    #[tokio::test]
    async fn test_processing_after_shutdown_is_rejected() {
        let (mut processor, checkpointer, _events) = harness(0, 0);
        processor.initialize().unwrap();
        processor
            .shutdown(&checkpointer, ShutdownReason::RequestedTermination)
            .await;

        let err = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::State { .. }));
    }

    #[tokio::test]
    async fn test_process_batch_requires_initialize() {
        let (mut processor, checkpointer, _events) = harness(0, 0);
        let err = processor
            .process_batch(&wire_batch(), &checkpointer)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::State { .. }));
    }
}
