//! Per-shard aggregation buffer and flush
//!
//! Readings are accumulated in memory as `sensor -> (timestamp ->
//! temperature)` and pushed to the table in one flush per sensor. The
//! table's put replaces whole rows, so every flush is a read-merge-write:
//! fetch the existing row for `(sensor, run)`, union its timestamp map
//! with the buffered one, and write the merged row back. The buffer is
//! cleared only after every sensor flushed successfully, so a failed
//! flush leaves the readings in place for the next attempt.

use log::{debug, error};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::thermostream::codec::Reading;
use crate::thermostream::error::PipelineError;
use crate::thermostream::transport::{AggregationRow, TableStore, TransportError};

pub struct ShardAggregator {
    store: Arc<dyn TableStore>,
    table_name: String,
    /// Buffered readings that trigger an early flush; 0 disables them.
    flush_threshold: usize,
    buffer: HashMap<String, BTreeMap<u64, f64>>,
    buffered: usize,
}

impl ShardAggregator {
    pub fn new(store: Arc<dyn TableStore>, table_name: impl Into<String>, flush_threshold: usize) -> Self {
        ShardAggregator {
            store,
            table_name: table_name.into(),
            flush_threshold,
            buffer: HashMap::new(),
            buffered: 0,
        }
    }

    /// Buffer one reading. A reading that collides with an already
    /// buffered `(sensor, timestamp)` key overwrites it: processing order
    /// within the batch is the only ordering there is.
    pub fn merge(&mut self, reading: &Reading) {
        self.buffer
            .entry(reading.sensor_id.clone())
            .or_default()
            .insert(reading.origin_timestamp_millis, reading.temperature);
        self.buffered += 1;
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered readings, as when a newer run supersedes the
    /// one they belong to.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.buffered = 0;
    }

    /// Flush early if the buffered-reading count has reached the
    /// threshold. The unconditional end-of-batch [`flush`](Self::flush)
    /// still runs afterwards.
    pub async fn flush_if_threshold(&mut self, run_id: u64) -> Result<(), PipelineError> {
        if self.flush_threshold > 0 && self.buffered >= self.flush_threshold {
            debug!(
                "Early flush after {} buffered readings (threshold {})",
                self.buffered, self.flush_threshold
            );
            self.flush(run_id).await?;
        }
        Ok(())
    }

    /// Merge every buffered sensor into its table row for `run_id` and
    /// clear the buffer. An empty buffer is a no-op. A missing table is
    /// [`PipelineError::TableMissing`]: it must be provisioned before the
    /// first flush, so this is an ordering violation rather than data
    /// loss.
    pub async fn flush(&mut self, run_id: u64) -> Result<(), PipelineError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let run_key = run_id.to_string();
        for (sensor, temperatures) in &self.buffer {
            let existing = self
                .store
                .get_item(&self.table_name, sensor, &run_key)
                .await
                .map_err(|err| self.classify(err))?;

            let mut merged = match existing {
                Some(row) => row.temperatures,
                None => BTreeMap::new(),
            };
            merged.extend(temperatures.iter().map(|(ts, temp)| (*ts, *temp)));
            let count = merged.len();

            self.store
                .put_item(
                    &self.table_name,
                    AggregationRow {
                        sensor: sensor.clone(),
                        run_id: run_key.clone(),
                        temperatures: merged,
                    },
                )
                .await
                .map_err(|err| self.classify(err))?;
            debug!(
                "Persisted {} temperatures for sensor {} (run {})",
                count, sensor, run_key
            );
        }

        self.buffer.clear();
        self.buffered = 0;
        Ok(())
    }

    fn classify(&self, err: TransportError) -> PipelineError {
        if err.is_not_found() {
            error!(
                "Aggregation table {} is missing; readings stay buffered",
                self.table_name
            );
            PipelineError::TableMissing {
                table: self.table_name.clone(),
            }
        } else {
            PipelineError::Transport(err)
        }
    }
}
