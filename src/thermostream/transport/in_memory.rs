//! In-memory implementations of the stream transport and table store
//!
//! These simulators reproduce the client-visible behavior the pipeline is
//! built against, including the awkward parts: creation and deletion are
//! asynchronous (resources report `Creating`/`Deleting` for a configurable
//! number of describe calls before settling), records are delivered
//! per-shard in order, and restarting from a checkpoint redelivers
//! everything after it (at-least-once).
//!
//! Used by the test suite and the bundled binaries; a managed-service
//! client plugs in behind the same traits.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::error::TransportError;
use super::traits::{StreamTransport, TableStore};
use super::types::{
    AggregationRow, CheckpointMarker, GetRecordsOutput, KeySchema, RawRecord, ShardId,
    ShardIterator, StreamDescription, StreamStatus, TableStatus, ThroughputHint,
};

const DEFAULT_BATCH_LIMIT: usize = 100;

struct ShardState {
    id: ShardId,
    records: Vec<RawRecord>,
    /// Number of records covered by the durable checkpoint.
    checkpointed: u64,
}

struct StreamState {
    status: StreamStatus,
    /// Describe calls remaining before a Creating/Deleting stream settles.
    transition_polls: u32,
    shards: Vec<ShardState>,
}

/// In-memory [`StreamTransport`].
pub struct InMemoryStreamTransport {
    streams: Mutex<HashMap<String, StreamState>>,
    activation_polls: u32,
    deletion_polls: u32,
    batch_limit: usize,
    checkpoint_failures: AtomicU32,
}

impl InMemoryStreamTransport {
    /// Transport whose streams become active and disappear immediately.
    pub fn new() -> Self {
        InMemoryStreamTransport {
            streams: Mutex::new(HashMap::new()),
            activation_polls: 0,
            deletion_polls: 0,
            batch_limit: DEFAULT_BATCH_LIMIT,
            checkpoint_failures: AtomicU32::new(0),
        }
    }

    /// Require `polls` describe calls before a new stream reports `Active`.
    pub fn with_activation_polls(mut self, polls: u32) -> Self {
        self.activation_polls = polls;
        self
    }

    /// Require `polls` describe calls before a deleted stream disappears.
    pub fn with_deletion_polls(mut self, polls: u32) -> Self {
        self.deletion_polls = polls;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Fail the next `count` checkpoint calls with a service error.
    pub fn inject_checkpoint_failures(&self, count: u32) {
        self.checkpoint_failures.store(count, Ordering::SeqCst);
    }

    /// Publish a record. Shard routing hashes the partition key unless an
    /// explicit hash is given, mirroring how producers spread one run's
    /// records (which share a partition key) across shards.
    pub fn push_record(
        &self,
        name: &str,
        record: RawRecord,
        explicit_hash: Option<u64>,
    ) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().unwrap();
        let state = streams
            .get_mut(name)
            .ok_or_else(|| TransportError::not_found(format!("stream {}", name)))?;
        if state.shards.is_empty() {
            return Err(TransportError::service("stream has no shards"));
        }
        let hash = explicit_hash.unwrap_or_else(|| {
            let mut hasher = DefaultHasher::new();
            record.partition_key.hash(&mut hasher);
            hasher.finish()
        });
        let index = (hash % state.shards.len() as u64) as usize;
        state.shards[index].records.push(record);
        Ok(())
    }

    /// Durable checkpoint position of a shard, as a record count.
    pub fn checkpointed_records(&self, name: &str, shard: &ShardId) -> Option<u64> {
        let streams = self.streams.lock().unwrap();
        let state = streams.get(name)?;
        state
            .shards
            .iter()
            .find(|s| &s.id == shard)
            .map(|s| s.checkpointed)
    }

    /// Records published to a shard but not yet covered by its checkpoint.
    pub fn pending_records(&self, name: &str, shard: &ShardId) -> Option<u64> {
        let streams = self.streams.lock().unwrap();
        let state = streams.get(name)?;
        state
            .shards
            .iter()
            .find(|s| &s.id == shard)
            .map(|s| (s.records.len() as u64).saturating_sub(s.checkpointed))
    }

    fn new_stream_state(&self, shard_count: usize) -> StreamState {
        let shards = (0..shard_count)
            .map(|i| ShardState {
                id: ShardId::new(format!("shardId-{:012}", i)),
                records: Vec::new(),
                checkpointed: 0,
            })
            .collect();
        let status = if self.activation_polls == 0 {
            StreamStatus::Active
        } else {
            StreamStatus::Creating
        };
        StreamState {
            status,
            transition_polls: self.activation_polls,
            shards,
        }
    }
}

impl Default for InMemoryStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for InMemoryStreamTransport {
    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, TransportError> {
        let mut streams = self.streams.lock().unwrap();
        let remove = match streams.get_mut(name) {
            None => return Err(TransportError::not_found(format!("stream {}", name))),
            Some(state) => match state.status {
                StreamStatus::Creating => {
                    if state.transition_polls == 0 {
                        state.status = StreamStatus::Active;
                    } else {
                        state.transition_polls -= 1;
                    }
                    false
                }
                StreamStatus::Deleting => {
                    if state.transition_polls == 0 {
                        true
                    } else {
                        state.transition_polls -= 1;
                        false
                    }
                }
                _ => false,
            },
        };
        if remove {
            streams.remove(name);
            return Err(TransportError::not_found(format!("stream {}", name)));
        }
        let state = streams
            .get(name)
            .ok_or_else(|| TransportError::not_found(format!("stream {}", name)))?;
        Ok(StreamDescription {
            name: name.to_string(),
            status: state.status,
            shards: state.shards.iter().map(|s| s.id.clone()).collect(),
        })
    }

    async fn create_stream(&self, name: &str, shard_count: usize) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().unwrap();
        if streams.contains_key(name) {
            return Err(TransportError::in_use(format!("stream {}", name)));
        }
        streams.insert(name.to_string(), self.new_stream_state(shard_count));
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().unwrap();
        if !streams.contains_key(name) {
            return Err(TransportError::not_found(format!("stream {}", name)));
        }
        if self.deletion_polls == 0 {
            streams.remove(name);
        } else if let Some(state) = streams.get_mut(name) {
            state.status = StreamStatus::Deleting;
            state.transition_polls = self.deletion_polls;
        }
        Ok(())
    }

    async fn resume_iterator(
        &self,
        name: &str,
        shard: &ShardId,
    ) -> Result<ShardIterator, TransportError> {
        let streams = self.streams.lock().unwrap();
        let state = streams
            .get(name)
            .ok_or_else(|| TransportError::not_found(format!("stream {}", name)))?;
        let shard_state = state
            .shards
            .iter()
            .find(|s| &s.id == shard)
            .ok_or_else(|| TransportError::not_found(format!("shard {}", shard)))?;
        Ok(ShardIterator(shard_state.checkpointed.to_string()))
    }

    async fn get_records(
        &self,
        name: &str,
        shard: &ShardId,
        iterator: &ShardIterator,
    ) -> Result<GetRecordsOutput, TransportError> {
        let streams = self.streams.lock().unwrap();
        let state = streams
            .get(name)
            .ok_or_else(|| TransportError::not_found(format!("stream {}", name)))?;
        let shard_state = state
            .shards
            .iter()
            .find(|s| &s.id == shard)
            .ok_or_else(|| TransportError::not_found(format!("shard {}", shard)))?;
        let position: usize = iterator
            .0
            .parse()
            .map_err(|_| TransportError::service("invalid shard iterator"))?;
        let end = shard_state
            .records
            .len()
            .min(position.saturating_add(self.batch_limit));
        let records = if position < end {
            shard_state.records[position..end].to_vec()
        } else {
            Vec::new()
        };
        let next = position.max(end);
        Ok(GetRecordsOutput {
            records,
            next_iterator: ShardIterator(next.to_string()),
            checkpoint: CheckpointMarker(next.to_string()),
        })
    }

    async fn checkpoint(
        &self,
        name: &str,
        shard: &ShardId,
        marker: &CheckpointMarker,
    ) -> Result<(), TransportError> {
        let remaining = self.checkpoint_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.checkpoint_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::service("checkpoint unavailable"));
        }
        let mut streams = self.streams.lock().unwrap();
        let state = streams
            .get_mut(name)
            .ok_or_else(|| TransportError::not_found(format!("stream {}", name)))?;
        let shard_state = state
            .shards
            .iter_mut()
            .find(|s| &s.id == shard)
            .ok_or_else(|| TransportError::not_found(format!("shard {}", shard)))?;
        let position: u64 = marker
            .0
            .parse()
            .map_err(|_| TransportError::service("invalid checkpoint marker"))?;
        // Monotonic: an older marker never regresses the stored position.
        shard_state.checkpointed = shard_state.checkpointed.max(position);
        Ok(())
    }
}

struct TableState {
    status: TableStatus,
    transition_polls: u32,
    rows: HashMap<(String, String), AggregationRow>,
}

/// In-memory [`TableStore`].
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<String, TableState>>,
    activation_polls: u32,
    deletion_polls: u32,
    put_failures: AtomicU32,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        InMemoryTableStore {
            tables: Mutex::new(HashMap::new()),
            activation_polls: 0,
            deletion_polls: 0,
            put_failures: AtomicU32::new(0),
        }
    }

    pub fn with_activation_polls(mut self, polls: u32) -> Self {
        self.activation_polls = polls;
        self
    }

    pub fn with_deletion_polls(mut self, polls: u32) -> Self {
        self.deletion_polls = polls;
        self
    }

    /// Fail the next `count` put calls with a service error.
    pub fn inject_put_failures(&self, count: u32) {
        self.put_failures.store(count, Ordering::SeqCst);
    }

    pub fn row_count(&self, name: &str) -> usize {
        let tables = self.tables.lock().unwrap();
        tables.get(name).map(|t| t.rows.len()).unwrap_or(0)
    }
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn describe_table(&self, name: &str) -> Result<TableStatus, TransportError> {
        let mut tables = self.tables.lock().unwrap();
        let remove = match tables.get_mut(name) {
            None => return Err(TransportError::not_found(format!("table {}", name))),
            Some(state) => match state.status {
                TableStatus::Creating => {
                    if state.transition_polls == 0 {
                        state.status = TableStatus::Active;
                    } else {
                        state.transition_polls -= 1;
                    }
                    false
                }
                TableStatus::Deleting => {
                    if state.transition_polls == 0 {
                        true
                    } else {
                        state.transition_polls -= 1;
                        false
                    }
                }
                TableStatus::Active => false,
            },
        };
        if remove {
            tables.remove(name);
            return Err(TransportError::not_found(format!("table {}", name)));
        }
        let state = tables
            .get(name)
            .ok_or_else(|| TransportError::not_found(format!("table {}", name)))?;
        Ok(state.status)
    }

    async fn create_table(
        &self,
        name: &str,
        _key_schema: &KeySchema,
        _throughput: &ThroughputHint,
    ) -> Result<(), TransportError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(name) {
            return Err(TransportError::in_use(format!("table {}", name)));
        }
        let status = if self.activation_polls == 0 {
            TableStatus::Active
        } else {
            TableStatus::Creating
        };
        tables.insert(
            name.to_string(),
            TableState {
                status,
                transition_polls: self.activation_polls,
                rows: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_table(&self, name: &str) -> Result<(), TransportError> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.contains_key(name) {
            return Err(TransportError::not_found(format!("table {}", name)));
        }
        if self.deletion_polls == 0 {
            tables.remove(name);
        } else if let Some(state) = tables.get_mut(name) {
            state.status = TableStatus::Deleting;
            state.transition_polls = self.deletion_polls;
        }
        Ok(())
    }

    async fn get_item(
        &self,
        name: &str,
        sensor: &str,
        run_id: &str,
    ) -> Result<Option<AggregationRow>, TransportError> {
        let tables = self.tables.lock().unwrap();
        let state = tables
            .get(name)
            .ok_or_else(|| TransportError::not_found(format!("table {}", name)))?;
        Ok(state
            .rows
            .get(&(sensor.to_string(), run_id.to_string()))
            .cloned())
    }

    async fn put_item(&self, name: &str, row: AggregationRow) -> Result<(), TransportError> {
        let remaining = self.put_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.put_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::service("write throttled"));
        }
        let mut tables = self.tables.lock().unwrap();
        let state = tables
            .get_mut(name)
            .ok_or_else(|| TransportError::not_found(format!("table {}", name)))?;
        state
            .rows
            .insert((row.sensor.clone(), row.run_id.clone()), row);
        Ok(())
    }

    async fn scan(&self, name: &str) -> Result<Vec<AggregationRow>, TransportError> {
        let tables = self.tables.lock().unwrap();
        let state = tables
            .get(name)
            .ok_or_else(|| TransportError::not_found(format!("table {}", name)))?;
        Ok(state.rows.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_activates_after_configured_polls() {
        let transport = InMemoryStreamTransport::new().with_activation_polls(2);
        transport.create_stream("t", 1).await.unwrap();

        let first = transport.describe_stream("t").await.unwrap();
        assert_eq!(first.status, StreamStatus::Creating);
        let second = transport.describe_stream("t").await.unwrap();
        assert_eq!(second.status, StreamStatus::Creating);
        let third = transport.describe_stream("t").await.unwrap();
        assert_eq!(third.status, StreamStatus::Active);
    }

    #[tokio::test]
    async fn test_records_redelivered_after_checkpoint_resume() {
        let transport = InMemoryStreamTransport::new();
        transport.create_stream("t", 1).await.unwrap();
        let shard = transport.describe_stream("t").await.unwrap().shards[0].clone();

        for i in 0..4 {
            transport
                .push_record("t", RawRecord::new("1000", format!("r{}", i).into_bytes()), None)
                .unwrap();
        }

        let iterator = transport.resume_iterator("t", &shard).await.unwrap();
        let output = transport.get_records("t", &shard, &iterator).await.unwrap();
        assert_eq!(output.records.len(), 4);

        // Checkpoint after two records only, then resume: the other two
        // must be delivered again.
        transport
            .checkpoint("t", &shard, &CheckpointMarker::new("2"))
            .await
            .unwrap();
        let resumed = transport.resume_iterator("t", &shard).await.unwrap();
        let redelivered = transport.get_records("t", &shard, &resumed).await.unwrap();
        assert_eq!(redelivered.records.len(), 2);
        assert_eq!(redelivered.records[0].payload, b"r2");
    }

    #[tokio::test]
    async fn test_checkpoint_never_regresses() {
        let transport = InMemoryStreamTransport::new();
        transport.create_stream("t", 1).await.unwrap();
        let shard = transport.describe_stream("t").await.unwrap().shards[0].clone();

        transport
            .checkpoint("t", &shard, &CheckpointMarker::new("5"))
            .await
            .unwrap();
        transport
            .checkpoint("t", &shard, &CheckpointMarker::new("3"))
            .await
            .unwrap();
        assert_eq!(transport.checkpointed_records("t", &shard), Some(5));
    }

    #[tokio::test]
    async fn test_deleted_table_disappears_after_polls() {
        let store = InMemoryTableStore::new().with_deletion_polls(1);
        let schema = KeySchema {
            hash_key: "sensor".into(),
            range_key: "time_stamp".into(),
        };
        let throughput = ThroughputHint {
            read_units: 10,
            write_units: 5,
        };
        store.create_table("temps", &schema, &throughput).await.unwrap();
        store.delete_table("temps").await.unwrap();

        assert_eq!(store.describe_table("temps").await.unwrap(), TableStatus::Deleting);
        assert!(store.describe_table("temps").await.unwrap_err().is_not_found());
    }
}
