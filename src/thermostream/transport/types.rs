//! Shared types for the stream transport and table store boundary

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one independently-consumable stream partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reading position within a shard. Issued and advanced by the transport;
/// the pipeline treats the token as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIterator(pub(crate) String);

impl ShardIterator {
    pub fn new(token: impl Into<String>) -> Self {
        ShardIterator(token.into())
    }
}

/// Durable progress marker for a shard: everything up to and including this
/// position has been merged into the table. Constructed only by the
/// transport; the pipeline requests advancement and never inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMarker(pub(crate) String);

impl CheckpointMarker {
    pub fn new(token: impl Into<String>) -> Self {
        CheckpointMarker(token.into())
    }
}

/// Stream lifecycle status as reported by `describe`. Absence of the stream
/// is a distinguished not-found error, not a status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Active,
    Deleting,
    Updating,
}

/// Table lifecycle status as reported by `describe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Active,
    Deleting,
}

/// Result of describing a stream.
#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub name: String,
    pub status: StreamStatus,
    pub shards: Vec<ShardId>,
}

/// One raw record as delivered by the stream transport: an undecoded
/// payload plus the partition key it was published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub partition_key: String,
    pub payload: Vec<u8>,
}

impl RawRecord {
    pub fn new(partition_key: impl Into<String>, payload: Vec<u8>) -> Self {
        RawRecord {
            partition_key: partition_key.into(),
            payload,
        }
    }
}

/// One batch of records from a shard, the iterator for the next fetch, and
/// the marker covering everything delivered so far.
#[derive(Debug, Clone)]
pub struct GetRecordsOutput {
    pub records: Vec<RawRecord>,
    pub next_iterator: ShardIterator,
    pub checkpoint: CheckpointMarker,
}

/// Composite key layout for the aggregation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub hash_key: String,
    pub range_key: String,
}

/// Provisioned-capacity hint passed through to table creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputHint {
    pub read_units: u64,
    pub write_units: u64,
}

/// Persisted aggregation entity, keyed by `(sensor, run_id)`. The value is
/// the map of reading timestamps to temperatures accumulated for that
/// sensor during the run. Writes must union this map, never replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRow {
    pub sensor: String,
    /// Run identifier (the run's origin timestamp) as a decimal string,
    /// stored as the row's range key.
    pub run_id: String,
    /// Reading timestamp in epoch milliseconds mapped to the temperature
    /// observed at that instant.
    pub temperatures: BTreeMap<u64, f64>,
}
