//! Async trait seams for the consumed managed services
//!
//! Implementations adapt a concrete client (or the in-memory simulators) to
//! the contract the pipeline assumes: a durable, partitioned, at-least-once
//! record log and an eventually-consistent keyed table. Creation and
//! deletion are asynchronous on the far side; callers observe progress only
//! through `describe`.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::error::TransportError;
use super::types::{
    AggregationRow, CheckpointMarker, GetRecordsOutput, KeySchema, ShardId, ShardIterator,
    StreamDescription, TableStatus, ThroughputHint,
};

/// The partitioned record stream consumed by the pipeline.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Describe the stream. Absence is reported as
    /// [`TransportError::ResourceNotFound`], never as a status.
    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, TransportError>;

    /// Request creation of a stream with the given shard count. Returns
    /// [`TransportError::ResourceInUse`] if a stream with this name already
    /// exists; activation is asynchronous either way.
    async fn create_stream(&self, name: &str, shard_count: usize) -> Result<(), TransportError>;

    /// Request deletion of a stream. Deletion is asynchronous; the stream
    /// keeps reporting `Deleting` until it disappears.
    async fn delete_stream(&self, name: &str) -> Result<(), TransportError>;

    /// Obtain an iterator for a shard, resuming from its last durable
    /// checkpoint, or from the oldest retained record if none exists.
    async fn resume_iterator(
        &self,
        name: &str,
        shard: &ShardId,
    ) -> Result<ShardIterator, TransportError>;

    /// Fetch the next batch of records for a shard. An empty batch means no
    /// records are currently available; the iterator stays valid.
    async fn get_records(
        &self,
        name: &str,
        shard: &ShardId,
        iterator: &ShardIterator,
    ) -> Result<GetRecordsOutput, TransportError>;

    /// Durably advance a shard's checkpoint to the given marker.
    /// Checkpoints are monotonic: re-committing an older or equal position
    /// is a harmless no-op.
    async fn checkpoint(
        &self,
        name: &str,
        shard: &ShardId,
        marker: &CheckpointMarker,
    ) -> Result<(), TransportError>;
}

/// The keyed aggregation table consumed by the pipeline.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Describe the table. Absence is reported as
    /// [`TransportError::ResourceNotFound`].
    async fn describe_table(&self, name: &str) -> Result<TableStatus, TransportError>;

    /// Request creation of a table with a composite hash/range key and a
    /// provisioned-capacity hint. Activation is asynchronous.
    async fn create_table(
        &self,
        name: &str,
        key_schema: &KeySchema,
        throughput: &ThroughputHint,
    ) -> Result<(), TransportError>;

    /// Request deletion of a table. Asynchronous, as with streams.
    async fn delete_table(&self, name: &str) -> Result<(), TransportError>;

    /// Read one row by its composite key. `Ok(None)` means the row does not
    /// exist; a missing *table* is a not-found error.
    async fn get_item(
        &self,
        name: &str,
        sensor: &str,
        run_id: &str,
    ) -> Result<Option<AggregationRow>, TransportError>;

    /// Write one row, replacing any previous row under the same key.
    async fn put_item(&self, name: &str, row: AggregationRow) -> Result<(), TransportError>;

    /// Read every row in the table.
    async fn scan(&self, name: &str) -> Result<Vec<AggregationRow>, TransportError>;
}

/// Handle through which a shard processor commits its progress. The
/// position it advances to is owned by the caller driving the shard; the
/// processor only requests the commit.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn checkpoint(&self) -> Result<(), TransportError>;
}

/// [`Checkpointer`] over a [`StreamTransport`], tracking the pending marker
/// for one shard.
///
/// The shard worker advances the pending position as batches are delivered
/// and clears it when a batch's flush is deferred, so a commit never covers
/// readings that have not been merged into the table.
pub struct ShardCheckpointer {
    transport: Arc<dyn StreamTransport>,
    stream: String,
    shard: ShardId,
    pending: Mutex<Option<CheckpointMarker>>,
}

impl ShardCheckpointer {
    pub fn new(transport: Arc<dyn StreamTransport>, stream: impl Into<String>, shard: ShardId) -> Self {
        ShardCheckpointer {
            transport,
            stream: stream.into(),
            shard,
            pending: Mutex::new(None),
        }
    }

    /// Record the marker covering the latest delivered batch.
    pub fn advance_to(&self, marker: CheckpointMarker) {
        let mut pending = self.pending.lock().unwrap();
        *pending = Some(marker);
    }

    /// Forget the pending marker. Used when a batch's flush did not
    /// complete, so a later commit cannot cover unmerged readings.
    pub fn clear_pending(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = None;
    }
}

#[async_trait]
impl Checkpointer for ShardCheckpointer {
    async fn checkpoint(&self) -> Result<(), TransportError> {
        let marker = self.pending.lock().unwrap().clone();
        match marker {
            Some(marker) => {
                self.transport
                    .checkpoint(&self.stream, &self.shard, &marker)
                    .await
            }
            // Nothing delivered (or the last flush was deferred): nothing
            // to commit.
            None => Ok(()),
        }
    }
}
