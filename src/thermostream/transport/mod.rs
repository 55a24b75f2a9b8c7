//! External service boundary
//!
//! The pipeline consumes two managed services: a partitioned, at-least-once
//! record stream and an eventually-consistent key-value table. Both are
//! reached through the object-safe async traits in [`traits`], so the
//! aggregation logic never depends on a concrete client.
//!
//! [`in_memory`] provides contract-faithful simulators of both services,
//! including asynchronous activation and deletion, used by tests and the
//! bundled binaries.

pub mod error;
pub mod in_memory;
pub mod traits;
pub mod types;

pub use error::TransportError;
pub use in_memory::{InMemoryStreamTransport, InMemoryTableStore};
pub use traits::{Checkpointer, ShardCheckpointer, StreamTransport, TableStore};
pub use types::{
    AggregationRow, CheckpointMarker, GetRecordsOutput, KeySchema, RawRecord, ShardId,
    ShardIterator, StreamDescription, StreamStatus, TableStatus, ThroughputHint,
};
