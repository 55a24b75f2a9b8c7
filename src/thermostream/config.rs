//! Pipeline configuration
//!
//! Defaults reflect the cadences of the managed services the pipeline runs
//! against: stream status settles over tens of seconds, table status over
//! seconds, and provisioning is abandoned after five minutes. Every value
//! can be overridden through a `THERMOSTREAM_*` environment variable; the
//! binaries layer command-line arguments on top.

use std::env;
use std::time::Duration;

use crate::thermostream::transport::{KeySchema, ThroughputHint};

/// Built-in defaults and the table's fixed key layout.
pub struct PipelineDefaults;

impl PipelineDefaults {
    pub const STREAM_NAME: &'static str = "temperature-stream";
    pub const TABLE_NAME: &'static str = "temperatures";
    pub const SHARD_COUNT: usize = 2;
    /// Buffered readings that trigger an early flush; 0 disables them.
    pub const FLUSH_THRESHOLD: usize = 100;
    /// Total wire length of one encoded reading, padding included.
    pub const RECORD_LENGTH: usize = 128;
    pub const STREAM_POLL_INTERVAL_SECS: u64 = 30;
    pub const TABLE_POLL_INTERVAL_SECS: u64 = 10;
    pub const CREATION_TIMEOUT_SECS: u64 = 300;
    pub const DELETION_TIMEOUT_SECS: u64 = 120;
    pub const IDLE_BACKOFF_MILLIS: u64 = 500;

    /// Partition key attribute of the aggregation table.
    pub const HASH_KEY: &'static str = "sensor";
    /// Sort key attribute, holding the run id as a decimal string.
    pub const RANGE_KEY: &'static str = "time_stamp";
    // Enough write capacity for a handful of sensors updated every second;
    // revisit if the cardinality of the input changes.
    pub const READ_CAPACITY_UNITS: u64 = 10;
    pub const WRITE_CAPACITY_UNITS: u64 = 5;
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stream_name: String,
    pub table_name: String,
    pub shard_count: usize,
    pub flush_threshold: usize,
    pub record_length: usize,
    pub stream_poll_interval: Duration,
    pub table_poll_interval: Duration,
    pub creation_timeout: Duration,
    pub deletion_timeout: Duration,
    pub idle_backoff: Duration,
    /// Drop the previous run's aggregation table before provisioning.
    pub reset_table_on_start: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stream_name: PipelineDefaults::STREAM_NAME.to_string(),
            table_name: PipelineDefaults::TABLE_NAME.to_string(),
            shard_count: PipelineDefaults::SHARD_COUNT,
            flush_threshold: PipelineDefaults::FLUSH_THRESHOLD,
            record_length: PipelineDefaults::RECORD_LENGTH,
            stream_poll_interval: Duration::from_secs(PipelineDefaults::STREAM_POLL_INTERVAL_SECS),
            table_poll_interval: Duration::from_secs(PipelineDefaults::TABLE_POLL_INTERVAL_SECS),
            creation_timeout: Duration::from_secs(PipelineDefaults::CREATION_TIMEOUT_SECS),
            deletion_timeout: Duration::from_secs(PipelineDefaults::DELETION_TIMEOUT_SECS),
            idle_backoff: Duration::from_millis(PipelineDefaults::IDLE_BACKOFF_MILLIS),
            reset_table_on_start: true,
        }
    }
}

impl PipelineConfig {
    /// Defaults with `THERMOSTREAM_*` environment overrides applied.
    pub fn from_env() -> Self {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            stream_name: env_string("THERMOSTREAM_STREAM_NAME", defaults.stream_name),
            table_name: env_string("THERMOSTREAM_TABLE_NAME", defaults.table_name),
            shard_count: env_usize("THERMOSTREAM_SHARD_COUNT", defaults.shard_count),
            flush_threshold: env_usize("THERMOSTREAM_FLUSH_THRESHOLD", defaults.flush_threshold),
            record_length: env_usize("THERMOSTREAM_RECORD_LENGTH", defaults.record_length),
            stream_poll_interval: env_secs(
                "THERMOSTREAM_STREAM_POLL_INTERVAL_SECS",
                defaults.stream_poll_interval,
            ),
            table_poll_interval: env_secs(
                "THERMOSTREAM_TABLE_POLL_INTERVAL_SECS",
                defaults.table_poll_interval,
            ),
            creation_timeout: env_secs("THERMOSTREAM_CREATION_TIMEOUT_SECS", defaults.creation_timeout),
            deletion_timeout: env_secs("THERMOSTREAM_DELETION_TIMEOUT_SECS", defaults.deletion_timeout),
            idle_backoff: env_millis("THERMOSTREAM_IDLE_BACKOFF_MILLIS", defaults.idle_backoff),
            reset_table_on_start: env_bool(
                "THERMOSTREAM_RESET_TABLE_ON_START",
                defaults.reset_table_on_start,
            ),
        }
    }

    pub fn key_schema(&self) -> KeySchema {
        KeySchema {
            hash_key: PipelineDefaults::HASH_KEY.to_string(),
            range_key: PipelineDefaults::RANGE_KEY.to_string(),
        }
    }

    pub fn throughput_hint(&self) -> ThroughputHint {
        ThroughputHint {
            read_units: PipelineDefaults::READ_CAPACITY_UNITS,
            write_units: PipelineDefaults::WRITE_CAPACITY_UNITS,
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.stream_name, "temperature-stream");
        assert_eq!(config.table_name, "temperatures");
        assert_eq!(config.stream_poll_interval, Duration::from_secs(30));
        assert_eq!(config.creation_timeout, Duration::from_secs(300));
        assert!(config.reset_table_on_start);
    }

    #[test]
    fn test_key_schema_matches_table_layout() {
        let schema = PipelineConfig::default().key_schema();
        assert_eq!(schema.hash_key, "sensor");
        assert_eq!(schema.range_key, "time_stamp");
    }
}
