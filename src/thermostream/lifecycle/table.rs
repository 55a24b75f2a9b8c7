//! Aggregation table lifecycle management
//!
//! Mirrors the stream manager: idempotent create with a bounded wait for
//! `Active`, best-effort delete, and an `exists` probe that never errors on
//! "not found" so callers can decide whether a row-merge read is worth
//! attempting at all.

use log::{error, info, warn};
use std::sync::Arc;

use crate::thermostream::error::PipelineError;
use crate::thermostream::lifecycle::poller;
use crate::thermostream::lifecycle::LifecycleOptions;
use crate::thermostream::shutdown::ShutdownToken;
use crate::thermostream::transport::{KeySchema, TableStatus, TableStore, ThroughputHint};

pub struct TableLifecycleManager {
    store: Arc<dyn TableStore>,
    options: LifecycleOptions,
    shutdown: ShutdownToken,
}

impl TableLifecycleManager {
    pub fn new(
        store: Arc<dyn TableStore>,
        options: LifecycleOptions,
        shutdown: ShutdownToken,
    ) -> Self {
        TableLifecycleManager {
            store,
            options,
            shutdown,
        }
    }

    /// Create the table if it does not exist, then wait for it to become
    /// active within the wait budget. No-op if it is already active.
    pub async fn create_if_absent(
        &self,
        name: &str,
        key_schema: &KeySchema,
        throughput: &ThroughputHint,
    ) -> Result<(), PipelineError> {
        match self.store.describe_table(name).await {
            Ok(TableStatus::Active) => return Ok(()),
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                match self.store.create_table(name, key_schema, throughput).await {
                    Ok(()) => info!(
                        "Created table {}. Waiting up to {:?} for it to become active...",
                        name, self.options.creation_timeout
                    ),
                    // A concurrent creator won the race.
                    Err(err) if err.is_in_use() => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        }

        let active = poller::wait_until_ready(
            || self.check_active(name),
            self.options.poll_interval,
            self.options.creation_timeout,
            &self.shutdown,
        )
        .await;
        if !active {
            return Err(PipelineError::Provisioning {
                resource: format!("table {}", name),
                reason: "did not become active within the wait budget".to_string(),
            });
        }
        Ok(())
    }

    /// Delete any existing table with this name, wait for the deletion to
    /// be observable, then create a fresh one. Used to reset the
    /// aggregation table between runs.
    pub async fn recreate(
        &self,
        name: &str,
        key_schema: &KeySchema,
        throughput: &ThroughputHint,
    ) -> Result<(), PipelineError> {
        match self.store.describe_table(name).await {
            Ok(_) => {
                info!("Deleting table {}...", name);
                match self.store.delete_table(name).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
                if !self.poll_for_absent(name).await {
                    return Err(PipelineError::Provisioning {
                        resource: format!("table {}", name),
                        reason: "was not deleted within the wait budget".to_string(),
                    });
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        self.create_if_absent(name, key_schema, throughput).await
    }

    /// Best-effort teardown; failures other than "not found" are logged
    /// and swallowed.
    pub async fn delete(&self, name: &str) {
        info!("Deleting table {}", name);
        match self.store.delete_table(name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => error!("Error deleting table {}: {}", name, err),
        }
    }

    /// Whether the table exists and is active. Never errors: "not found"
    /// is `false`, and an unreachable store is logged and reported as
    /// `false` rather than propagated.
    pub async fn exists(&self, name: &str) -> bool {
        match self.store.describe_table(name).await {
            Ok(status) => status == TableStatus::Active,
            Err(err) if err.is_not_found() => false,
            Err(err) => {
                warn!("Unable to describe table {}: {}", name, err);
                false
            }
        }
    }

    async fn poll_for_absent(&self, name: &str) -> bool {
        poller::wait_until_ready(
            || self.check_absent(name),
            self.options.poll_interval,
            self.options.deletion_timeout,
            &self.shutdown,
        )
        .await
    }

    async fn check_active(&self, name: &str) -> bool {
        matches!(
            self.store.describe_table(name).await,
            Ok(TableStatus::Active)
        )
    }

    async fn check_absent(&self, name: &str) -> bool {
        matches!(
            self.store.describe_table(name).await,
            Err(err) if err.is_not_found()
        )
    }
}
