//! Stream lifecycle management
//!
//! All operations are idempotent with respect to "a stream with this name
//! exists": concurrent duplicate creates no-op instead of failing, and
//! teardown treats "already gone" as success. Only a stream that never
//! reaches `Active` within the wait budget is a hard failure.

use log::{error, info, warn};
use std::sync::Arc;

use crate::thermostream::error::PipelineError;
use crate::thermostream::lifecycle::poller;
use crate::thermostream::lifecycle::LifecycleOptions;
use crate::thermostream::shutdown::ShutdownToken;
use crate::thermostream::transport::{StreamStatus, StreamTransport};

pub struct StreamLifecycleManager {
    transport: Arc<dyn StreamTransport>,
    options: LifecycleOptions,
    shutdown: ShutdownToken,
}

impl StreamLifecycleManager {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        options: LifecycleOptions,
        shutdown: ShutdownToken,
    ) -> Self {
        StreamLifecycleManager {
            transport,
            options,
            shutdown,
        }
    }

    /// Create the stream if it does not exist, then wait for it to become
    /// active. No-op if it is already active. `shard_count` is ignored when
    /// the stream already exists.
    pub async fn create_if_absent(
        &self,
        name: &str,
        shard_count: usize,
    ) -> Result<(), PipelineError> {
        match self.transport.describe_stream(name).await {
            Ok(description) if description.status == StreamStatus::Active => {
                info!("Stream {} was already created", name);
                return Ok(());
            }
            // Mid-creation or mid-update by another actor: fall through
            // and wait for it to settle.
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                info!("Creating stream {} with {} shards...", name, shard_count);
                match self.transport.create_stream(name, shard_count).await {
                    Ok(()) => {}
                    // A concurrent creator won the race; the stream exists.
                    Err(err) if err.is_in_use() => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        }

        if !self.poll_for_active(name).await {
            return Err(PipelineError::Provisioning {
                resource: format!("stream {}", name),
                reason: "did not become active within the wait budget".to_string(),
            });
        }
        Ok(())
    }

    /// Delete any existing stream with this name, wait for the deletion to
    /// be observable, then create a fresh one. Used to discard a stream
    /// left over from a previous run.
    pub async fn recreate(&self, name: &str, shard_count: usize) -> Result<(), PipelineError> {
        match self.transport.describe_stream(name).await {
            Ok(_) => {
                info!("Deleting stream {}...", name);
                match self.transport.delete_stream(name).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
                // Deletion is asynchronous with no completion signal other
                // than the stream disappearing; poll for that instead of
                // sleeping a fixed grace period.
                if !self.poll_for_absent(name).await {
                    return Err(PipelineError::Provisioning {
                        resource: format!("stream {}", name),
                        reason: "was not deleted within the wait budget".to_string(),
                    });
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        self.create_if_absent(name, shard_count).await
    }

    /// Best-effort teardown. "Not found" is success (already gone); any
    /// other failure is logged and swallowed so teardown never aborts the
    /// caller.
    pub async fn delete(&self, name: &str) {
        info!("Deleting stream {}", name);
        match self.transport.delete_stream(name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => error!("Error deleting stream {}: {}", name, err),
        }
    }

    /// Block until the stream reports active, with no deadline. "Not
    /// found" keeps waiting: the stream may be mid-creation by another
    /// actor. Returns `false` only if shutdown was requested first.
    pub async fn wait_until_active(&self, name: &str) -> bool {
        let active = poller::wait_until(
            || self.check_active(name),
            self.options.poll_interval,
            &self.shutdown,
        )
        .await;
        if !active {
            warn!(
                "Interrupted while waiting for stream {} to become active. Aborting.",
                name
            );
        }
        active
    }

    async fn poll_for_active(&self, name: &str) -> bool {
        poller::wait_until_ready(
            || self.check_active(name),
            self.options.poll_interval,
            self.options.creation_timeout,
            &self.shutdown,
        )
        .await
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
            self.transport.describe_stream(name).await,
            Ok(description) if description.status == StreamStatus::Active
        )
    }

    async fn check_absent(&self, name: &str) -> bool {
        matches!(
            self.transport.describe_stream(name).await,
            Err(err) if err.is_not_found()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thermostream::transport::InMemoryStreamTransport;
    use std::time::Duration;

    fn options() -> LifecycleOptions {
        LifecycleOptions {
            poll_interval: Duration::from_millis(2),
            creation_timeout: Duration::from_millis(200),
            deletion_timeout: Duration::from_millis(200),
        }
    }

    fn manager(transport: Arc<InMemoryStreamTransport>) -> StreamLifecycleManager {
        StreamLifecycleManager::new(transport, options(), ShutdownToken::never())
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let transport = Arc::new(InMemoryStreamTransport::new().with_activation_polls(2));
        let manager = manager(Arc::clone(&transport));

        manager.create_if_absent("temps", 3).await.unwrap();
        manager.create_if_absent("temps", 3).await.unwrap();

        let description = transport.describe_stream("temps").await.unwrap();
        assert_eq!(description.status, StreamStatus::Active);
        assert_eq!(description.shards.len(), 3);
    }

    #[tokio::test]
    async fn test_create_if_absent_times_out() {
        // Activation would need far more polls than the budget allows.
        let transport = Arc::new(InMemoryStreamTransport::new().with_activation_polls(10_000));
        let manager = StreamLifecycleManager::new(
            transport,
            LifecycleOptions {
                poll_interval: Duration::from_millis(5),
                creation_timeout: Duration::from_millis(20),
                deletion_timeout: Duration::from_millis(20),
            },
            ShutdownToken::never(),
        );

        let err = manager.create_if_absent("temps", 1).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provisioning { .. }));
    }

    #[tokio::test]
    async fn test_recreate_replaces_active_stream() {
        let transport = Arc::new(
            InMemoryStreamTransport::new()
                .with_activation_polls(1)
                .with_deletion_polls(1),
        );
        let manager = manager(Arc::clone(&transport));

        manager.create_if_absent("temps", 1).await.unwrap();
        manager.recreate("temps", 2).await.unwrap();

        let description = transport.describe_stream("temps").await.unwrap();
        assert_eq!(description.status, StreamStatus::Active);
        assert_eq!(description.shards.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_swallows_not_found() {
        let transport = Arc::new(InMemoryStreamTransport::new());
        let manager = manager(transport);
        // Nothing to assert beyond "does not panic or error": teardown of
        // an absent stream is success.
        manager.delete("never-created").await;
    }

    #[tokio::test]
    async fn test_wait_until_active_follows_creation() {
        let transport = Arc::new(InMemoryStreamTransport::new().with_activation_polls(3));
        let manager = manager(Arc::clone(&transport));
        transport.create_stream("temps", 1).await.unwrap();

        assert!(manager.wait_until_active("temps").await);
    }
}
