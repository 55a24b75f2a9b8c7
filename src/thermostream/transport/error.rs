//! Stream transport and table store error type

use std::error::Error;
use std::fmt;

/// Unified error type for stream transport and table store operations.
///
/// Not-found is a distinguished variant rather than a status value because
/// the idempotent provisioning logic treats it as a valid state ("safe to
/// create"), never as a failure.
#[derive(Debug)]
pub enum TransportError {
    /// The named stream or table does not exist
    ResourceNotFound { resource: String },
    /// The named stream or table already exists or is being mutated
    ResourceInUse { resource: String },
    /// Transient service or network failure
    Service { message: String },
}

impl TransportError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        TransportError::ResourceNotFound {
            resource: resource.into(),
        }
    }

    pub fn in_use(resource: impl Into<String>) -> Self {
        TransportError::ResourceInUse {
            resource: resource.into(),
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        TransportError::Service {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::ResourceNotFound { .. })
    }

    pub fn is_in_use(&self) -> bool {
        matches!(self, TransportError::ResourceInUse { .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ResourceNotFound { resource } => {
                write!(f, "resource {} not found", resource)
            }
            TransportError::ResourceInUse { resource } => {
                write!(f, "resource {} already in use", resource)
            }
            TransportError::Service { message } => write!(f, "service error: {}", message),
        }
    }
}

impl Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        assert!(TransportError::not_found("stream x").is_not_found());
        assert!(!TransportError::not_found("stream x").is_in_use());
        assert!(TransportError::in_use("table y").is_in_use());
        assert!(!TransportError::service("boom").is_not_found());
    }

    #[test]
    fn test_display() {
        let err = TransportError::not_found("stream temperatures");
        assert_eq!(err.to_string(), "resource stream temperatures not found");
    }
}
