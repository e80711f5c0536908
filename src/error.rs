//! Error types for endpoint reconciliation
//!
//! Errors are structured with fields to aid debugging: the resource kind and
//! name involved, the platform operation that failed, and whether the failure
//! is worth retrying. [`Error::kind`] maps every error onto the serializable
//! [`ErrorKind`] taxonomy carried in reconciliation results.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ResourceKind;

/// Main error type for reconciliation operations
#[derive(Debug, Error)]
pub enum Error {
    /// The model artifact location does not exist on the platform
    #[error("artifact not found: {artifact}")]
    ArtifactNotFound {
        /// The artifact URI that was checked
        artifact: String,
    },

    /// A resource cannot be deleted because something still references it
    #[error("{kind} {name} is in use by {referenced_by}")]
    ResourceInUse {
        /// Kind of the resource that was being deleted
        kind: ResourceKind,
        /// Name of the resource that was being deleted
        name: String,
        /// Name of the resource holding the reference
        referenced_by: String,
    },

    /// A bounded wait ran out of time
    #[error("timed out after {waited:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// How long the wait lasted
        waited: Duration,
    },

    /// Rate limiting, throttling, or a network failure; safe to retry
    #[error("transient platform error during {operation}: {message}")]
    TransientPlatform {
        /// Platform operation that failed
        operation: String,
        /// Description of the failure
        message: String,
    },

    /// A platform rejection that will not succeed on retry
    #[error("platform error during {operation}: {message}")]
    PermanentPlatform {
        /// Platform operation that failed
        operation: String,
        /// Description of the failure
        message: String,
    },

    /// Cleanup failed after the endpoint was successfully cut over
    #[error("cleanup incomplete ({} failure(s)): {}", failures.len(), failures.join("; "))]
    PartialFailure {
        /// One entry per resource that could not be removed
        failures: Vec<String>,
    },

    /// The endpoint settled into a failed state
    #[error("endpoint {endpoint} failed to settle: {reason}")]
    EndpointFailed {
        /// Platform name of the endpoint
        endpoint: String,
        /// Failure reason reported by the platform
        reason: String,
    },

    /// The named resource does not exist
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Kind of the missing resource
        kind: ResourceKind,
        /// Name of the missing resource
        name: String,
    },

    /// A resource with this name already exists
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Kind of the conflicting resource
        kind: ResourceKind,
        /// Name of the conflicting resource
        name: String,
    },

    /// The caller cancelled an in-flight operation
    #[error("cancelled while {operation}")]
    Cancelled {
        /// What was in flight
        operation: String,
    },

    /// Input failed validation before any remote call was made
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending field, if known
        field: Option<String>,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Local I/O error
    #[error("io error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an artifact-not-found error
    pub fn artifact_not_found(artifact: impl Into<String>) -> Self {
        Self::ArtifactNotFound {
            artifact: artifact.into(),
        }
    }

    /// Create a resource-in-use error
    pub fn resource_in_use(
        kind: ResourceKind,
        name: impl Into<String>,
        referenced_by: impl Into<String>,
    ) -> Self {
        Self::ResourceInUse {
            kind,
            name: name.into(),
            referenced_by: referenced_by.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            waited,
        }
    }

    /// Create a retryable platform error
    pub fn transient(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientPlatform {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a non-retryable platform error
    pub fn permanent(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PermanentPlatform {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a partial-failure error from per-resource failure descriptions
    pub fn partial_failure(failures: Vec<String>) -> Self {
        Self::PartialFailure { failures }
    }

    /// Create an endpoint-failed error
    pub fn endpoint_failed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EndpointFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only transient platform errors are retried. Everything else either
    /// needs a caller decision (in use, not found) or will fail the same way
    /// again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientPlatform { .. })
    }

    /// Whether this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Map this error onto the result taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            Error::ResourceInUse { .. } => ErrorKind::ResourceInUse,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::TransientPlatform { .. } => ErrorKind::TransientPlatformError,
            Error::PermanentPlatform { .. } => ErrorKind::PermanentPlatformError,
            Error::PartialFailure { .. } => ErrorKind::PartialFailure,
            Error::EndpointFailed { .. } => ErrorKind::EndpointFailed,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Config { .. } | Error::Serialization { .. } | Error::Io { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Serializable error category reported in results
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The artifact location was missing
    ArtifactNotFound,
    /// A delete hit a live reference
    ResourceInUse,
    /// A settle or deletion wait exceeded its bound
    Timeout,
    /// Retries were exhausted on a transient failure
    TransientPlatformError,
    /// The platform rejected a call outright
    PermanentPlatformError,
    /// Cutover succeeded but cleanup did not finish
    PartialFailure,
    /// The endpoint settled as failed
    EndpointFailed,
    /// A resource was missing where one was required
    NotFound,
    /// A name collided with an existing resource
    AlreadyExists,
    /// The caller cancelled the operation
    Cancelled,
    /// Input shape was invalid
    Validation,
    /// Local configuration, serialization, or I/O failure
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ArtifactNotFound => "ArtifactNotFound",
            ErrorKind::ResourceInUse => "ResourceInUse",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::TransientPlatformError => "TransientPlatformError",
            ErrorKind::PermanentPlatformError => "PermanentPlatformError",
            ErrorKind::PartialFailure => "PartialFailure",
            ErrorKind::EndpointFailed => "EndpointFailed",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Validation => "Validation",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}
