//! Endpoint Reconciler - idempotent deploys for managed inference endpoints
//!
//! A serving deployment on a managed inference platform is three resources: a
//! model (artifact + container), an endpoint config (model + capacity), and the
//! endpoint clients invoke. This crate composes them into one retry-safe
//! operation: deploy the same artifact twice and exactly one endpoint serves
//! one (model, config) pair, with everything it replaced cleaned up.
//!
//! # Architecture
//!
//! - The [`reconciler::Reconciler`] owns the algorithm and nothing else. It
//!   reaches the platform only through an injected
//!   [`adapter::ResourceAdapter`].
//! - Resource ownership is structural: names are `prefix-identity[-generation]`
//!   and are parsed back, never substring-matched.
//! - Every reconciliation yields a serializable
//!   [`types::ReconciliationResult`], including on failure.
//!
//! # Modules
//!
//! - [`reconciler`] - `reconcile`, `sweep`, `teardown`, `status`
//! - [`adapter`] - Platform capability trait plus in-memory and file-backed planes
//! - [`naming`] - Structured resource names and generation suffixes
//! - [`types`] - Artifacts, capacity, handles, statuses, result records
//! - [`retry`] - Exponential backoff for transient platform errors
//! - [`config`] - Reconciler configuration (YAML)
//! - [`telemetry`] - Logging setup
//! - [`cli`] - Command-line surface used by the binary
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod naming;
pub mod reconciler;
pub mod retry;
pub mod telemetry;
pub mod types;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Defaults shared by the config layer, the CLI, and test fixtures. They follow
// the reference deployment: a small serverless sklearn endpoint.

/// Prefix owning every resource the reconciler creates
pub const DEFAULT_NAME_PREFIX: &str = "mlops";

/// Endpoint identity used when the caller names none
pub const DEFAULT_ENDPOINT_IDENTITY: &str = "showcase-endpoint";

/// Object key of the model package inside a bucket
pub const DEFAULT_MODEL_KEY: &str = "models/model.tar.gz";

/// Inference container image
pub const DEFAULT_CONTAINER_IMAGE: &str = "sklearn-inference:1.2-1";

/// Serverless memory per worker, in MB
pub const DEFAULT_SERVERLESS_MEMORY_MB: u32 = 2048;

/// Serverless concurrency
pub const DEFAULT_SERVERLESS_CONCURRENCY: u32 = 1;

/// Attempts per platform call, including the first
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 4;

/// Sleep between endpoint describe calls while waiting
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Bound on waiting for an endpoint to settle
///
/// Serverless endpoint creation routinely takes several minutes.
pub const DEFAULT_SETTLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Bound on waiting for an endpoint deletion
pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 10 * 60;
