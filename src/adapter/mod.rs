//! Platform adapter abstraction
//!
//! The reconciler never talks to a control plane directly. It is handed a
//! [`ResourceAdapter`] at construction and drives the platform only through
//! it, which keeps the reconciliation logic independent of any one vendor
//! client and lets tests substitute a mock or the in-memory platform.
//!
//! # Adapter obligations
//!
//! - Deletes are idempotent: deleting something that is already gone is `Ok`.
//! - Deleting a config or model still referenced by an endpoint (live or
//!   deleting) fails with [`Error::ResourceInUse`].
//! - Rate limits and network failures surface as
//!   [`Error::TransientPlatform`]; everything the platform rejects outright is
//!   [`Error::PermanentPlatform`].
//! - `list_*` take a raw name prefix; ownership is decided by the caller.

mod local;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::types::{
    ArtifactReference, ConfigHandle, ContainerEnv, ContainerSpec, EndpointConfigDescription,
    EndpointDescription, EndpointHandle, ModelHandle, ProductionVariant, ResourceKind,
};
use crate::Error;

pub use local::LocalPlatform;
pub use memory::{
    ConfigRecord, EndpointRecord, Fault, MemoryPlatform, ModelRecord, Operation,
    PendingTransition, PlatformState, SettleOutcome, DEFAULT_SETTLE_TICKS,
};

/// Result of looking up a resource that may not exist
///
/// Absence is an ordinary answer, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The resource exists
    Found(T),
    /// No resource has that name
    NotFound,
}

impl<T> Lookup<T> {
    /// Convert into an `Option`
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(t) => Some(t),
            Lookup::NotFound => None,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Lookup::Found(t),
            None => Lookup::NotFound,
        }
    }
}

/// Capability set of a managed inference control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Whether anything exists at the artifact location
    async fn artifact_exists(&self, artifact: &ArtifactReference) -> Result<bool, Error>;

    /// Register a model serving `artifact` in `container`
    async fn create_model(
        &self,
        name: &str,
        artifact: &ArtifactReference,
        container: &ContainerSpec,
        env: &ContainerEnv,
    ) -> Result<ModelHandle, Error>;

    /// Create an immutable config binding the given variants
    async fn create_endpoint_config(
        &self,
        name: &str,
        variants: &[ProductionVariant],
    ) -> Result<ConfigHandle, Error>;

    /// Create an endpoint on `config`; returns once the create is accepted
    async fn create_endpoint(
        &self,
        name: &str,
        config: &ConfigHandle,
    ) -> Result<EndpointHandle, Error>;

    /// Point an existing endpoint at `config`; returns once the update is accepted
    async fn update_endpoint(&self, name: &str, config: &ConfigHandle) -> Result<(), Error>;

    /// Current state of an endpoint
    async fn describe_endpoint(&self, name: &str) -> Result<Lookup<EndpointDescription>, Error>;

    /// Current contents of an endpoint config
    async fn describe_endpoint_config(
        &self,
        name: &str,
    ) -> Result<Lookup<EndpointConfigDescription>, Error>;

    /// Names of endpoints starting with `prefix`
    async fn list_endpoints(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Names of models starting with `prefix`
    async fn list_models(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Names of endpoint configs starting with `prefix`
    async fn list_endpoint_configs(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Delete a model (idempotent)
    async fn delete_model(&self, name: &str) -> Result<(), Error>;

    /// Delete an endpoint config (idempotent)
    async fn delete_endpoint_config(&self, name: &str) -> Result<(), Error>;

    /// Begin deleting an endpoint (idempotent); see [`Self::wait_until_deleted`]
    async fn delete_endpoint(&self, name: &str) -> Result<(), Error>;

    /// Block until the resource no longer exists, or fail with [`Error::Timeout`]
    async fn wait_until_deleted(
        &self,
        kind: ResourceKind,
        name: &str,
        timeout: Duration,
    ) -> Result<(), Error>;
}
