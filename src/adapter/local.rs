//! File-backed control plane
//!
//! Wraps [`MemoryPlatform`] and writes its state to a JSON file after every
//! call, so separate CLI invocations see the same models, configs, and
//! endpoints. Endpoint transitions still resolve by describe ticks; a deploy
//! run that polls to completion leaves a settled endpoint on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::memory::{MemoryPlatform, PlatformState};
use super::{Lookup, ResourceAdapter};
use crate::types::{
    ArtifactReference, ConfigHandle, ContainerEnv, ContainerSpec, EndpointConfigDescription,
    EndpointDescription, EndpointHandle, ModelHandle, ProductionVariant, ResourceKind,
};
use crate::Error;

/// URI scheme resolved against the local filesystem
pub const FILE_SCHEME: &str = "file";

/// [`ResourceAdapter`] persisting its state to a JSON file
pub struct LocalPlatform {
    path: PathBuf,
    inner: MemoryPlatform,
}

impl LocalPlatform {
    /// Open the state file at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let state: PlatformState = serde_json::from_str(&raw)?;
            debug!(
                path = %path.display(),
                endpoints = state.endpoints.len(),
                configs = state.configs.len(),
                models = state.models.len(),
                "Loaded platform state"
            );
            state
        } else {
            info!(path = %path.display(), "No platform state found, starting empty");
            PlatformState::default()
        };
        Ok(Self {
            path,
            inner: MemoryPlatform::with_state(state),
        })
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Describe calls each endpoint transition takes to resolve
    pub fn set_settle_ticks(&self, ticks: u32) {
        self.inner.set_settle_ticks(ticks);
    }

    /// Record a non-file artifact as uploaded
    pub fn register_artifact(&self, artifact: &ArtifactReference) -> Result<(), Error> {
        self.inner.register_artifact(artifact);
        self.persist()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> PlatformState {
        self.inner.snapshot()
    }

    /// Write state to a sibling temp file, then rename it over the state file
    fn persist(&self) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&self.inner.snapshot())?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Persist after `result` was produced, preferring the call's own error
    fn commit<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        let persisted = self.persist();
        let value = result?;
        persisted?;
        Ok(value)
    }
}

#[async_trait]
impl ResourceAdapter for LocalPlatform {
    async fn artifact_exists(&self, artifact: &ArtifactReference) -> Result<bool, Error> {
        if artifact.scheme() == FILE_SCHEME {
            return Ok(Path::new(artifact.location()).exists());
        }
        self.inner.artifact_exists(artifact).await
    }

    async fn create_model(
        &self,
        name: &str,
        artifact: &ArtifactReference,
        container: &ContainerSpec,
        env: &ContainerEnv,
    ) -> Result<ModelHandle, Error> {
        let result = self.inner.create_model(name, artifact, container, env).await;
        self.commit(result)
    }

    async fn create_endpoint_config(
        &self,
        name: &str,
        variants: &[ProductionVariant],
    ) -> Result<ConfigHandle, Error> {
        let result = self.inner.create_endpoint_config(name, variants).await;
        self.commit(result)
    }

    async fn create_endpoint(
        &self,
        name: &str,
        config: &ConfigHandle,
    ) -> Result<EndpointHandle, Error> {
        let result = self.inner.create_endpoint(name, config).await;
        self.commit(result)
    }

    async fn update_endpoint(&self, name: &str, config: &ConfigHandle) -> Result<(), Error> {
        let result = self.inner.update_endpoint(name, config).await;
        self.commit(result)
    }

    async fn describe_endpoint(&self, name: &str) -> Result<Lookup<EndpointDescription>, Error> {
        // Describing advances transitions, so it mutates state too
        let result = self.inner.describe_endpoint(name).await;
        self.commit(result)
    }

    async fn describe_endpoint_config(
        &self,
        name: &str,
    ) -> Result<Lookup<EndpointConfigDescription>, Error> {
        self.inner.describe_endpoint_config(name).await
    }

    async fn list_endpoints(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.inner.list_endpoints(prefix).await
    }

    async fn list_models(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.inner.list_models(prefix).await
    }

    async fn list_endpoint_configs(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.inner.list_endpoint_configs(prefix).await
    }

    async fn delete_model(&self, name: &str) -> Result<(), Error> {
        let result = self.inner.delete_model(name).await;
        self.commit(result)
    }

    async fn delete_endpoint_config(&self, name: &str) -> Result<(), Error> {
        let result = self.inner.delete_endpoint_config(name).await;
        self.commit(result)
    }

    async fn delete_endpoint(&self, name: &str) -> Result<(), Error> {
        let result = self.inner.delete_endpoint(name).await;
        self.commit(result)
    }

    async fn wait_until_deleted(
        &self,
        kind: ResourceKind,
        name: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        let result = self.inner.wait_until_deleted(kind, name, timeout).await;
        self.commit(result)
    }
}
