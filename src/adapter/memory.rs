//! In-memory control plane
//!
//! `MemoryPlatform` behaves like a managed inference control plane closely
//! enough to exercise the reconciler end to end:
//!
//! - names are unique per resource kind
//! - configs need existing models, endpoints need existing configs
//! - configs and models referenced by an endpoint cannot be deleted
//! - endpoints settle asynchronously: a create/update/delete resolves after a
//!   configurable number of `describe_endpoint` calls ("ticks")
//! - a failed update rolls the endpoint back onto its previous config
//!
//! Faults can be injected per operation to simulate throttling or rejections,
//! and every call is counted.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Lookup, ResourceAdapter};
use crate::types::{
    ArtifactReference, ConfigHandle, ContainerEnv, ContainerSpec, EndpointConfigDescription,
    EndpointDescription, EndpointHandle, EndpointStatus, ModelHandle, ProductionVariant,
    ResourceKind,
};
use crate::Error;

/// Describe calls an endpoint transition takes to resolve by default
pub const DEFAULT_SETTLE_TICKS: u32 = 2;

/// Adapter operations, for fault injection and call counting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `artifact_exists`
    ArtifactExists,
    /// `create_model`
    CreateModel,
    /// `create_endpoint_config`
    CreateEndpointConfig,
    /// `create_endpoint`
    CreateEndpoint,
    /// `update_endpoint`
    UpdateEndpoint,
    /// `describe_endpoint`
    DescribeEndpoint,
    /// `describe_endpoint_config`
    DescribeEndpointConfig,
    /// `list_endpoints`
    ListEndpoints,
    /// `list_models`
    ListModels,
    /// `list_endpoint_configs`
    ListEndpointConfigs,
    /// `delete_model`
    DeleteModel,
    /// `delete_endpoint_config`
    DeleteEndpointConfig,
    /// `delete_endpoint`
    DeleteEndpoint,
    /// `wait_until_deleted`
    WaitUntilDeleted,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactExists => "artifact_exists",
            Self::CreateModel => "create_model",
            Self::CreateEndpointConfig => "create_endpoint_config",
            Self::CreateEndpoint => "create_endpoint",
            Self::UpdateEndpoint => "update_endpoint",
            Self::DescribeEndpoint => "describe_endpoint",
            Self::DescribeEndpointConfig => "describe_endpoint_config",
            Self::ListEndpoints => "list_endpoints",
            Self::ListModels => "list_models",
            Self::ListEndpointConfigs => "list_endpoint_configs",
            Self::DeleteModel => "delete_model",
            Self::DeleteEndpointConfig => "delete_endpoint_config",
            Self::DeleteEndpoint => "delete_endpoint",
            Self::WaitUntilDeleted => "wait_until_deleted",
        }
    }
}

/// A failure to inject into the next call of an operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fails with [`Error::TransientPlatform`]
    Transient(String),
    /// Fails with [`Error::PermanentPlatform`]
    Permanent(String),
}

impl Fault {
    fn into_error(self, op: Operation) -> Error {
        match self {
            Fault::Transient(msg) => Error::transient(op.as_str(), msg),
            Fault::Permanent(msg) => Error::permanent(op.as_str(), msg),
        }
    }
}

/// How a create or update resolves once its ticks run out
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettleOutcome {
    /// The endpoint comes up on the new config
    #[default]
    InService,
    /// The transition fails with this reason
    Failed(String),
}

/// A registered model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    /// Platform name
    pub name: String,
    /// Artifact the model serves
    pub artifact: ArtifactReference,
    /// Serving container
    pub container: ContainerSpec,
    /// Container environment
    pub env: ContainerEnv,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A stored endpoint config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    /// Platform name
    pub name: String,
    /// Variants
    pub variants: Vec<ProductionVariant>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// An in-flight endpoint transition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransition {
    /// Describe calls left before it resolves
    pub ticks_remaining: u32,
    /// How it resolves
    pub outcome: SettleOutcome,
}

/// A stored endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRecord {
    /// Platform name
    pub name: String,
    /// Lifecycle state
    pub status: EndpointStatus,
    /// Config the endpoint references
    pub config_name: String,
    /// Config being replaced by an in-flight update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_config: Option<String>,
    /// In-flight transition, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingTransition>,
    /// Reason the last transition failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

impl EndpointRecord {
    fn describe(&self) -> EndpointDescription {
        EndpointDescription {
            name: self.name.clone(),
            status: self.status,
            config_name: self.config_name.clone(),
            failure_reason: self.failure_reason.clone(),
        }
    }

    fn references(&self, config: &str) -> bool {
        self.config_name == config || self.previous_config.as_deref() == Some(config)
    }

    /// Resolve the pending transition. Returns true if the endpoint is gone.
    fn settle(&mut self, outcome: SettleOutcome) -> bool {
        self.updated_at = Utc::now();
        match (self.status, outcome) {
            (EndpointStatus::Deleting, _) => return true,
            (EndpointStatus::Creating, SettleOutcome::InService) => {
                self.status = EndpointStatus::InService;
                self.failure_reason = None;
            }
            (EndpointStatus::Creating, SettleOutcome::Failed(reason)) => {
                self.status = EndpointStatus::Failed;
                self.failure_reason = Some(reason);
            }
            (EndpointStatus::Updating, SettleOutcome::InService) => {
                self.status = EndpointStatus::InService;
                self.previous_config = None;
                self.failure_reason = None;
            }
            (EndpointStatus::Updating, SettleOutcome::Failed(reason)) => {
                // Roll back onto the config that was serving before the update
                if let Some(previous) = self.previous_config.take() {
                    self.config_name = previous;
                }
                self.status = EndpointStatus::InService;
                self.failure_reason = Some(reason);
            }
            _ => {}
        }
        false
    }
}

/// Everything the platform stores; serializable so it can be persisted
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformState {
    /// Artifact URIs that exist
    #[serde(default)]
    pub artifacts: BTreeSet<String>,
    /// Models by name
    #[serde(default)]
    pub models: BTreeMap<String, ModelRecord>,
    /// Endpoint configs by name
    #[serde(default)]
    pub configs: BTreeMap<String, ConfigRecord>,
    /// Endpoints by name
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointRecord>,
}

impl PlatformState {
    /// Endpoint holding a reference to the config, if any
    fn config_holder(&self, config: &str) -> Option<&str> {
        self.endpoints
            .values()
            .find(|e| e.references(config))
            .map(|e| e.name.as_str())
    }

    /// Endpoint holding a reference to the model through one of its configs
    fn model_holder(&self, model: &str) -> Option<&str> {
        self.endpoints
            .values()
            .find(|e| {
                std::iter::once(e.config_name.as_str())
                    .chain(e.previous_config.as_deref())
                    .filter_map(|c| self.configs.get(c))
                    .any(|c| c.variants.iter().any(|v| v.model_name == model))
            })
            .map(|e| e.name.as_str())
    }

    fn names_with_prefix<V>(map: &BTreeMap<String, V>, prefix: &str) -> Vec<String> {
        map.keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }
}

struct Inner {
    state: PlatformState,
    settle_ticks: u32,
    outcomes: VecDeque<SettleOutcome>,
    faults: HashMap<Operation, VecDeque<Fault>>,
    calls: HashMap<Operation, usize>,
    poll_interval: Duration,
}

impl Inner {
    /// Count the call and fail it if a fault is queued
    fn enter(&mut self, op: Operation) -> Result<(), Error> {
        *self.calls.entry(op).or_default() += 1;
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(fault) => {
                debug!(operation = op.as_str(), ?fault, "Injecting platform fault");
                Err(fault.into_error(op))
            }
            None => Ok(()),
        }
    }

    fn pending(&mut self) -> PendingTransition {
        PendingTransition {
            ticks_remaining: self.settle_ticks.max(1),
            outcome: self.outcomes.pop_front().unwrap_or_default(),
        }
    }

    /// Advance the endpoint's transition by one tick and describe it
    fn tick_endpoint(&mut self, name: &str) -> Option<EndpointDescription> {
        let gone = {
            let record = self.state.endpoints.get_mut(name)?;
            let due = match record.pending.as_mut() {
                Some(p) => {
                    p.ticks_remaining = p.ticks_remaining.saturating_sub(1);
                    p.ticks_remaining == 0
                }
                None => false,
            };
            match (due, record.pending.take()) {
                (true, Some(p)) => record.settle(p.outcome),
                (_, pending) => {
                    record.pending = pending;
                    false
                }
            }
        };
        if gone {
            trace!(endpoint = %name, "Endpoint deletion completed");
            self.state.endpoints.remove(name);
            return None;
        }
        self.state.endpoints.get(name).map(EndpointRecord::describe)
    }

    fn exists(&mut self, kind: ResourceKind, name: &str) -> bool {
        match kind {
            ResourceKind::Model => self.state.models.contains_key(name),
            ResourceKind::EndpointConfig => self.state.configs.contains_key(name),
            ResourceKind::Endpoint => self.tick_endpoint(name).is_some(),
        }
    }
}

/// In-memory implementation of [`ResourceAdapter`]
pub struct MemoryPlatform {
    inner: Mutex<Inner>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// An empty platform
    pub fn new() -> Self {
        Self::with_state(PlatformState::default())
    }

    /// A platform starting from existing state
    pub fn with_state(state: PlatformState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                settle_ticks: DEFAULT_SETTLE_TICKS,
                outcomes: VecDeque::new(),
                faults: HashMap::new(),
                calls: HashMap::new(),
                poll_interval: Duration::from_millis(1),
            }),
        }
    }

    /// Copy of everything stored
    pub fn snapshot(&self) -> PlatformState {
        self.inner.lock().state.clone()
    }

    /// Make an artifact location exist
    pub fn register_artifact(&self, artifact: &ArtifactReference) {
        self.inner
            .lock()
            .state
            .artifacts
            .insert(artifact.as_str().to_string());
    }

    /// Insert a settled, in-service deployment (model + config + endpoint)
    pub fn seed_deployment(
        &self,
        endpoint: &str,
        config: &str,
        model: &str,
        artifact: &ArtifactReference,
        capacity: crate::types::CapacitySpec,
    ) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        state.artifacts.insert(artifact.as_str().to_string());
        state.models.insert(
            model.to_string(),
            ModelRecord {
                name: model.to_string(),
                artifact: artifact.clone(),
                container: ContainerSpec::default(),
                env: ContainerEnv::new(),
                created_at: now,
            },
        );
        state.configs.insert(
            config.to_string(),
            ConfigRecord {
                name: config.to_string(),
                variants: vec![ProductionVariant::primary(
                    &ModelHandle {
                        name: model.to_string(),
                    },
                    capacity,
                )],
                created_at: now,
            },
        );
        state.endpoints.insert(
            endpoint.to_string(),
            EndpointRecord {
                name: endpoint.to_string(),
                status: EndpointStatus::InService,
                config_name: config.to_string(),
                previous_config: None,
                pending: None,
                failure_reason: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Describe calls each future transition takes to resolve
    pub fn set_settle_ticks(&self, ticks: u32) {
        self.inner.lock().settle_ticks = ticks;
    }

    /// How the next create/update resolves (queued, first in first out)
    pub fn push_settle_outcome(&self, outcome: SettleOutcome) {
        self.inner.lock().outcomes.push_back(outcome);
    }

    /// Fail the next call of `op` with `fault`
    pub fn inject_fault(&self, op: Operation, fault: Fault) {
        self.inner
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Fail the next `times` calls of `op` with `fault`
    pub fn inject_faults(&self, op: Operation, fault: Fault, times: usize) {
        for _ in 0..times {
            self.inject_fault(op, fault.clone());
        }
    }

    /// How many times `op` was called
    pub fn calls(&self, op: Operation) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Sleep between existence checks in `wait_until_deleted`
    pub fn set_poll_interval(&self, interval: Duration) {
        self.inner.lock().poll_interval = interval;
    }

    /// Stored endpoint record, without advancing its transition
    pub fn endpoint(&self, name: &str) -> Option<EndpointRecord> {
        self.inner.lock().state.endpoints.get(name).cloned()
    }

    /// Whether a model with this name exists
    pub fn has_model(&self, name: &str) -> bool {
        self.inner.lock().state.models.contains_key(name)
    }

    /// Whether an endpoint config with this name exists
    pub fn has_config(&self, name: &str) -> bool {
        self.inner.lock().state.configs.contains_key(name)
    }
}

#[async_trait]
impl ResourceAdapter for MemoryPlatform {
    async fn artifact_exists(&self, artifact: &ArtifactReference) -> Result<bool, Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::ArtifactExists)?;
        Ok(inner.state.artifacts.contains(artifact.as_str()))
    }

    async fn create_model(
        &self,
        name: &str,
        artifact: &ArtifactReference,
        container: &ContainerSpec,
        env: &ContainerEnv,
    ) -> Result<ModelHandle, Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::CreateModel)?;
        if inner.state.models.contains_key(name) {
            return Err(Error::already_exists(ResourceKind::Model, name));
        }
        inner.state.models.insert(
            name.to_string(),
            ModelRecord {
                name: name.to_string(),
                artifact: artifact.clone(),
                container: container.clone(),
                env: env.clone(),
                created_at: Utc::now(),
            },
        );
        debug!(model = %name, "Model created");
        Ok(ModelHandle {
            name: name.to_string(),
        })
    }

    async fn create_endpoint_config(
        &self,
        name: &str,
        variants: &[ProductionVariant],
    ) -> Result<ConfigHandle, Error> {
        let op = Operation::CreateEndpointConfig;
        let mut inner = self.inner.lock();
        inner.enter(op)?;
        if inner.state.configs.contains_key(name) {
            return Err(Error::already_exists(ResourceKind::EndpointConfig, name));
        }
        if variants.is_empty() {
            return Err(Error::permanent(
                op.as_str(),
                "an endpoint config needs at least one variant",
            ));
        }
        if let Some(missing) = variants
            .iter()
            .find(|v| !inner.state.models.contains_key(&v.model_name))
        {
            return Err(Error::permanent(
                op.as_str(),
                format!("could not find model {}", missing.model_name),
            ));
        }
        inner.state.configs.insert(
            name.to_string(),
            ConfigRecord {
                name: name.to_string(),
                variants: variants.to_vec(),
                created_at: Utc::now(),
            },
        );
        debug!(config = %name, "Endpoint config created");
        Ok(ConfigHandle {
            name: name.to_string(),
        })
    }

    async fn create_endpoint(
        &self,
        name: &str,
        config: &ConfigHandle,
    ) -> Result<EndpointHandle, Error> {
        let op = Operation::CreateEndpoint;
        let mut inner = self.inner.lock();
        inner.enter(op)?;
        if inner.state.endpoints.contains_key(name) {
            return Err(Error::already_exists(ResourceKind::Endpoint, name));
        }
        if !inner.state.configs.contains_key(&config.name) {
            return Err(Error::permanent(
                op.as_str(),
                format!("could not find endpoint config {}", config.name),
            ));
        }
        let now = Utc::now();
        let pending = inner.pending();
        inner.state.endpoints.insert(
            name.to_string(),
            EndpointRecord {
                name: name.to_string(),
                status: EndpointStatus::Creating,
                config_name: config.name.clone(),
                previous_config: None,
                pending: Some(pending),
                failure_reason: None,
                created_at: now,
                updated_at: now,
            },
        );
        debug!(endpoint = %name, config = %config.name, "Endpoint creation started");
        Ok(EndpointHandle {
            name: name.to_string(),
        })
    }

    async fn update_endpoint(&self, name: &str, config: &ConfigHandle) -> Result<(), Error> {
        let op = Operation::UpdateEndpoint;
        let mut inner = self.inner.lock();
        inner.enter(op)?;
        if !inner.state.configs.contains_key(&config.name) {
            return Err(Error::permanent(
                op.as_str(),
                format!("could not find endpoint config {}", config.name),
            ));
        }
        let status = match inner.state.endpoints.get(name) {
            Some(record) => record.status,
            None => return Err(Error::not_found(ResourceKind::Endpoint, name)),
        };
        if !status.is_terminal() {
            return Err(Error::permanent(
                op.as_str(),
                format!("cannot update endpoint {name} while it is {status}"),
            ));
        }
        let pending = inner.pending();
        if let Some(record) = inner.state.endpoints.get_mut(name) {
            let previous = std::mem::replace(&mut record.config_name, config.name.clone());
            record.previous_config = Some(previous);
            record.status = EndpointStatus::Updating;
            record.pending = Some(pending);
            record.updated_at = Utc::now();
        }
        debug!(endpoint = %name, config = %config.name, "Endpoint update started");
        Ok(())
    }

    async fn describe_endpoint(&self, name: &str) -> Result<Lookup<EndpointDescription>, Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::DescribeEndpoint)?;
        Ok(inner.tick_endpoint(name).into())
    }

    async fn describe_endpoint_config(
        &self,
        name: &str,
    ) -> Result<Lookup<EndpointConfigDescription>, Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::DescribeEndpointConfig)?;
        Ok(inner
            .state
            .configs
            .get(name)
            .map(|c| EndpointConfigDescription {
                name: c.name.clone(),
                variants: c.variants.clone(),
            })
            .into())
    }

    async fn list_endpoints(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::ListEndpoints)?;
        Ok(PlatformState::names_with_prefix(&inner.state.endpoints, prefix))
    }

    async fn list_models(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::ListModels)?;
        Ok(PlatformState::names_with_prefix(&inner.state.models, prefix))
    }

    async fn list_endpoint_configs(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::ListEndpointConfigs)?;
        Ok(PlatformState::names_with_prefix(&inner.state.configs, prefix))
    }

    async fn delete_model(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::DeleteModel)?;
        if let Some(holder) = inner.state.model_holder(name) {
            return Err(Error::resource_in_use(ResourceKind::Model, name, holder));
        }
        if inner.state.models.remove(name).is_some() {
            debug!(model = %name, "Model deleted");
        }
        Ok(())
    }

    async fn delete_endpoint_config(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::DeleteEndpointConfig)?;
        if let Some(holder) = inner.state.config_holder(name) {
            return Err(Error::resource_in_use(
                ResourceKind::EndpointConfig,
                name,
                holder,
            ));
        }
        if inner.state.configs.remove(name).is_some() {
            debug!(config = %name, "Endpoint config deleted");
        }
        Ok(())
    }

    async fn delete_endpoint(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.enter(Operation::DeleteEndpoint)?;
        let ticks = inner.settle_ticks.max(1);
        if let Some(record) = inner.state.endpoints.get_mut(name) {
            if record.status != EndpointStatus::Deleting {
                record.status = EndpointStatus::Deleting;
                record.pending = Some(PendingTransition {
                    ticks_remaining: ticks,
                    outcome: SettleOutcome::InService,
                });
                record.updated_at = Utc::now();
                debug!(endpoint = %name, "Endpoint deletion started");
            }
        }
        Ok(())
    }

    async fn wait_until_deleted(
        &self,
        kind: ResourceKind,
        name: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.inner.lock().enter(Operation::WaitUntilDeleted)?;
        let wait = async {
            loop {
                let (exists, interval) = {
                    let mut inner = self.inner.lock();
                    (inner.exists(kind, name), inner.poll_interval)
                };
                if !exists {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::timeout(format!("{kind} {name} to be deleted"), timeout))
    }
}
