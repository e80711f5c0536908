//! Endpoint reconciliation
//!
//! [`Reconciler::reconcile`] is an idempotent upsert: every call creates a
//! fresh model and endpoint config, points the endpoint at them (creating it
//! if needed), waits for the endpoint to settle, and only then deletes the set
//! it superseded. Calling it twice with the same inputs leaves exactly one
//! endpoint serving one (model, config) pair.
//!
//! The previous set is never touched until the endpoint is in service on the
//! new config. If the endpoint does not get there, the new resources stay in
//! place and are reported in the result so a later sweep can collect them.
//!
//! [`Reconciler::sweep`] and [`Reconciler::teardown`] delete in strict
//! dependency order: endpoints (waiting for each to disappear), then configs,
//! then models. Failures are aggregated per resource instead of aborting.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{Lookup, ResourceAdapter};
use crate::config::ReconcilerConfig;
use crate::naming::{self, validate_prefix, Generation, ResourceName};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::types::{
    ArtifactReference, CapacitySpec, ConfigHandle, EndpointDescription, EndpointHealth,
    EndpointStatus, FinalStatus, ProductionVariant, ReconciliationResult, ResourceFailure,
    ResourceId, ResourceKind, ResultError, SweepReport,
};
use crate::Error;

/// Drives a [`ResourceAdapter`] towards the desired endpoint state
pub struct Reconciler {
    adapter: Arc<dyn ResourceAdapter>,
    config: ReconcilerConfig,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Reconciler {
    /// Create a reconciler over `adapter`
    pub fn new(adapter: Arc<dyn ResourceAdapter>, config: ReconcilerConfig) -> Self {
        let retry = config.retry_config();
        Self {
            adapter,
            config,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight waits when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The configuration in use
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Make `identity` serve `artifact` with `capacity`
    ///
    /// Returns `Err` only for invalid input, before any platform call. Every
    /// platform-side outcome, failures included, is reported in the result.
    #[instrument(skip_all, fields(endpoint_identity = %identity, artifact = %artifact))]
    pub async fn reconcile(
        &self,
        artifact: &ArtifactReference,
        identity: &str,
        capacity: &CapacitySpec,
    ) -> Result<ReconciliationResult, Error> {
        capacity.validate()?;
        let endpoint = ResourceName::endpoint(&self.config.name_prefix, identity)?;

        let mut result = ReconciliationResult::begin(identity, endpoint.to_string());
        match self.deploy(artifact, &endpoint, capacity, &mut result).await {
            Ok(cleanup_failures) => {
                result.final_status = FinalStatus::Success;
                if cleanup_failures.is_empty() {
                    info!(
                        endpoint = %result.endpoint_name,
                        config = result.config_name.as_deref().unwrap_or_default(),
                        deleted = result.deleted_resources.len(),
                        "Endpoint reconciled"
                    );
                } else {
                    let err = Error::partial_failure(cleanup_failures);
                    warn!(endpoint = %result.endpoint_name, error = %err, "Endpoint reconciled, cleanup incomplete");
                    result.error = Some(ResultError::from(&err));
                }
            }
            Err(err) => {
                error!(
                    endpoint = %result.endpoint_name,
                    error = %err,
                    orphaned = result.created_resources.len(),
                    "Reconciliation failed"
                );
                result.error = Some(ResultError::from(&err));
            }
        }
        Ok(result)
    }

    /// Delete every resource owned by `prefix`
    #[instrument(skip(self))]
    pub async fn sweep(&self, prefix: &str) -> Result<SweepReport, Error> {
        validate_prefix(prefix)?;
        Ok(self.sweep_matching(prefix, |_| true).await)
    }

    /// Delete the endpoint for `identity` and every config and model it owns
    #[instrument(skip(self))]
    pub async fn teardown(&self, identity: &str) -> Result<SweepReport, Error> {
        let endpoint = ResourceName::endpoint(&self.config.name_prefix, identity)?;
        Ok(self
            .sweep_matching(endpoint.prefix(), |name| name.identity() == identity)
            .await)
    }

    /// Current state of the endpoint for `identity`
    #[instrument(skip(self))]
    pub async fn status(&self, identity: &str) -> Result<EndpointHealth, Error> {
        let endpoint = ResourceName::endpoint(&self.config.name_prefix, identity)?.to_string();
        let mut health = EndpointHealth {
            endpoint_identity: identity.to_string(),
            endpoint_name: endpoint.clone(),
            status: None,
            config_name: None,
            variants: Vec::new(),
            failure_reason: None,
        };

        let Lookup::Found(description) = self.describe_endpoint(&endpoint).await? else {
            debug!(endpoint = %endpoint, "Endpoint does not exist");
            return Ok(health);
        };
        let config = self
            .call("describe_endpoint_config", || {
                self.adapter.describe_endpoint_config(&description.config_name)
            })
            .await?;
        if let Lookup::Found(config) = config {
            health.variants = config.variants;
        }
        health.status = Some(description.status);
        health.config_name = Some(description.config_name);
        health.failure_reason = description.failure_reason;
        Ok(health)
    }

    // =========================================================================
    // Reconcile steps
    // =========================================================================

    /// Run the upsert, recording created/deleted resources in `result`
    ///
    /// Returns the cleanup failures on success.
    async fn deploy(
        &self,
        artifact: &ArtifactReference,
        endpoint: &ResourceName,
        capacity: &CapacitySpec,
        result: &mut ReconciliationResult,
    ) -> Result<Vec<String>, Error> {
        let endpoint_name = endpoint.to_string();

        let exists = self
            .call("artifact_exists", || self.adapter.artifact_exists(artifact))
            .await?;
        if !exists {
            return Err(Error::artifact_not_found(artifact.as_str()));
        }

        let existing = self.existing_endpoint(&endpoint_name).await?;
        let superseded = match &existing {
            Some(description) => self.superseded_set(&description.config_name).await?,
            None => Vec::new(),
        };

        let generation = endpoint.with_generation(Generation::next()).to_string();
        self.checkpoint("creating model")?;
        let model = self
            .call("create_model", || {
                self.adapter.create_model(
                    &generation,
                    artifact,
                    &self.config.container,
                    &self.config.environment,
                )
            })
            .await?;
        result.created_resources.push(ResourceId::model(&model.name));
        info!(model = %model.name, "Model created");

        self.checkpoint("creating endpoint config")?;
        let variants = [ProductionVariant::primary(&model, capacity.clone())];
        let config = self
            .call("create_endpoint_config", || {
                self.adapter.create_endpoint_config(&generation, &variants)
            })
            .await?;
        result
            .created_resources
            .push(ResourceId::endpoint_config(&config.name));
        info!(config = %config.name, capacity = %capacity, "Endpoint config created");

        self.checkpoint("pointing endpoint at new config")?;
        if existing.is_some() {
            self.call("update_endpoint", || {
                self.adapter.update_endpoint(&endpoint_name, &config)
            })
            .await?;
            info!(endpoint = %endpoint_name, config = %config.name, "Endpoint update started");
        } else {
            self.call("create_endpoint", || {
                self.adapter.create_endpoint(&endpoint_name, &config)
            })
            .await?;
            result
                .created_resources
                .push(ResourceId::endpoint(&endpoint_name));
            info!(endpoint = %endpoint_name, config = %config.name, "Endpoint creation started");
        }

        self.await_cutover(&endpoint_name, &config, result).await?;

        Ok(self.collect_superseded(&superseded, result).await)
    }

    /// Describe the endpoint, waiting out any transition already in flight
    async fn existing_endpoint(&self, name: &str) -> Result<Option<EndpointDescription>, Error> {
        let description = match self.describe_endpoint(name).await? {
            Lookup::Found(d) if !d.status.is_terminal() => {
                info!(endpoint = %name, status = %d.status, "Waiting for in-flight transition before deploying");
                self.wait_for_settle(name).await?.into_option()
            }
            lookup => lookup.into_option(),
        };
        if let Some(d) = &description {
            debug!(endpoint = %name, status = %d.status, config = %d.config_name, "Found existing endpoint");
        }
        Ok(description)
    }

    /// The current config and its models, restricted to names this prefix owns
    async fn superseded_set(&self, config_name: &str) -> Result<Vec<ResourceId>, Error> {
        let prefix = &self.config.name_prefix;
        let owned = |name: &str| {
            ResourceName::parse(name)
                .map(|n| n.owned_by(prefix))
                .unwrap_or(false)
        };

        let mut set = Vec::new();
        let lookup = self
            .call("describe_endpoint_config", || {
                self.adapter.describe_endpoint_config(config_name)
            })
            .await?;
        if owned(config_name) {
            set.push(ResourceId::endpoint_config(config_name));
        } else {
            warn!(config = %config_name, "Current config is not owned by this prefix, leaving it in place");
        }
        match lookup {
            Lookup::Found(description) => {
                for model in description.model_names() {
                    if owned(&model) {
                        set.push(ResourceId::model(model));
                    } else {
                        warn!(model = %model, "Current model is not owned by this prefix, leaving it in place");
                    }
                }
            }
            Lookup::NotFound => {
                warn!(config = %config_name, "Current config no longer exists, its models cannot be determined");
            }
        }
        Ok(set)
    }

    /// Wait for the endpoint to settle on `config`
    async fn await_cutover(
        &self,
        endpoint: &str,
        config: &ConfigHandle,
        result: &mut ReconciliationResult,
    ) -> Result<(), Error> {
        let description = match self.wait_for_settle(endpoint).await? {
            Lookup::Found(d) => d,
            Lookup::NotFound => {
                return Err(Error::endpoint_failed(
                    endpoint,
                    "endpoint disappeared while settling",
                ))
            }
        };
        result.config_name = Some(description.config_name.clone());

        match description.status {
            EndpointStatus::InService if description.config_name == config.name => Ok(()),
            EndpointStatus::InService => Err(Error::endpoint_failed(
                endpoint,
                description.failure_reason.unwrap_or_else(|| {
                    format!("rolled back to config {}", description.config_name)
                }),
            )),
            status => Err(Error::endpoint_failed(
                endpoint,
                description
                    .failure_reason
                    .unwrap_or_else(|| format!("settled as {status}")),
            )),
        }
    }

    /// Delete the superseded configs and models, collecting failures
    async fn collect_superseded(
        &self,
        superseded: &[ResourceId],
        result: &mut ReconciliationResult,
    ) -> Vec<String> {
        let mut failures = Vec::new();
        // Configs before the models they reference
        let ordered = superseded
            .iter()
            .filter(|r| r.kind == ResourceKind::EndpointConfig)
            .chain(superseded.iter().filter(|r| r.kind == ResourceKind::Model));
        for resource in ordered {
            match self.delete_resource(resource).await {
                Ok(()) => {
                    info!(resource = %resource, "Deleted superseded resource");
                    result.deleted_resources.push(resource.clone());
                }
                Err(err) => {
                    warn!(resource = %resource, error = %err, "Failed to delete superseded resource");
                    failures.push(format!("{resource}: {err}"));
                }
            }
        }
        failures
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    async fn sweep_matching(
        &self,
        prefix: &str,
        matches: impl Fn(&ResourceName) -> bool,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let endpoints = self
            .owned_names(ResourceKind::Endpoint, prefix, &matches, &mut report)
            .await;
        let mut deleting = Vec::new();
        for name in endpoints {
            let resource = ResourceId::endpoint(name);
            match self.delete_resource(&resource).await {
                Ok(()) => deleting.push(resource),
                Err(err) => report.record_failure(resource, &err),
            }
        }
        for resource in deleting {
            match self.wait_deleted(&resource).await {
                Ok(()) => {
                    info!(resource = %resource, "Deleted");
                    report.deleted.push(resource);
                }
                Err(err) => report.record_failure(resource, &err),
            }
        }

        for kind in [ResourceKind::EndpointConfig, ResourceKind::Model] {
            for name in self.owned_names(kind, prefix, &matches, &mut report).await {
                let resource = ResourceId { kind, name };
                match self.delete_resource(&resource).await {
                    Ok(()) => {
                        info!(resource = %resource, "Deleted");
                        report.deleted.push(resource);
                    }
                    Err(err) => report.record_failure(resource, &err),
                }
            }
        }

        if report.is_clean() {
            info!(prefix, deleted = report.deleted.len(), "Sweep complete");
        } else {
            warn!(
                prefix,
                deleted = report.deleted.len(),
                failed = report.errors.len(),
                "Sweep incomplete"
            );
        }
        report
    }

    /// List `kind` under `prefix`, keeping names that parse as owned and match
    async fn owned_names(
        &self,
        kind: ResourceKind,
        prefix: &str,
        matches: &impl Fn(&ResourceName) -> bool,
        report: &mut SweepReport,
    ) -> Vec<String> {
        let raw = naming::list_prefix(prefix);
        let listed = match kind {
            ResourceKind::Endpoint => {
                self.call("list_endpoints", || self.adapter.list_endpoints(&raw))
                    .await
            }
            ResourceKind::EndpointConfig => {
                self.call("list_endpoint_configs", || {
                    self.adapter.list_endpoint_configs(&raw)
                })
                .await
            }
            ResourceKind::Model => {
                self.call("list_models", || self.adapter.list_models(&raw))
                    .await
            }
        };
        let names = match listed {
            Ok(names) => names,
            Err(err) => {
                warn!(%kind, prefix, error = %err, "Listing failed");
                report.record_failure(ResourceId { kind, name: raw }, &err);
                return Vec::new();
            }
        };
        names
            .into_iter()
            .filter(|name| match ResourceName::parse(name) {
                Ok(parsed) => parsed.owned_by(prefix) && matches(&parsed),
                Err(_) => {
                    debug!(%kind, name = %name, "Skipping name outside the naming convention");
                    false
                }
            })
            .collect()
    }

    // =========================================================================
    // Platform calls
    // =========================================================================

    /// Run an adapter call under the retry policy
    async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        retry_with_backoff(&self.retry, operation, f).await
    }

    async fn describe_endpoint(&self, name: &str) -> Result<Lookup<EndpointDescription>, Error> {
        self.call("describe_endpoint", || self.adapter.describe_endpoint(name))
            .await
    }

    /// Delete one resource; already-gone counts as deleted
    async fn delete_resource(&self, resource: &ResourceId) -> Result<(), Error> {
        let name = resource.name.as_str();
        let deleted = match resource.kind {
            ResourceKind::Endpoint => {
                self.call("delete_endpoint", || self.adapter.delete_endpoint(name))
                    .await
            }
            ResourceKind::EndpointConfig => {
                self.call("delete_endpoint_config", || {
                    self.adapter.delete_endpoint_config(name)
                })
                .await
            }
            ResourceKind::Model => {
                self.call("delete_model", || self.adapter.delete_model(name))
                    .await
            }
        };
        match deleted {
            Err(err) if err.is_not_found() => {
                debug!(resource = %resource, "Already deleted");
                Ok(())
            }
            other => other,
        }
    }

    /// Fail fast if the caller has cancelled
    fn checkpoint(&self, operation: &str) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled(operation));
        }
        Ok(())
    }

    /// Poll until the endpoint is terminal or gone, bounded and cancellable
    async fn wait_for_settle(&self, name: &str) -> Result<Lookup<EndpointDescription>, Error> {
        let timeout = self.config.settle_timeout();
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::cancelled(format!("waiting for endpoint {name} to settle")))
            }
            polled = tokio::time::timeout(timeout, self.poll_until_settled(name)) => {
                polled.unwrap_or_else(|_| {
                    Err(Error::timeout(format!("endpoint {name} to settle"), timeout))
                })
            }
        }
    }

    async fn poll_until_settled(&self, name: &str) -> Result<Lookup<EndpointDescription>, Error> {
        loop {
            match self.describe_endpoint(name).await? {
                Lookup::Found(d) if !d.status.is_terminal() => {
                    debug!(endpoint = %name, status = %d.status, "Waiting for endpoint to settle");
                }
                settled => return Ok(settled),
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Wait for a deleted resource to disappear, cancellable
    async fn wait_deleted(&self, resource: &ResourceId) -> Result<(), Error> {
        let timeout = self.config.delete_timeout();
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::cancelled(format!("waiting for {resource} to be deleted")))
            }
            waited = self.adapter.wait_until_deleted(resource.kind, &resource.name, timeout) => waited,
        }
    }
}

impl SweepReport {
    fn record_failure(&mut self, resource: ResourceId, err: &Error) {
        warn!(resource = %resource, error = %err, "Could not delete");
        self.errors.push(ResourceFailure {
            resource,
            error: ResultError::from(err),
        });
    }
}
