//! Domain types shared by the reconciler and platform adapters

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

// =============================================================================
// Resource identity
// =============================================================================

/// The three kinds of managed resource a deployment is composed of
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// Registered model (artifact + serving container)
    Model,
    /// Immutable binding of model variants to capacity
    EndpointConfig,
    /// Long-lived serving identity
    Endpoint,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::EndpointConfig => write!(f, "endpoint config"),
            Self::Endpoint => write!(f, "endpoint"),
        }
    }
}

/// A resource named by kind and platform name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource kind
    pub kind: ResourceKind,
    /// Platform name
    pub name: String,
}

impl ResourceId {
    /// Identify a model
    pub fn model(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Model,
            name: name.into(),
        }
    }

    /// Identify an endpoint config
    pub fn endpoint_config(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::EndpointConfig,
            name: name.into(),
        }
    }

    /// Identify an endpoint
    pub fn endpoint(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Endpoint,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

// =============================================================================
// Deployment inputs
// =============================================================================

/// Location of a trained model package, e.g. `s3://bucket/models/model.tar.gz`
///
/// Only the shape (`scheme://location`) is checked here. Whether anything
/// exists at that location is the platform adapter's call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactReference(String);

impl ArtifactReference {
    /// Parse and validate an artifact URI
    pub fn new(uri: impl Into<String>) -> Result<Self, Error> {
        let uri = uri.into();
        let (scheme, rest) = uri.split_once("://").ok_or_else(|| {
            Error::validation_for_field("artifact", format!("'{uri}' is not a scheme://location URI"))
        })?;
        let scheme_ok = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
        if !scheme_ok {
            return Err(Error::validation_for_field(
                "artifact",
                format!("'{uri}' has an invalid scheme"),
            ));
        }
        if rest.is_empty() || rest.chars().any(char::is_whitespace) {
            return Err(Error::validation_for_field(
                "artifact",
                format!("'{uri}' has an empty or malformed location"),
            ));
        }
        Ok(Self(uri))
    }

    /// The conventional artifact location inside a bucket
    pub fn in_bucket(bucket: &str) -> Result<Self, Error> {
        Self::new(format!("s3://{bucket}/{}", crate::DEFAULT_MODEL_KEY))
    }

    /// The full URI
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URI scheme (before `://`)
    pub fn scheme(&self) -> &str {
        self.0.split_once("://").map(|(s, _)| s).unwrap_or_default()
    }

    /// Everything after `://`
    pub fn location(&self) -> &str {
        self.0.split_once("://").map(|(_, l)| l).unwrap_or_default()
    }
}

impl TryFrom<String> for ArtifactReference {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactReference> for String {
    fn from(value: ArtifactReference) -> Self {
        value.0
    }
}

impl FromStr for ArtifactReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serving container a model runs in
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Inference container image
    pub image: String,
    /// Role the platform assumes to pull the artifact and image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_role: Option<String>,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: crate::DEFAULT_CONTAINER_IMAGE.to_string(),
            execution_role: None,
        }
    }
}

/// Environment passed to the serving container
pub type ContainerEnv = BTreeMap<String, String>;

/// Default environment: point the framework container at the inference entry point
pub fn default_container_env() -> ContainerEnv {
    BTreeMap::from([
        ("SAGEMAKER_PROGRAM".to_string(), "inference.py".to_string()),
        (
            "SAGEMAKER_SUBMIT_DIRECTORY".to_string(),
            "/opt/ml/model/code".to_string(),
        ),
    ])
}

/// Serverless memory sizes the platform accepts, in MB
pub const SERVERLESS_MEMORY_SIZES_MB: [u32; 6] = [1024, 2048, 3072, 4096, 5120, 6144];

/// Upper bound on serverless concurrency
pub const MAX_SERVERLESS_CONCURRENCY: u32 = 200;

/// Instance type used when `fixed:N` gives none
pub const DEFAULT_INSTANCE_TYPE: &str = "ml.t2.medium";

/// Desired serving capacity
///
/// The reconciler never interprets this; it is validated up front and then
/// handed to the platform with the endpoint config.
///
/// String forms accepted by [`FromStr`]:
/// - `serverless`, `serverless:CONCURRENCY`, `serverless:CONCURRENCY:MEMORY_MB`
///   (`elastic` is an alias)
/// - `fixed:COUNT`, `fixed:COUNT:INSTANCE_TYPE` (`provisioned` is an alias)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CapacitySpec {
    /// Elastic capacity with bounded concurrency
    Serverless {
        /// Memory per invocation worker
        memory_size_mb: u32,
        /// Maximum concurrent invocations
        max_concurrency: u32,
    },
    /// A fixed number of dedicated instances
    Provisioned {
        /// Instance type, e.g. `ml.m5.large`
        instance_type: String,
        /// Number of instances
        instance_count: u32,
    },
}

impl Default for CapacitySpec {
    fn default() -> Self {
        Self::Serverless {
            memory_size_mb: crate::DEFAULT_SERVERLESS_MEMORY_MB,
            max_concurrency: crate::DEFAULT_SERVERLESS_CONCURRENCY,
        }
    }
}

impl CapacitySpec {
    /// Check the capacity is a shape the platform can accept
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Serverless {
                memory_size_mb,
                max_concurrency,
            } => {
                if !SERVERLESS_MEMORY_SIZES_MB.contains(memory_size_mb) {
                    return Err(Error::validation_for_field(
                        "capacity.memorySizeMb",
                        format!(
                            "{memory_size_mb} MB is not one of {:?}",
                            SERVERLESS_MEMORY_SIZES_MB
                        ),
                    ));
                }
                if *max_concurrency == 0 || *max_concurrency > MAX_SERVERLESS_CONCURRENCY {
                    return Err(Error::validation_for_field(
                        "capacity.maxConcurrency",
                        format!(
                            "must be between 1 and {MAX_SERVERLESS_CONCURRENCY}, got {max_concurrency}"
                        ),
                    ));
                }
            }
            Self::Provisioned {
                instance_type,
                instance_count,
            } => {
                if instance_type.trim().is_empty() {
                    return Err(Error::validation_for_field(
                        "capacity.instanceType",
                        "instance type must not be empty",
                    ));
                }
                if *instance_count == 0 {
                    return Err(Error::validation_for_field(
                        "capacity.instanceCount",
                        "must be at least 1",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn parse_count(field: &str, value: &str) -> Result<u32, Error> {
    value.parse::<u32>().map_err(|_| {
        Error::validation_for_field(field, format!("'{value}' is not a non-negative integer"))
    })
}

impl FromStr for CapacitySpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let spec = match parts.as_slice() {
            [mode] if is_serverless(mode) => Self::default(),
            [mode, concurrency] if is_serverless(mode) => Self::Serverless {
                memory_size_mb: crate::DEFAULT_SERVERLESS_MEMORY_MB,
                max_concurrency: parse_count("capacity.maxConcurrency", concurrency)?,
            },
            [mode, concurrency, memory] if is_serverless(mode) => Self::Serverless {
                memory_size_mb: parse_count("capacity.memorySizeMb", memory)?,
                max_concurrency: parse_count("capacity.maxConcurrency", concurrency)?,
            },
            [mode, count] if is_provisioned(mode) => Self::Provisioned {
                instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
                instance_count: parse_count("capacity.instanceCount", count)?,
            },
            [mode, count, instance_type] if is_provisioned(mode) => Self::Provisioned {
                instance_type: instance_type.to_string(),
                instance_count: parse_count("capacity.instanceCount", count)?,
            },
            _ => {
                return Err(Error::validation_for_field(
                    "capacity",
                    format!(
                        "invalid capacity '{s}', expected serverless[:CONCURRENCY[:MEMORY_MB]] or fixed:COUNT[:INSTANCE_TYPE]"
                    ),
                ))
            }
        };
        spec.validate()?;
        Ok(spec)
    }
}

fn is_serverless(mode: &str) -> bool {
    matches!(mode, "serverless" | "elastic")
}

fn is_provisioned(mode: &str) -> bool {
    matches!(mode, "fixed" | "provisioned")
}

impl fmt::Display for CapacitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serverless {
                memory_size_mb,
                max_concurrency,
            } => write!(f, "serverless:{max_concurrency}:{memory_size_mb}"),
            Self::Provisioned {
                instance_type,
                instance_count,
            } => write!(f, "fixed:{instance_count}:{instance_type}"),
        }
    }
}

// =============================================================================
// Platform handles and descriptions
// =============================================================================

/// Name of the single variant every config is created with
pub const PRIMARY_VARIANT: &str = "primary";

/// A created model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHandle {
    /// Platform name
    pub name: String,
}

/// A created endpoint config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigHandle {
    /// Platform name
    pub name: String,
}

/// A created endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointHandle {
    /// Platform name
    pub name: String,
}

/// One (model, capacity) binding inside an endpoint config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionVariant {
    /// Variant name, used by metrics dimensions
    pub variant_name: String,
    /// Model serving this variant
    pub model_name: String,
    /// Capacity for this variant
    pub capacity: CapacitySpec,
}

impl ProductionVariant {
    /// The single `primary` variant for a model
    pub fn primary(model: &ModelHandle, capacity: CapacitySpec) -> Self {
        Self {
            variant_name: PRIMARY_VARIANT.to_string(),
            model_name: model.name.clone(),
            capacity,
        }
    }
}

/// Endpoint lifecycle states as reported by the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    /// Being created
    Creating,
    /// Switching to a new config
    Updating,
    /// Serving traffic
    InService,
    /// Not serving traffic
    OutOfService,
    /// Being deleted
    Deleting,
    /// Creation or update failed
    Failed,
}

impl EndpointStatus {
    /// Whether the endpoint has settled (no transition in flight)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InService | Self::Failed | Self::OutOfService)
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "Creating",
            Self::Updating => "Updating",
            Self::InService => "InService",
            Self::OutOfService => "OutOfService",
            Self::Deleting => "Deleting",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// What the platform reports about an endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescription {
    /// Platform name
    pub name: String,
    /// Current lifecycle state
    pub status: EndpointStatus,
    /// Config the endpoint currently references
    pub config_name: String,
    /// Why the last transition failed, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// What the platform reports about an endpoint config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfigDescription {
    /// Platform name
    pub name: String,
    /// Variants bound by this config
    pub variants: Vec<ProductionVariant>,
}

impl EndpointConfigDescription {
    /// Names of every model the config references, deduplicated, in order
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for v in &self.variants {
            if !names.contains(&v.model_name) {
                names.push(v.model_name.clone());
            }
        }
        names
    }
}

// =============================================================================
// Results
// =============================================================================

/// Terminal outcome of a reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    /// The endpoint is in service on the desired artifact
    Success,
    /// The endpoint is not serving the desired artifact
    Failed,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Serializable error record carried in results
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    /// Taxonomy bucket
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
}

impl From<&Error> for ResultError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Outcome record of one `reconcile` call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    /// Logical identity the caller asked for
    pub endpoint_identity: String,
    /// Platform name of the endpoint
    pub endpoint_name: String,
    /// Terminal outcome
    pub final_status: FinalStatus,
    /// Config the endpoint references after the call, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    /// Resources this call created, in creation order
    pub created_resources: Vec<ResourceId>,
    /// Resources this call deleted, in deletion order
    pub deleted_resources: Vec<ResourceId>,
    /// Failure, or cleanup problems after a successful cutover
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl ReconciliationResult {
    /// Start a result for an in-flight reconciliation
    pub fn begin(identity: impl Into<String>, endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_identity: identity.into(),
            endpoint_name: endpoint_name.into(),
            final_status: FinalStatus::Failed,
            config_name: None,
            created_resources: Vec::new(),
            deleted_resources: Vec::new(),
            error: None,
        }
    }

    /// Whether the endpoint ended up serving the desired artifact
    pub fn is_success(&self) -> bool {
        self.final_status == FinalStatus::Success
    }

    /// Whether anything needs attention (failure or incomplete cleanup)
    pub fn is_clean(&self) -> bool {
        self.is_success() && self.error.is_none()
    }

    /// Resources created by a failed call that were left in place
    pub fn orphaned(&self) -> &[ResourceId] {
        if self.is_success() {
            &[]
        } else {
            &self.created_resources
        }
    }

    /// Created resources of one kind
    pub fn created_of(&self, kind: ResourceKind) -> Vec<&ResourceId> {
        self.created_resources
            .iter()
            .filter(|r| r.kind == kind)
            .collect()
    }
}

/// A resource a sweep could not remove
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    /// The resource, or the kind being listed when listing failed
    pub resource: ResourceId,
    /// What went wrong
    pub error: ResultError,
}

/// Outcome of a sweep or teardown
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Resources removed, in deletion order
    pub deleted: Vec<ResourceId>,
    /// Resources that could not be listed or removed
    pub errors: Vec<ResourceFailure>,
}

impl SweepReport {
    /// True when every matching resource was removed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Point-in-time health of one endpoint identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHealth {
    /// Logical identity
    pub endpoint_identity: String,
    /// Platform name of the endpoint
    pub endpoint_name: String,
    /// Lifecycle state; `None` when the endpoint does not exist
    pub status: Option<EndpointStatus>,
    /// Current config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    /// Variants of the current config
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<ProductionVariant>,
    /// Failure reason reported by the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl EndpointHealth {
    /// Whether the endpoint exists and serves traffic
    pub fn is_healthy(&self) -> bool {
        self.status == Some(EndpointStatus::InService)
    }
}
