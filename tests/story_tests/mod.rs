//! Shared fixtures for reconciler stories

mod reconcile;
mod sweep;

use std::sync::Arc;

use endpoint_reconciler::adapter::MemoryPlatform;
use endpoint_reconciler::config::ReconcilerConfig;
use endpoint_reconciler::reconciler::Reconciler;
use endpoint_reconciler::types::{ArtifactReference, CapacitySpec};

/// Endpoint name for identity `ep1` under the default prefix
pub const SEEDED_ENDPOINT: &str = "mlops-ep1";

/// Config and model name of the pre-existing deployment
pub const SEEDED_SET: &str = "mlops-ep1-20240101000000-00000001";

/// Config with millisecond polling and short bounds
pub fn fast_config() -> ReconcilerConfig {
    let mut config = ReconcilerConfig {
        poll_interval_ms: 1,
        settle_timeout_secs: 2,
        delete_timeout_secs: 2,
        ..Default::default()
    };
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config
}

pub fn platform() -> Arc<MemoryPlatform> {
    Arc::new(MemoryPlatform::new())
}

pub fn reconciler(platform: &Arc<MemoryPlatform>) -> Reconciler {
    Reconciler::new(platform.clone(), fast_config())
}

pub fn reconciler_with(platform: &Arc<MemoryPlatform>, config: ReconcilerConfig) -> Reconciler {
    Reconciler::new(platform.clone(), config)
}

/// An artifact that exists on the platform
pub fn uploaded(platform: &MemoryPlatform, uri: &str) -> ArtifactReference {
    let artifact = ArtifactReference::new(uri).unwrap();
    platform.register_artifact(&artifact);
    artifact
}

pub fn fixed(count: u32) -> CapacitySpec {
    format!("fixed:{count}").parse().unwrap()
}

/// Seed an in-service `mlops-ep1` on [`SEEDED_SET`]
pub fn seed(platform: &MemoryPlatform) {
    let artifact = uploaded(platform, "s3://bucket/old.tar.gz");
    platform.seed_deployment(
        SEEDED_ENDPOINT,
        SEEDED_SET,
        SEEDED_SET,
        &artifact,
        CapacitySpec::default(),
    );
}
