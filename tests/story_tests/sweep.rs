//! Sweep and teardown stories: dependency order, idempotence, ownership

use endpoint_reconciler::adapter::{Fault, Operation, ResourceAdapter, SettleOutcome};
use endpoint_reconciler::config::ReconcilerConfig;
use endpoint_reconciler::error::ErrorKind;
use endpoint_reconciler::types::{CapacitySpec, ResourceKind};
use endpoint_reconciler::Error;

use super::*;

// =============================================================================
// Story: sweeping a prefix
// =============================================================================

#[tokio::test]
async fn story_sweep_deletes_in_dependency_order_and_second_sweep_is_empty() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    let r = reconciler(&platform);
    r.reconcile(&artifact, "ep1", &fixed(1)).await.unwrap();
    r.reconcile(&artifact, "ep2", &fixed(1)).await.unwrap();

    let first = r.sweep("mlops").await.unwrap();
    assert!(first.is_clean());
    let kinds: Vec<ResourceKind> = first.deleted.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::Endpoint,
            ResourceKind::Endpoint,
            ResourceKind::EndpointConfig,
            ResourceKind::EndpointConfig,
            ResourceKind::Model,
            ResourceKind::Model,
        ]
    );

    let state = platform.snapshot();
    assert!(state.endpoints.is_empty());
    assert!(state.configs.is_empty());
    assert!(state.models.is_empty());

    let second = r.sweep("mlops").await.unwrap();
    assert!(second.deleted.is_empty());
    assert!(second.is_clean());
}

#[tokio::test]
async fn story_sweep_leaves_other_prefixes_alone() {
    let platform = platform();
    seed(&platform);
    let foreign = uploaded(&platform, "s3://other/a.tar.gz");
    platform.seed_deployment(
        "other-ep1",
        "other-ep1-20240101000000-00000001",
        "other-ep1-20240101000000-00000001",
        &foreign,
        CapacitySpec::default(),
    );

    let report = reconciler(&platform).sweep("mlops").await.unwrap();

    assert_eq!(report.deleted.len(), 3);
    assert!(platform.endpoint("other-ep1").is_some());
    assert!(platform.has_config("other-ep1-20240101000000-00000001"));
    assert!(platform.has_model("other-ep1-20240101000000-00000001"));
}

#[tokio::test]
async fn story_sweep_collects_the_orphans_of_a_failed_deploy() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    platform.push_settle_outcome(SettleOutcome::Failed("image pull failed".into()));
    let r = reconciler(&platform);

    let failed = r.reconcile(&artifact, "ep1", &fixed(1)).await.unwrap();
    assert_eq!(failed.orphaned().len(), 3);

    let report = r.sweep("mlops").await.unwrap();
    assert!(report.is_clean());
    let mut deleted = report.deleted.clone();
    let mut orphaned = failed.orphaned().to_vec();
    deleted.sort();
    orphaned.sort();
    assert_eq!(deleted, orphaned);
}

#[tokio::test]
async fn story_sweep_aggregates_per_resource_errors() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    let r = reconciler(&platform);
    r.reconcile(&artifact, "ep1", &fixed(1)).await.unwrap();
    r.reconcile(&artifact, "ep2", &fixed(1)).await.unwrap();
    platform.inject_fault(Operation::DeleteModel, Fault::Permanent("AccessDenied".into()));

    let report = r.sweep("mlops").await.unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].resource.kind, ResourceKind::Model);
    assert_eq!(report.errors[0].error.kind, ErrorKind::PermanentPlatformError);
    assert_eq!(report.deleted.len(), 5);
    assert_eq!(platform.snapshot().models.len(), 1);
}

#[tokio::test]
async fn story_stalled_endpoint_deletion_times_out_and_dependents_stay_in_use() {
    let platform = platform();
    seed(&platform);
    platform.set_settle_ticks(u32::MAX);
    let config = ReconcilerConfig {
        delete_timeout_secs: 1,
        ..fast_config()
    };

    let report = reconciler_with(&platform, config)
        .sweep("mlops")
        .await
        .unwrap();

    assert!(report.deleted.is_empty());
    let kinds: Vec<(ResourceKind, ErrorKind)> = report
        .errors
        .iter()
        .map(|f| (f.resource.kind, f.error.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (ResourceKind::Endpoint, ErrorKind::Timeout),
            (ResourceKind::EndpointConfig, ErrorKind::ResourceInUse),
            (ResourceKind::Model, ErrorKind::ResourceInUse),
        ]
    );
}

// =============================================================================
// Story: tearing down one identity
// =============================================================================

#[tokio::test]
async fn story_teardown_removes_only_that_identity() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    let r = reconciler(&platform);
    let kept = r.reconcile(&artifact, "ep10", &fixed(1)).await.unwrap();
    r.reconcile(&artifact, "ep1", &fixed(1)).await.unwrap();

    let report = r.teardown("ep1").await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.deleted.len(), 3);
    assert!(report.deleted.iter().all(|d| !d.name.starts_with("mlops-ep10")));
    assert!(platform.endpoint("mlops-ep10").is_some());
    for created in &kept.created_resources {
        match created.kind {
            ResourceKind::Model => assert!(platform.has_model(&created.name)),
            ResourceKind::EndpointConfig => assert!(platform.has_config(&created.name)),
            ResourceKind::Endpoint => assert!(platform.endpoint(&created.name).is_some()),
        }
    }
}

#[tokio::test]
async fn story_teardown_of_unknown_identity_is_a_clean_no_op() {
    let platform = platform();
    seed(&platform);

    let report = reconciler(&platform).teardown("nothing").await.unwrap();

    assert!(report.is_clean());
    assert!(report.deleted.is_empty());
    assert!(platform.endpoint(SEEDED_ENDPOINT).is_some());
}

// =============================================================================
// Story: the platform enforces dependency order
// =============================================================================

#[tokio::test]
async fn story_deleting_a_referenced_config_fails_loudly() {
    let platform = platform();
    seed(&platform);

    let err = platform.delete_endpoint_config(SEEDED_SET).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ResourceInUse {
            kind: ResourceKind::EndpointConfig,
            ..
        }
    ));
    let err = platform.delete_model(SEEDED_SET).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceInUse);
    assert!(platform.has_config(SEEDED_SET));
    assert!(platform.has_model(SEEDED_SET));
}

#[tokio::test]
async fn story_deleting_what_is_already_gone_succeeds() {
    let platform = platform();
    let r = reconciler(&platform);

    platform.delete_model("mlops-ep1-20240101000000-00000001").await.unwrap();
    platform.delete_endpoint(SEEDED_ENDPOINT).await.unwrap();
    let report = r.sweep("mlops").await.unwrap();
    assert!(report.is_clean());
    assert!(report.deleted.is_empty());
}

#[tokio::test]
async fn story_invalid_sweep_prefix_is_rejected() {
    let platform = platform();
    let err = reconciler(&platform).sweep("Not-A-Prefix").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(platform.calls(Operation::ListEndpoints), 0);
}
