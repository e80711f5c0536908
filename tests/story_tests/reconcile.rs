//! Reconcile stories: creation, update, idempotence, and the failure paths

use std::time::Duration;

use endpoint_reconciler::adapter::{Fault, Operation, ResourceAdapter, SettleOutcome};
use endpoint_reconciler::error::ErrorKind;
use endpoint_reconciler::types::{
    CapacitySpec, ConfigHandle, ContainerEnv, ContainerSpec, EndpointStatus, FinalStatus,
    ProductionVariant, ResourceId, ResourceKind,
};
use tokio_util::sync::CancellationToken;

use super::*;

// =============================================================================
// Story: first deploy on an empty platform
// =============================================================================

#[tokio::test]
async fn story_no_endpoint_exists_then_model_config_and_endpoint_are_created() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert_eq!(result.final_status, FinalStatus::Success);
    assert!(result.error.is_none());
    assert!(result.deleted_resources.is_empty());
    let kinds: Vec<ResourceKind> = result.created_resources.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::Model,
            ResourceKind::EndpointConfig,
            ResourceKind::Endpoint
        ]
    );

    let endpoint = platform.endpoint("mlops-ep1").unwrap();
    assert_eq!(endpoint.status, EndpointStatus::InService);
    assert_eq!(Some(endpoint.config_name), result.config_name);
}

#[tokio::test]
async fn story_new_model_carries_artifact_container_and_environment() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &CapacitySpec::default())
        .await
        .unwrap();

    let model_name = &result.created_of(ResourceKind::Model)[0].name;
    let state = platform.snapshot();
    let model = &state.models[model_name];
    assert_eq!(model.artifact, artifact);
    assert_eq!(model.container.image, endpoint_reconciler::DEFAULT_CONTAINER_IMAGE);
    assert_eq!(
        model.env.get("SAGEMAKER_PROGRAM").map(String::as_str),
        Some("inference.py")
    );
    let config = &state.configs[model_name];
    assert_eq!(config.variants[0].variant_name, "primary");
    assert_eq!(config.variants[0].capacity, CapacitySpec::default());
}

// =============================================================================
// Story: idempotence
// =============================================================================

#[tokio::test]
async fn story_two_identical_reconciles_leave_one_live_set() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    let r = reconciler(&platform);

    let first = r.reconcile(&artifact, "ep1", &fixed(1)).await.unwrap();
    let second = r.reconcile(&artifact, "ep1", &fixed(1)).await.unwrap();

    assert!(first.is_clean());
    assert!(second.is_clean());

    // The second call created a fresh pair and removed the first call's pair
    let first_config = first.created_of(ResourceKind::EndpointConfig)[0].clone();
    let first_model = first.created_of(ResourceKind::Model)[0].clone();
    assert_eq!(second.deleted_resources, vec![first_config, first_model]);
    assert!(second.created_of(ResourceKind::Endpoint).is_empty());

    let state = platform.snapshot();
    assert_eq!(state.endpoints.len(), 1);
    assert_eq!(state.configs.len(), 1);
    assert_eq!(state.models.len(), 1);
    assert_eq!(
        Some(state.endpoints["mlops-ep1"].config_name.clone()),
        second.config_name
    );
}

// =============================================================================
// Story: updating an existing endpoint
// =============================================================================

#[tokio::test]
async fn story_existing_endpoint_update_deletes_exactly_the_seeded_set() {
    let platform = platform();
    seed(&platform);
    let artifact = uploaded(&platform, "s3://bucket/new.tar.gz");

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert!(result.is_clean());
    assert_eq!(
        result.deleted_resources,
        vec![
            ResourceId::endpoint_config(SEEDED_SET),
            ResourceId::model(SEEDED_SET)
        ]
    );
    let new_config = result.created_of(ResourceKind::EndpointConfig)[0].name.clone();
    let endpoint = platform.endpoint(SEEDED_ENDPOINT).unwrap();
    assert_eq!(endpoint.config_name, new_config);
    assert!(!platform.has_config(SEEDED_SET));
    assert!(!platform.has_model(SEEDED_SET));
}

#[tokio::test]
async fn story_endpoint_mid_transition_is_waited_on_before_deploying() {
    let platform = platform();
    seed(&platform);
    let artifact = uploaded(&platform, "s3://bucket/new.tar.gz");

    // Someone else's update is still in flight
    let other = "mlops-ep1-20240102000000-00000002";
    let model = platform
        .create_model(other, &artifact, &ContainerSpec::default(), &ContainerEnv::new())
        .await
        .unwrap();
    platform
        .create_endpoint_config(other, &[ProductionVariant::primary(&model, fixed(1))])
        .await
        .unwrap();
    platform
        .update_endpoint(SEEDED_ENDPOINT, &ConfigHandle { name: other.into() })
        .await
        .unwrap();

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert!(result.is_clean());
    assert_eq!(
        result.deleted_resources,
        vec![ResourceId::endpoint_config(other), ResourceId::model(other)]
    );
}

#[tokio::test]
async fn story_resources_outside_the_prefix_are_never_deleted() {
    let platform = platform();
    let old = uploaded(&platform, "s3://bucket/old.tar.gz");
    platform.seed_deployment(
        SEEDED_ENDPOINT,
        "handmadeconfig",
        "handmadeconfig",
        &old,
        CapacitySpec::default(),
    );
    let artifact = uploaded(&platform, "s3://bucket/new.tar.gz");

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert!(result.is_clean());
    assert!(result.deleted_resources.is_empty());
    assert!(platform.has_config("handmadeconfig"));
    assert!(platform.has_model("handmadeconfig"));
}

// =============================================================================
// Story: settle failure leaves the previous deployment serving
// =============================================================================

#[tokio::test]
async fn story_settle_failure_keeps_previous_endpoint_on_original_config() {
    let platform = platform();
    seed(&platform);
    let artifact = uploaded(&platform, "s3://bucket/bad.tar.gz");
    platform.push_settle_outcome(SettleOutcome::Failed("health check failed".into()));

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert_eq!(result.final_status, FinalStatus::Failed);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::EndpointFailed);
    assert!(error.message.contains("health check failed"));

    // New pair is reported and left in place
    assert_eq!(result.created_resources.len(), 2);
    for created in &result.created_resources {
        match created.kind {
            ResourceKind::Model => assert!(platform.has_model(&created.name)),
            ResourceKind::EndpointConfig => assert!(platform.has_config(&created.name)),
            ResourceKind::Endpoint => panic!("endpoint already existed"),
        }
    }
    assert!(result.deleted_resources.is_empty());

    // Previous deployment untouched and serving
    let endpoint = platform.endpoint(SEEDED_ENDPOINT).unwrap();
    assert_eq!(endpoint.status, EndpointStatus::InService);
    assert_eq!(endpoint.config_name, SEEDED_SET);
    assert_eq!(result.config_name.as_deref(), Some(SEEDED_SET));
    assert!(platform.has_config(SEEDED_SET));
    assert!(platform.has_model(SEEDED_SET));
}

#[tokio::test]
async fn story_failed_first_deploy_reports_all_three_resources() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    platform.push_settle_outcome(SettleOutcome::Failed("capacity unavailable".into()));

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &CapacitySpec::default())
        .await
        .unwrap();

    assert!(!result.is_success());
    assert_eq!(result.orphaned().len(), 3);
    assert_eq!(
        platform.endpoint(SEEDED_ENDPOINT).unwrap().status,
        EndpointStatus::Failed
    );
}

// =============================================================================
// Story: retries and cleanup failures
// =============================================================================

#[tokio::test]
async fn story_transient_cleanup_errors_are_retried_then_succeed() {
    let platform = platform();
    seed(&platform);
    let artifact = uploaded(&platform, "s3://bucket/new.tar.gz");
    platform.inject_faults(
        Operation::DeleteEndpointConfig,
        Fault::Transient("ThrottlingException".into()),
        2,
    );

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert!(result.is_clean());
    assert_eq!(platform.calls(Operation::DeleteEndpointConfig), 3);
    assert!(!platform.has_config(SEEDED_SET));
}

#[tokio::test]
async fn story_persistent_throttling_on_cleanup_gives_up_after_bounded_attempts() {
    let platform = platform();
    seed(&platform);
    let artifact = uploaded(&platform, "s3://bucket/new.tar.gz");
    platform.inject_faults(
        Operation::DeleteEndpointConfig,
        Fault::Transient("ThrottlingException".into()),
        10_000,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        reconciler(&platform).reconcile(&artifact, "ep1", &fixed(1)),
    )
    .await
    .expect("reconcile should finish once retries run out")
    .unwrap();

    assert_eq!(result.final_status, FinalStatus::Success);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::PartialFailure);
    assert_eq!(
        platform.calls(Operation::DeleteEndpointConfig),
        endpoint_reconciler::DEFAULT_RETRY_ATTEMPTS as usize
    );
    assert!(platform.has_config(SEEDED_SET));
}

#[tokio::test]
async fn story_transient_describe_errors_do_not_fail_the_deploy() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    platform.inject_faults(
        Operation::DescribeEndpoint,
        Fault::Transient("connection reset".into()),
        3,
    );

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert!(result.is_clean());
}

#[tokio::test]
async fn story_permanent_cleanup_error_is_partial_failure_without_revert() {
    let platform = platform();
    seed(&platform);
    let artifact = uploaded(&platform, "s3://bucket/new.tar.gz");
    platform.inject_fault(Operation::DeleteModel, Fault::Permanent("AccessDenied".into()));

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert_eq!(result.final_status, FinalStatus::Success);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::PartialFailure);
    assert_eq!(
        result.deleted_resources,
        vec![ResourceId::endpoint_config(SEEDED_SET)]
    );
    assert!(platform.has_model(SEEDED_SET));
    assert_eq!(platform.calls(Operation::DeleteModel), 1);

    let new_config = result.created_of(ResourceKind::EndpointConfig)[0].name.clone();
    assert_eq!(platform.endpoint(SEEDED_ENDPOINT).unwrap().config_name, new_config);
}

// =============================================================================
// Story: bounded and cancellable waits
// =============================================================================

#[tokio::test]
async fn story_settle_timeout_fails_and_reports_created_resources() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    platform.set_settle_ticks(u32::MAX);
    let config = endpoint_reconciler::config::ReconcilerConfig {
        settle_timeout_secs: 1,
        ..fast_config()
    };

    let result = reconciler_with(&platform, config)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert_eq!(result.final_status, FinalStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Timeout);
    assert_eq!(result.created_resources.len(), 3);
}

#[tokio::test]
async fn story_cancellation_stops_the_settle_wait() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    platform.set_settle_ticks(u32::MAX);
    let token = CancellationToken::new();
    let r = reconciler(&platform).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let result = r.reconcile(&artifact, "ep1", &fixed(1)).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(result.final_status, FinalStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(result.created_resources.len(), 3);
}

// =============================================================================
// Story: fail fast
// =============================================================================

#[tokio::test]
async fn story_missing_artifact_creates_nothing() {
    let platform = platform();
    let artifact = endpoint_reconciler::types::ArtifactReference::new("s3://bucket/missing.tar.gz")
        .unwrap();

    let result = reconciler(&platform)
        .reconcile(&artifact, "ep1", &fixed(1))
        .await
        .unwrap();

    assert_eq!(result.error.unwrap().kind, ErrorKind::ArtifactNotFound);
    assert!(result.created_resources.is_empty());
    assert_eq!(platform.calls(Operation::CreateModel), 0);
}

#[tokio::test]
async fn story_invalid_capacity_is_an_error_not_a_result() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    let capacity = CapacitySpec::Provisioned {
        instance_type: "ml.m5.large".into(),
        instance_count: 0,
    };

    let err = reconciler(&platform)
        .reconcile(&artifact, "ep1", &capacity)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(platform.calls(Operation::ArtifactExists), 0);
}

// =============================================================================
// Story: status
// =============================================================================

#[tokio::test]
async fn story_status_reports_live_config_and_models() {
    let platform = platform();
    let artifact = uploaded(&platform, "s3://bucket/a.tar.gz");
    let r = reconciler(&platform);
    let result = r.reconcile(&artifact, "ep1", &fixed(2)).await.unwrap();

    let health = r.status("ep1").await.unwrap();
    assert!(health.is_healthy());
    assert_eq!(health.config_name, result.config_name);
    assert_eq!(
        health.variants[0].model_name,
        result.created_of(ResourceKind::Model)[0].name
    );
    assert_eq!(health.variants[0].capacity, fixed(2));

    let missing = r.status("ep2").await.unwrap();
    assert_eq!(missing.status, None);
    assert!(!missing.is_healthy());
}
