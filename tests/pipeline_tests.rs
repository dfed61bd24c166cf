//! End-to-end tests for the invocation pipeline with in-memory collaborators.

mod common;

use common::*;
use soci_index_builder::{
    BuildStrategy, Error, Outcome, Pipeline, Skip, Stage, TIMEOUT_MESSAGE,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn pipeline(
    work_root: &TempDir,
    strategy: BuildStrategy,
    registry: &FakeConnector,
    builder: &FakeBuilder,
) -> Pipeline {
    Pipeline::with_parts(
        test_config(work_root.path(), strategy),
        Arc::new(registry.clone()),
        Arc::new(builder.clone()),
    )
}

fn workspace_count(work_root: &TempDir) -> usize {
    std::fs::read_dir(work_root.path()).unwrap().count()
}

// =============================================================================
// Success Tests
// =============================================================================

#[tokio::test]
async fn test_legacy_build_and_push() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::new(BuilderMode::Records(1));
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-a")).await;

    let (message, error) = outcome.into_reply();
    assert_eq!(message, "Successfully built and pushed SOCI index");
    assert!(error.is_none());

    let log = registry.log();
    assert_eq!(log.pulls, 1);
    assert_eq!(log.pushes, 1);
    assert_eq!(log.tags, vec![None]);
    assert_eq!(
        log.registry_urls,
        vec!["123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string()]
    );
    assert_eq!(workspace_count(&work_root), 0, "workspace must be released");
}

#[tokio::test]
async fn test_legacy_pushes_newest_record() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::new(BuilderMode::Records(3));
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-newest")).await;
    assert!(matches!(outcome, Outcome::Success));

    let newest = builder.log().written.last().cloned().unwrap();
    assert_eq!(registry.log().pushed, vec![newest]);
}

#[tokio::test]
async fn test_converted_build_pushes_with_derived_tag() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Converted, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-b")).await;

    assert!(matches!(outcome, Outcome::Success));
    assert_eq!(builder.log().converts, 1);
    assert_eq!(builder.log().builds, 0);
    assert_eq!(registry.log().tags, vec![Some("latest-soci".to_string())]);
}

#[tokio::test]
async fn test_china_region_registry_url() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let mut event = push_event("latest");
    event.region = "cn-north-1".to_string();
    pipeline.handle(&event, invocation("req-cn")).await;

    assert_eq!(
        registry.log().registry_urls,
        vec!["123456789012.dkr.ecr.cn-north-1.amazonaws.com.cn".to_string()]
    );
}

// =============================================================================
// Validation Tests
// =============================================================================

#[tokio::test]
async fn test_short_account_rejected_without_registry_calls() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let mut event = push_event("latest");
    event.account = "12345".to_string();
    let outcome = pipeline.handle(&event, invocation("req-c")).await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            stage: Stage::Validation,
            error: Error::InvalidEvent(_)
        }
    ));
    let (message, error) = outcome.into_reply();
    assert_eq!(message, "ECRImageActionEvent validation error");
    assert!(error.is_none(), "validation failures are not retried");
    assert_eq!(registry.registry_calls(), 0);
    assert_eq!(builder.log().builds, 0);
    assert_eq!(workspace_count(&work_root), 0);
}

#[tokio::test]
async fn test_wrong_source_rejected() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let mut event = push_event("latest");
    event.source = "aws.s3".to_string();
    let outcome = pipeline.handle(&event, invocation("req-src")).await;

    assert!(matches!(outcome, Outcome::Failed { stage: Stage::Validation, .. }));
    assert_eq!(registry.registry_calls(), 0);
}

// =============================================================================
// Benign Skip Tests
// =============================================================================

#[tokio::test]
async fn test_already_processed_skips_all_work() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::new(RegistryBehavior {
        idempotency: IdempotencyAnswer::AlreadyProcessed,
        ..Default::default()
    });
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-idem")).await;

    assert!(matches!(outcome, Outcome::Skipped(Skip::AlreadyProcessed)));
    let log = registry.log();
    assert_eq!(log.idempotency_checks, 1);
    assert_eq!(log.pulls, 0);
    assert_eq!(log.pushes, 0);
    assert_eq!(builder.log().builds, 0);
    assert_eq!(workspace_count(&work_root), 0, "no workspace is created");
}

#[tokio::test]
async fn test_manifest_validation_error_is_benign() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::new(RegistryBehavior {
        idempotency: IdempotencyAnswer::Unsupported,
        ..Default::default()
    });
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-unsup")).await;

    let (message, error) = outcome.into_reply();
    assert_eq!(message, "Exited early due to manifest validation error");
    assert!(error.is_none());
    assert_eq!(registry.log().pulls, 0);
}

#[tokio::test]
async fn test_converted_without_tag_skips_before_build() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Converted, &registry, &builder);

    let outcome = pipeline.handle(&push_event(""), invocation("req-notag")).await;

    assert!(matches!(outcome, Outcome::Skipped(Skip::UntaggedConversion)));
    assert_eq!(registry.log().pulls, 0);
    assert_eq!(builder.log().converts, 0);
    assert_eq!(workspace_count(&work_root), 0);
}

#[tokio::test]
async fn test_legacy_without_tag_proceeds() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event(""), invocation("req-legacy-notag")).await;

    assert!(matches!(outcome, Outcome::Success));
}

#[tokio::test]
async fn test_empty_index_skips_push() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::new(BuilderMode::Empty);
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-empty")).await;

    assert!(matches!(outcome, Outcome::Skipped(Skip::EmptyIndex)));
    assert!(!outcome.is_retryable());
    assert_eq!(registry.log().pulls, 1);
    assert_eq!(registry.log().pushes, 0);
    assert_eq!(workspace_count(&work_root), 0);
}

// =============================================================================
// Infrastructure Failure Tests
// =============================================================================

#[tokio::test]
async fn test_registry_init_failure() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::new(RegistryBehavior {
        fail_connect: true,
        ..Default::default()
    });
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-init")).await;

    let (message, error) = outcome.into_reply();
    assert_eq!(message, "Remote registry initialization error");
    assert!(matches!(error, Some(Error::RegistryAuthFailed { .. })));
}

#[tokio::test]
async fn test_pull_failure_releases_workspace() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::new(RegistryBehavior {
        fail_pull: true,
        ..Default::default()
    });
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-pull")).await;

    assert!(matches!(outcome, Outcome::Failed { stage: Stage::Pull, .. }));
    assert!(outcome.is_retryable());
    assert_eq!(builder.log().builds, 0);
    assert_eq!(workspace_count(&work_root), 0);
}

#[tokio::test]
async fn test_build_failure() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::new(BuilderMode::Fail);
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-build")).await;

    let (message, error) = outcome.into_reply();
    assert_eq!(message, "SOCI index build error");
    assert!(matches!(error, Some(Error::BuildFailed(_))));
    assert_eq!(registry.log().pushes, 0);
}

#[tokio::test]
async fn test_missing_index_records_is_build_failure() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::new(BuilderMode::Records(0));
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-norec")).await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            stage: Stage::Build,
            error: Error::NoIndexRecords { .. }
        }
    ));
}

#[tokio::test]
async fn test_push_failure() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::new(RegistryBehavior {
        fail_push: true,
        ..Default::default()
    });
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-push")).await;

    let (message, error) = outcome.into_reply();
    assert_eq!(message, "SOCI index push error");
    assert!(error.is_some());
    assert_eq!(workspace_count(&work_root), 0);
}

#[tokio::test]
async fn test_tag_failure_reported_as_tag_stage() {
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::new(RegistryBehavior {
        fail_tag: true,
        ..Default::default()
    });
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Converted, &registry, &builder);

    let outcome = pipeline.handle(&push_event("v1.2"), invocation("req-tag")).await;

    let (message, error) = outcome.into_reply();
    assert_eq!(message, "SOCI V2 OCI Image tag error");
    assert!(matches!(error, Some(Error::TagFailed { .. })));
}

#[tokio::test]
async fn test_workspace_failure() {
    let work_root = TempDir::new().unwrap();
    // A regular file where the work root should be.
    let blocked = work_root.path().join("not-a-dir");
    std::fs::write(&blocked, b"").unwrap();

    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = Pipeline::with_parts(
        test_config(&blocked, BuildStrategy::Legacy),
        Arc::new(registry.clone()),
        Arc::new(builder.clone()),
    );

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-ws")).await;

    let (message, error) = outcome.into_reply();
    assert_eq!(message, "Directory create error");
    assert!(matches!(error, Some(Error::WorkspaceCreateFailed { .. })));
    assert_eq!(registry.log().pulls, 0);
}

// =============================================================================
// Deadline Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_during_build_releases_workspace() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::new(BuilderMode::Stall(Duration::from_secs(30)));
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline
        .handle(&push_event("latest"), expiring_invocation("req-deadline"))
        .await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            stage: Stage::Build,
            ..
        }
    ));
    assert!(logs.contains(TIMEOUT_MESSAGE), "{}", logs.contents());
    assert_eq!(
        workspace_count(&work_root),
        0,
        "content staged after the watchdog fired must be removed"
    );
    assert_eq!(registry.log().pushes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_normal_finish_logs_no_timeout() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let work_root = TempDir::new().unwrap();
    let registry = FakeConnector::default();
    let builder = FakeBuilder::default();
    let pipeline = pipeline(&work_root, BuildStrategy::Legacy, &registry, &builder);

    let outcome = pipeline.handle(&push_event("latest"), invocation("req-ok")).await;

    assert!(matches!(outcome, Outcome::Success));
    assert!(logs.contains("Successfully built and pushed SOCI index"));
    assert!(!logs.contains(TIMEOUT_MESSAGE), "{}", logs.contents());
    assert_eq!(workspace_count(&work_root), 0);
}
