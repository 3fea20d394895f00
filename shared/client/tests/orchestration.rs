use std::sync::Arc;
use std::time::Duration;

use halyard_client::{
    DeploymentError, DeploymentManager, ResourceOwner, SyncConfig, TrainerJobError,
    TrainerJobManager, WeightSyncer,
};
use halyard_core::{CheckpointId, CheckpointRefResolver, HotloadGeneration};
use halyard_remote::testing::MockControlPlane;
use halyard_remote::{
    ControlPlane, DeploymentShape, DeploymentStatus, ErrorClass, HotloadRequest, JobRole,
    JobState, RemoteError, SampleRequest, TrainerSpec,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn trainer_spec() -> TrainerSpec {
    TrainerSpec {
        model: "base-8x7b".to_string(),
        role: JobRole::Trainable,
        accelerator: "h100".to_string(),
        accelerator_count: 8,
    }
}

fn deployment_shape() -> DeploymentShape {
    DeploymentShape {
        model: "base-8x7b".to_string(),
        accelerator: "h100".to_string(),
        accelerator_count: 4,
        replicas: 1,
    }
}

struct Harness {
    control: Arc<MockControlPlane>,
    owner: Arc<ResourceOwner>,
    jobs: TrainerJobManager,
    deployments: Arc<DeploymentManager>,
}

fn harness(mock: MockControlPlane) -> Harness {
    let control = Arc::new(mock);
    let owner = Arc::new(ResourceOwner::new(control.clone()));
    let jobs = TrainerJobManager::new(control.clone(), owner.clone());
    let deployments = Arc::new(DeploymentManager::new(control.clone(), owner.clone()));
    Harness {
        control,
        owner,
        jobs,
        deployments,
    }
}

async fn ready_deployment(h: &Harness) -> DeploymentStatus {
    let deployment = h
        .deployments
        .create_or_get("rollout", deployment_shape())
        .await
        .unwrap();
    h.deployments
        .wait_until_ready(
            &deployment.id,
            Duration::from_secs(60),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
}

fn syncer(h: &Harness, deployment: &DeploymentStatus) -> WeightSyncer {
    WeightSyncer::new(
        h.deployments.clone(),
        deployment.id.clone(),
        CheckpointRefResolver::new("job-1"),
        SyncConfig::default(),
    )
}

#[test_log::test(tokio::test(start_paused = true))]
async fn trainer_job_reaches_running_with_endpoint() {
    let h = harness(MockControlPlane::new());
    let job = h.jobs.create(trainer_spec()).await.unwrap();
    assert_eq!(job.state, JobState::Requested);
    assert_eq!(h.owner.owned_count().await, 1);

    let running = h
        .jobs
        .wait_until_running(&job.id, Duration::from_secs(60), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(running.state, JobState::Running);
    assert!(running.endpoint.is_some());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn wait_until_running_honors_deadline() {
    let h = harness(MockControlPlane::new().with_provisioning_polls(u32::MAX));
    let job = h.jobs.create(trainer_spec()).await.unwrap();

    let result = h
        .jobs
        .wait_until_running(&job.id, Duration::from_secs(2), &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(TrainerJobError::DeadlineExceeded { .. })
    ));
    // the remote resource is left for the caller to decide about
    assert_eq!(h.control.trainer_job_count().await, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn wait_until_running_is_cancellable() {
    let h = harness(MockControlPlane::new().with_provisioning_polls(u32::MAX));
    let job = h.jobs.create(trainer_spec()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = h
        .jobs
        .wait_until_running(&job.id, Duration::from_secs(60), &cancel)
        .await;
    assert!(matches!(result, Err(TrainerJobError::Cancelled(_))));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn delete_is_idempotent() {
    let h = harness(MockControlPlane::new());
    let job = h.jobs.create(trainer_spec()).await.unwrap();

    h.jobs.delete(&job.id).await.unwrap();
    // second delete sees NotFound remotely and still succeeds
    h.jobs.delete(&job.id).await.unwrap();
    assert_eq!(h.owner.owned_count().await, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn create_or_get_reuses_live_deployment() {
    let h = harness(MockControlPlane::new());
    let first = h
        .deployments
        .create_or_get("rollout", deployment_shape())
        .await
        .unwrap();
    let second = h
        .deployments
        .create_or_get("rollout", deployment_shape())
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.control.calls().await.create_deployment, 1);
    assert_eq!(h.control.deployment_count().await, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn sync_cycle_promotes_generation_and_reports_replaced() {
    let h = harness(MockControlPlane::new());
    let deployment = ready_deployment(&h).await;
    let mut syncer = syncer(&h, &deployment);
    let cancel = CancellationToken::new();

    let first = syncer
        .sync(&CheckpointId::new("job-1", "step-10"), &cancel)
        .await
        .unwrap();
    assert_eq!(first.current, HotloadGeneration::from_u64(1));
    assert_eq!(first.replaced, None);
    // same-job checkpoint resolves to its bare name
    assert_eq!(first.checkpoint_ref, "step-10");

    let second = syncer
        .sync(&CheckpointId::new("job-1", "step-20"), &cancel)
        .await
        .unwrap();
    assert_eq!(second.current, HotloadGeneration::from_u64(2));
    // the prior generation is handed back for cleanup
    assert_eq!(second.replaced, Some(first.current));
    assert_eq!(syncer.current_generation(), Some(second.current));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn sampling_is_tagged_with_serving_generation() {
    let h = harness(MockControlPlane::new());
    let deployment = ready_deployment(&h).await;
    let mut syncer = syncer(&h, &deployment);
    let cancel = CancellationToken::new();
    let outcome = syncer
        .sync(&CheckpointId::new("job-1", "step-10"), &cancel)
        .await
        .unwrap();

    let completion = h
        .deployments
        .sample(
            &deployment.id,
            SampleRequest {
                prompt: "compute the integral".to_string(),
                max_tokens: 16,
                temperature: 0.7,
            },
        )
        .await
        .unwrap();
    assert_eq!(completion.generation, outcome.current);
    assert_eq!(completion.token_logprobs.len(), 16);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn warmup_goes_through_the_sampling_path() {
    let h = harness(MockControlPlane::new());
    let deployment = ready_deployment(&h).await;
    h.deployments.warmup(&deployment.id).await.unwrap();
    assert_eq!(h.control.calls().await.sample, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn second_hotload_while_in_flight_fails_fast() {
    let h = harness(MockControlPlane::new().with_hotload_polls(u32::MAX));
    let deployment = ready_deployment(&h).await;

    let first = h
        .deployments
        .hotload(&deployment.id, HotloadRequest::new("step-10"))
        .await
        .unwrap();
    let second = h
        .deployments
        .hotload(&deployment.id, HotloadRequest::new("step-20"))
        .await;
    assert!(matches!(
        second,
        Err(DeploymentError::HotloadInProgress(_))
    ));
    // only one generation was ever targeted
    assert_eq!(first, HotloadGeneration::from_u64(1));
    assert_eq!(h.control.calls().await.hotload, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn transient_hotload_failures_are_absorbed() {
    let h = harness(MockControlPlane::new());
    let deployment = ready_deployment(&h).await;
    h.control.inject_hotload_faults(3).await;
    let mut syncer = syncer(&h, &deployment);

    let outcome = syncer
        .sync(&CheckpointId::new("job-1", "step-10"), &CancellationToken::new())
        .await
        .unwrap();
    // three transient failures plus the one that landed, within one attempt
    assert_eq!(outcome.attempts, 1);
    assert_eq!(h.control.calls().await.hotload, 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn superseded_hotload_surfaces_generation_mismatch() {
    let h = harness(MockControlPlane::new().with_hotload_polls(0));
    let deployment = ready_deployment(&h).await;

    // two raw hotloads race past the manager; waiting on the first one must
    // observe the newer serving generation and refuse to trust it
    let first = h
        .control
        .hotload(&deployment.id, HotloadRequest::new("step-10"))
        .await
        .unwrap();
    h.control
        .hotload(&deployment.id, HotloadRequest::new("step-20"))
        .await
        .unwrap();

    let result = h
        .deployments
        .wait_for_hotload_ready(
            &deployment.id,
            first,
            Duration::from_secs(30),
            &CancellationToken::new(),
        )
        .await;
    match result {
        Err(DeploymentError::Remote(e @ RemoteError::GenerationMismatch { .. })) => {
            assert_eq!(e.class(), ErrorClass::Fatal);
        }
        other => panic!("expected generation mismatch, got {other:?}"),
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn teardown_deletes_owned_resources_best_effort() {
    let h = harness(MockControlPlane::new());
    h.jobs.create(trainer_spec()).await.unwrap();
    h.deployments
        .create_or_get("rollout", deployment_shape())
        .await
        .unwrap();
    assert_eq!(h.owner.owned_count().await, 2);

    // one delete will fail; teardown must still finish and not raise
    h.control.inject_delete_faults(1).await;
    h.owner.teardown().await;
    assert_eq!(h.owner.owned_count().await, 0);

    // one of the two resources survived the faulty delete
    let survivors =
        h.control.trainer_job_count().await + h.control.deployment_count().await;
    assert_eq!(survivors, 1);

    // a second teardown is a no-op
    h.owner.teardown().await;
}
