//! In-memory control plane used by tests across the workspace. Resources
//! advance through their lifecycle as status polls observe them, so polling
//! loops can be exercised without a wall clock, and faults can be injected
//! per operation.

use std::collections::HashMap;

use async_trait::async_trait;
use halyard_core::{HotloadGeneration, TokenRouting};
use tokio::sync::Mutex;

use crate::{
    ControlPlane, CreateDeployment, CreateTrainerJob, DeploymentId, DeploymentState,
    DeploymentStatus, Endpoint, HotloadRequest, JobId, JobState, RemoteError, SampleRequest,
    SampledCompletion, TrainerJobStatus,
};

/// What shape of routing trace sampled completions carry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    #[default]
    None,
    /// Trace covers prompt and completion.
    Echo,
    /// Trace covers the completion only.
    Legacy,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub create_trainer_job: u32,
    pub trainer_job_status: u32,
    pub delete_trainer_job: u32,
    pub find_deployment: u32,
    pub create_deployment: u32,
    pub deployment_status: u32,
    pub delete_deployment: u32,
    pub hotload: u32,
    pub sample: u32,
}

struct MockJob {
    status: TrainerJobStatus,
    polls_left: u32,
}

struct MockDeployment {
    status: DeploymentStatus,
    polls_left: u32,
    load_polls_left: u32,
}

#[derive(Default)]
struct MockState {
    jobs: HashMap<String, MockJob>,
    deployments: HashMap<String, MockDeployment>,
    by_idempotency_key: HashMap<String, String>,
    next_id: u64,
    next_completion: u64,
    hotload_faults: u32,
    delete_faults: u32,
    calls: CallCounts,
}

pub struct MockControlPlane {
    state: Mutex<MockState>,
    provisioning_polls: u32,
    hotload_polls: u32,
    routing_mode: RoutingMode,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            provisioning_polls: 2,
            hotload_polls: 1,
            routing_mode: RoutingMode::default(),
        }
    }

    /// Status polls a fresh resource takes to reach running/ready.
    pub fn with_provisioning_polls(mut self, polls: u32) -> Self {
        self.provisioning_polls = polls;
        self
    }

    /// Status polls a hotload takes to finish applying.
    pub fn with_hotload_polls(mut self, polls: u32) -> Self {
        self.hotload_polls = polls;
        self
    }

    pub fn with_routing_mode(mut self, mode: RoutingMode) -> Self {
        self.routing_mode = mode;
        self
    }

    /// The next `count` hotload calls fail with `ServiceUnavailable`.
    pub async fn inject_hotload_faults(&self, count: u32) {
        self.state.lock().await.hotload_faults = count;
    }

    /// The next `count` delete calls fail with `ServiceUnavailable`.
    pub async fn inject_delete_faults(&self, count: u32) {
        self.state.lock().await.delete_faults = count;
    }

    /// Forces a deployment into the failed state.
    pub async fn fail_deployment(&self, id: &DeploymentId) {
        if let Some(deployment) = self.state.lock().await.deployments.get_mut(id.as_str()) {
            deployment.status.state = DeploymentState::Failed;
        }
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    pub async fn trainer_job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn deployment_count(&self) -> usize {
        self.state.lock().await.deployments.len()
    }
}

fn advance_job(job: &mut MockJob) {
    match job.status.state {
        JobState::Requested | JobState::Provisioning => {
            if job.polls_left > 0 {
                job.polls_left -= 1;
                job.status.state = JobState::Provisioning;
            } else {
                job.status.state = JobState::Running;
                job.status.endpoint = Some(Endpoint::new(format!(
                    "grpc://trainer/{}",
                    job.status.id.as_str()
                )));
            }
        }
        _ => {}
    }
}

fn advance_deployment(deployment: &mut MockDeployment) {
    match deployment.status.state {
        DeploymentState::Requested | DeploymentState::Provisioning => {
            if deployment.polls_left > 0 {
                deployment.polls_left -= 1;
                deployment.status.state = DeploymentState::Provisioning;
            } else {
                deployment.status.state = DeploymentState::Ready;
                deployment.status.endpoint = Some(Endpoint::new(format!(
                    "https://serve/{}",
                    deployment.status.id.as_str()
                )));
            }
        }
        DeploymentState::Updating => {
            if deployment.load_polls_left > 0 {
                deployment.load_polls_left -= 1;
            } else {
                deployment.status.serving_generation = deployment.status.target_generation;
                deployment.status.state = DeploymentState::Ready;
            }
        }
        _ => {}
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn create_trainer_job(
        &self,
        request: CreateTrainerJob,
    ) -> Result<TrainerJobStatus, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.create_trainer_job += 1;
        if let Some(existing) = state.by_idempotency_key.get(&request.idempotency_key) {
            let existing = existing.clone();
            if let Some(job) = state.jobs.get(&existing) {
                return Ok(job.status.clone());
            }
        }
        state.next_id += 1;
        let id = format!("job-{}", state.next_id);
        let status = TrainerJobStatus {
            id: JobId::new(&id),
            role: request.spec.role,
            state: JobState::Requested,
            endpoint: None,
        };
        state
            .by_idempotency_key
            .insert(request.idempotency_key, id.clone());
        state.jobs.insert(
            id,
            MockJob {
                status: status.clone(),
                polls_left: self.provisioning_polls,
            },
        );
        Ok(status)
    }

    async fn trainer_job_status(&self, id: &JobId) -> Result<TrainerJobStatus, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.trainer_job_status += 1;
        let job = state
            .jobs
            .get_mut(id.as_str())
            .ok_or_else(|| RemoteError::NotFound(format!("trainer job {id}")))?;
        advance_job(job);
        Ok(job.status.clone())
    }

    async fn delete_trainer_job(&self, id: &JobId) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.delete_trainer_job += 1;
        if state.delete_faults > 0 {
            state.delete_faults -= 1;
            return Err(RemoteError::ServiceUnavailable);
        }
        state
            .jobs
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("trainer job {id}")))
    }

    async fn find_deployment(&self, key: &str) -> Result<Option<DeploymentStatus>, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.find_deployment += 1;
        Ok(state
            .deployments
            .values()
            .find(|d| d.status.key == key)
            .map(|d| d.status.clone()))
    }

    async fn create_deployment(
        &self,
        request: CreateDeployment,
    ) -> Result<DeploymentStatus, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.create_deployment += 1;
        if let Some(existing) = state.by_idempotency_key.get(&request.idempotency_key) {
            let existing = existing.clone();
            if let Some(deployment) = state.deployments.get(&existing) {
                return Ok(deployment.status.clone());
            }
        }
        state.next_id += 1;
        let id = format!("dep-{}", state.next_id);
        let status = DeploymentStatus {
            id: DeploymentId::new(&id),
            key: request.key,
            state: DeploymentState::Requested,
            endpoint: None,
            serving_generation: HotloadGeneration::default(),
            target_generation: HotloadGeneration::default(),
        };
        state
            .by_idempotency_key
            .insert(request.idempotency_key, id.clone());
        state.deployments.insert(
            id,
            MockDeployment {
                status: status.clone(),
                polls_left: self.provisioning_polls,
                load_polls_left: 0,
            },
        );
        Ok(status)
    }

    async fn deployment_status(&self, id: &DeploymentId) -> Result<DeploymentStatus, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.deployment_status += 1;
        let deployment = state
            .deployments
            .get_mut(id.as_str())
            .ok_or_else(|| RemoteError::NotFound(format!("deployment {id}")))?;
        advance_deployment(deployment);
        Ok(deployment.status.clone())
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.delete_deployment += 1;
        if state.delete_faults > 0 {
            state.delete_faults -= 1;
            return Err(RemoteError::ServiceUnavailable);
        }
        state
            .deployments
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("deployment {id}")))
    }

    async fn hotload(
        &self,
        id: &DeploymentId,
        _request: HotloadRequest,
    ) -> Result<HotloadGeneration, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.hotload += 1;
        if state.hotload_faults > 0 {
            state.hotload_faults -= 1;
            return Err(RemoteError::ServiceUnavailable);
        }
        let hotload_polls = self.hotload_polls;
        let deployment = state
            .deployments
            .get_mut(id.as_str())
            .ok_or_else(|| RemoteError::NotFound(format!("deployment {id}")))?;
        let generation = deployment.status.target_generation.next();
        deployment.status.target_generation = generation;
        deployment.status.state = DeploymentState::Updating;
        deployment.load_polls_left = hotload_polls;
        Ok(generation)
    }

    async fn sample(
        &self,
        id: &DeploymentId,
        request: SampleRequest,
    ) -> Result<SampledCompletion, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.sample += 1;
        state.next_completion += 1;
        let completion_id = format!("c-{}", state.next_completion);
        let routing_mode = self.routing_mode;
        let deployment = state
            .deployments
            .get(id.as_str())
            .ok_or_else(|| RemoteError::NotFound(format!("deployment {id}")))?;
        let prompt_len = request.prompt.split_whitespace().count().max(1);
        let completion_len = request.max_tokens as usize;
        let routing_trace = match routing_mode {
            RoutingMode::None => None,
            RoutingMode::Echo => Some(
                (0..prompt_len + completion_len)
                    .map(|i| TokenRouting::new(vec![i as u32 % 8]))
                    .collect(),
            ),
            RoutingMode::Legacy => Some(
                (0..completion_len)
                    .map(|i| TokenRouting::new(vec![i as u32 % 8]))
                    .collect(),
            ),
        };
        Ok(SampledCompletion {
            completion_id,
            text: "sampled text".to_string(),
            token_logprobs: vec![-0.25; completion_len],
            prompt_len,
            routing_trace,
            generation: deployment.status.serving_generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeploymentShape, TrainerSpec};
    use pretty_assertions::assert_eq;

    fn spec() -> TrainerSpec {
        TrainerSpec {
            model: "base-8x7b".to_string(),
            role: Default::default(),
            accelerator: "a100".to_string(),
            accelerator_count: 8,
        }
    }

    #[tokio::test]
    async fn test_job_advances_as_polled() {
        let mock = MockControlPlane::new().with_provisioning_polls(1);
        let job = mock
            .create_trainer_job(CreateTrainerJob {
                spec: spec(),
                idempotency_key: "k1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Requested);
        assert_eq!(
            mock.trainer_job_status(&job.id).await.unwrap().state,
            JobState::Provisioning
        );
        let running = mock.trainer_job_status(&job.id).await.unwrap();
        assert_eq!(running.state, JobState::Running);
        assert!(running.endpoint.is_some());
    }

    #[tokio::test]
    async fn test_create_with_same_idempotency_key_returns_same_job() {
        let mock = MockControlPlane::new();
        let request = CreateTrainerJob {
            spec: spec(),
            idempotency_key: "k1".to_string(),
        };
        let first = mock.create_trainer_job(request.clone()).await.unwrap();
        let second = mock.create_trainer_job(request).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(mock.trainer_job_count().await, 1);
    }

    #[tokio::test]
    async fn test_hotload_applies_after_polls() {
        let mock = MockControlPlane::new()
            .with_provisioning_polls(0)
            .with_hotload_polls(1);
        let deployment = mock
            .create_deployment(CreateDeployment {
                key: "rollout".to_string(),
                shape: DeploymentShape {
                    model: "base-8x7b".to_string(),
                    accelerator: "a100".to_string(),
                    accelerator_count: 8,
                    replicas: 1,
                },
                idempotency_key: "k2".to_string(),
            })
            .await
            .unwrap();
        mock.deployment_status(&deployment.id).await.unwrap();
        let generation = mock
            .hotload(&deployment.id, HotloadRequest::new("step-1"))
            .await
            .unwrap();
        assert_eq!(generation, HotloadGeneration::from_u64(1));
        let mid = mock.deployment_status(&deployment.id).await.unwrap();
        assert_eq!(mid.state, DeploymentState::Updating);
        let done = mock.deployment_status(&deployment.id).await.unwrap();
        assert_eq!(done.serving_generation, generation);
        assert_eq!(done.state, DeploymentState::Ready);
    }
}
