use std::sync::Arc;
use std::time::Duration;

use halyard_core::HotloadGeneration;
use halyard_remote::{
    idempotency_key, retry_remote, ControlPlane, CreateDeployment, DeploymentId, DeploymentShape,
    DeploymentState, DeploymentStatus, HotloadRequest, RemoteError, SampleRequest,
    SampledCompletion,
};
use thiserror::Error;
use tokio::select;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollSettings;
use crate::teardown::ResourceOwner;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("deployment {0} entered the failed state")]
    Failed(DeploymentId),
    #[error("deadline exceeded waiting for deployment {id} to become ready (waited {waited:?})")]
    DeadlineExceeded { id: DeploymentId, waited: Duration },
    #[error("timed out waiting for deployment {id} to serve {generation} (waited {waited:?})")]
    HotloadTimeout {
        id: DeploymentId,
        generation: HotloadGeneration,
        waited: Duration,
    },
    #[error("a hotload for deployment {0} is already in flight")]
    HotloadInProgress(DeploymentId),
    #[error("wait on deployment {0} was cancelled")]
    Cancelled(DeploymentId),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Creates, observes and destroys the serving deployment, and issues the
/// hotload and sampling requests against it. At most one hotload may be in
/// flight at a time; a second request fails fast rather than racing two
/// generations onto the deployment.
pub struct DeploymentManager {
    control: Arc<dyn ControlPlane>,
    owner: Arc<ResourceOwner>,
    poll: PollSettings,
    in_flight: Mutex<Option<HotloadGeneration>>,
}

impl DeploymentManager {
    pub fn new(control: Arc<dyn ControlPlane>, owner: Arc<ResourceOwner>) -> Self {
        Self {
            control,
            owner,
            poll: PollSettings::default(),
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Returns the existing deployment for `key` if one is alive, otherwise
    /// creates it. Re-running the orchestration with the same key must not
    /// leak deployments.
    pub async fn create_or_get(
        &self,
        key: &str,
        shape: DeploymentShape,
    ) -> Result<DeploymentStatus, DeploymentError> {
        let existing = retry_remote("find deployment", || self.control.find_deployment(key)).await?;
        if let Some(deployment) = existing {
            if !deployment.state.is_terminal() {
                info!(deployment = %deployment.id, key, "reusing existing deployment");
                return Ok(deployment);
            }
            debug!(deployment = %deployment.id, state = ?deployment.state, "ignoring dead deployment");
        }
        let request = CreateDeployment {
            key: key.to_string(),
            shape,
            idempotency_key: idempotency_key(key),
        };
        let deployment = retry_remote("create deployment", || {
            self.control.create_deployment(request.clone())
        })
        .await?;
        self.owner.register_deployment(deployment.id.clone()).await;
        info!(deployment = %deployment.id, key, "created deployment");
        Ok(deployment)
    }

    pub async fn wait_until_ready(
        &self,
        id: &DeploymentId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeploymentStatus, DeploymentError> {
        let started = Instant::now();
        let mut delay = self.poll.floor;
        loop {
            let status = retry_remote("deployment status", || {
                self.control.deployment_status(id)
            })
            .await?;
            match status.state {
                DeploymentState::Ready => {
                    info!(deployment = %id, endpoint = ?status.endpoint, "deployment is ready");
                    return Ok(status);
                }
                DeploymentState::Failed => {
                    return Err(DeploymentError::Failed(id.clone()));
                }
                state => debug!(deployment = %id, ?state, "deployment not ready yet"),
            }
            if started.elapsed() >= timeout {
                return Err(DeploymentError::DeadlineExceeded {
                    id: id.clone(),
                    waited: started.elapsed(),
                });
            }
            select! {
                _ = cancel.cancelled() => return Err(DeploymentError::Cancelled(id.clone())),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.poll.next_delay(delay);
        }
    }

    /// Tells the deployment to begin serving a new checkpoint. Returns the
    /// generation the checkpoint will serve under without waiting for the
    /// load to finish; pair with [`Self::wait_for_hotload_ready`].
    pub async fn hotload(
        &self,
        id: &DeploymentId,
        request: HotloadRequest,
    ) -> Result<HotloadGeneration, DeploymentError> {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(pending) = *in_flight {
            warn!(deployment = %id, %pending, "refusing hotload, another is in flight");
            return Err(DeploymentError::HotloadInProgress(id.clone()));
        }
        let generation = retry_remote("hotload", || {
            self.control.hotload(id, request.clone())
        })
        .await?;
        *in_flight = Some(generation);
        info!(
            deployment = %id,
            %generation,
            checkpoint = %request.checkpoint_ref,
            "hotload issued"
        );
        Ok(generation)
    }

    /// Polls until the deployment reports it is serving `generation`. The
    /// in-flight slot is released on every outcome; on timeout the next
    /// hotload supersedes the abandoned one on the control-plane side.
    pub async fn wait_for_hotload_ready(
        &self,
        id: &DeploymentId,
        generation: HotloadGeneration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeploymentStatus, DeploymentError> {
        let result = self
            .poll_for_generation(id, generation, timeout, cancel)
            .await;
        *self.in_flight.lock().await = None;
        if let Err(e) = &result {
            warn!(deployment = %id, %generation, error = %e, "hotload did not become ready");
        }
        result
    }

    async fn poll_for_generation(
        &self,
        id: &DeploymentId,
        generation: HotloadGeneration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeploymentStatus, DeploymentError> {
        let started = Instant::now();
        let mut delay = self.poll.floor;
        loop {
            let status = retry_remote("deployment status", || {
                self.control.deployment_status(id)
            })
            .await?;
            if status.state == DeploymentState::Failed {
                return Err(DeploymentError::Failed(id.clone()));
            }
            if status.serving_generation == generation {
                info!(deployment = %id, %generation, "deployment is serving the requested generation");
                return Ok(status);
            }
            if status.serving_generation > generation {
                // someone promoted past us; the serving state can't be trusted
                return Err(DeploymentError::Remote(RemoteError::GenerationMismatch {
                    expected: generation,
                    observed: status.serving_generation,
                }));
            }
            if started.elapsed() >= timeout {
                return Err(DeploymentError::HotloadTimeout {
                    id: id.clone(),
                    generation,
                    waited: started.elapsed(),
                });
            }
            select! {
                _ = cancel.cancelled() => return Err(DeploymentError::Cancelled(id.clone())),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.poll.next_delay(delay);
        }
    }

    /// Issues a sampling request; the completion carries the generation that
    /// produced it.
    pub async fn sample(
        &self,
        id: &DeploymentId,
        request: SampleRequest,
    ) -> Result<SampledCompletion, DeploymentError> {
        let completion = retry_remote("sample", || self.control.sample(id, request.clone())).await?;
        Ok(completion)
    }

    /// Fires a one-token sampling request so the first real request does not
    /// pay the cold-start cost. Goes through the same path as real traffic.
    pub async fn warmup(&self, id: &DeploymentId) -> Result<(), DeploymentError> {
        let request = SampleRequest {
            prompt: "warmup".to_string(),
            max_tokens: 1,
            temperature: 0.0,
        };
        let completion = self.sample(id, request).await?;
        debug!(deployment = %id, generation = %completion.generation, "deployment warmed up");
        Ok(())
    }

    /// Best-effort delete; a deployment that is already gone counts as
    /// success.
    pub async fn delete(&self, id: &DeploymentId) -> Result<(), DeploymentError> {
        let result = retry_remote("delete deployment", || {
            self.control.delete_deployment(id)
        })
        .await;
        match result {
            Ok(()) => {
                info!(deployment = %id, "deleted deployment");
            }
            Err(e) if e.is_not_found() => {
                debug!(deployment = %id, "deployment already gone");
            }
            Err(e) => return Err(e.into()),
        }
        self.owner.release_deployment(id).await;
        Ok(())
    }
}
