use std::sync::Arc;
use std::time::Duration;

use halyard_remote::{
    fresh_idempotency_key, retry_remote, ControlPlane, CreateTrainerJob, JobId, JobState,
    RemoteError, TrainerJobStatus, TrainerSpec,
};
use thiserror::Error;
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollSettings;
use crate::teardown::ResourceOwner;

#[derive(Debug, Error)]
pub enum TrainerJobError {
    #[error("trainer job {0} entered the failed state")]
    Failed(JobId),
    #[error("deadline exceeded waiting for trainer job {id} to run (waited {waited:?})")]
    DeadlineExceeded { id: JobId, waited: Duration },
    #[error("wait for trainer job {0} was cancelled")]
    Cancelled(JobId),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Creates, observes and destroys trainer job resources. Every job created
/// here is registered with the run's [`ResourceOwner`] so teardown can reach
/// it even after an abnormal exit path.
pub struct TrainerJobManager {
    control: Arc<dyn ControlPlane>,
    owner: Arc<ResourceOwner>,
    poll: PollSettings,
}

impl TrainerJobManager {
    pub fn new(control: Arc<dyn ControlPlane>, owner: Arc<ResourceOwner>) -> Self {
        Self {
            control,
            owner,
            poll: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Issues the creation request and returns immediately; the job comes
    /// back in the `requested` state.
    pub async fn create(&self, spec: TrainerSpec) -> Result<TrainerJobStatus, TrainerJobError> {
        let request = CreateTrainerJob {
            spec,
            idempotency_key: fresh_idempotency_key(),
        };
        let job = retry_remote("create trainer job", || {
            self.control.create_trainer_job(request.clone())
        })
        .await?;
        self.owner.register_trainer_job(job.id.clone()).await;
        info!(job = %job.id, role = ?job.role, "created trainer job");
        Ok(job)
    }

    /// Polls until the job is running or the deadline passes. On timeout the
    /// remote resource is left untouched; the caller decides whether to
    /// delete it.
    pub async fn wait_until_running(
        &self,
        id: &JobId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TrainerJobStatus, TrainerJobError> {
        let started = Instant::now();
        let mut delay = self.poll.floor;
        loop {
            let status = retry_remote("trainer job status", || {
                self.control.trainer_job_status(id)
            })
            .await?;
            match status.state {
                JobState::Running => {
                    info!(job = %id, endpoint = ?status.endpoint, "trainer job is running");
                    return Ok(status);
                }
                JobState::Failed => {
                    warn!(job = %id, "trainer job failed while waiting for it to run");
                    return Err(TrainerJobError::Failed(id.clone()));
                }
                state => debug!(job = %id, ?state, "trainer job not running yet"),
            }
            if started.elapsed() >= timeout {
                return Err(TrainerJobError::DeadlineExceeded {
                    id: id.clone(),
                    waited: started.elapsed(),
                });
            }
            select! {
                _ = cancel.cancelled() => return Err(TrainerJobError::Cancelled(id.clone())),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.poll.next_delay(delay);
        }
    }

    /// Best-effort delete; a job that is already gone counts as success.
    pub async fn delete(&self, id: &JobId) -> Result<(), TrainerJobError> {
        let result = retry_remote("delete trainer job", || {
            self.control.delete_trainer_job(id)
        })
        .await;
        match result {
            Ok(()) => {
                info!(job = %id, "deleted trainer job");
            }
            Err(e) if e.is_not_found() => {
                debug!(job = %id, "trainer job already gone");
            }
            Err(e) => return Err(e.into()),
        }
        self.owner.release_trainer_job(id).await;
        Ok(())
    }
}
