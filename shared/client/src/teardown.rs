use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use halyard_remote::{ControlPlane, DeploymentId, JobId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum OwnedResource {
    TrainerJob(JobId),
    Deployment(DeploymentId),
}

/// Owns every remote resource a run creates and deletes them best-effort on
/// teardown. The run holds this by reference and calls [`Self::teardown`] on
/// every exit path; there is no process-global registry and no exit hook.
///
/// Each delete gets a short bounded timeout so cleanup can never hang
/// process exit; failures are logged and swallowed.
pub struct ResourceOwner {
    control: Arc<dyn ControlPlane>,
    resources: Mutex<Vec<OwnedResource>>,
    delete_timeout: Duration,
}

impl ResourceOwner {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            control,
            resources: Mutex::new(Vec::new()),
            delete_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_delete_timeout(mut self, delete_timeout: Duration) -> Self {
        self.delete_timeout = delete_timeout;
        self
    }

    pub async fn register_trainer_job(&self, id: JobId) {
        self.resources
            .lock()
            .await
            .push(OwnedResource::TrainerJob(id));
    }

    pub async fn register_deployment(&self, id: DeploymentId) {
        self.resources
            .lock()
            .await
            .push(OwnedResource::Deployment(id));
    }

    /// Forgets a job that was deleted through its manager.
    pub async fn release_trainer_job(&self, id: &JobId) {
        let released = OwnedResource::TrainerJob(id.clone());
        self.resources.lock().await.retain(|r| r != &released);
    }

    pub async fn release_deployment(&self, id: &DeploymentId) {
        let released = OwnedResource::Deployment(id.clone());
        self.resources.lock().await.retain(|r| r != &released);
    }

    pub async fn owned_count(&self) -> usize {
        self.resources.lock().await.len()
    }

    /// Deletes everything still registered, concurrently and best-effort.
    /// Draining first makes a second call a no-op.
    pub async fn teardown(&self) {
        let resources = {
            let mut resources = self.resources.lock().await;
            std::mem::take(&mut *resources)
        };
        if resources.is_empty() {
            return;
        }
        info!(count = resources.len(), "tearing down run resources");
        join_all(resources.into_iter().map(|r| self.delete_one(r))).await;
    }

    async fn delete_one(&self, resource: OwnedResource) {
        let delete = async {
            match &resource {
                OwnedResource::TrainerJob(id) => self.control.delete_trainer_job(id).await,
                OwnedResource::Deployment(id) => self.control.delete_deployment(id).await,
            }
        };
        match tokio::time::timeout(self.delete_timeout, delete).await {
            Err(_) => warn!(?resource, "teardown delete timed out"),
            Ok(Err(e)) if e.is_not_found() => debug!(?resource, "already gone"),
            Ok(Err(e)) => warn!(?resource, error = %e, "teardown delete failed"),
            Ok(Ok(())) => debug!(?resource, "deleted"),
        }
    }
}
