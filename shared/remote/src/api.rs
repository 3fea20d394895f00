use std::fmt;

use async_trait::async_trait;
use halyard_core::{HotloadGeneration, TokenRouting};
use serde::{Deserialize, Serialize};

use crate::RemoteError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a running resource, opaque to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobRole {
    #[default]
    Trainable,
    ReferenceOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobState {
    #[default]
    Requested,
    Provisioning,
    Running,
    Failed,
    Deleting,
    Deleted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Deleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeploymentState {
    #[default]
    Requested,
    Provisioning,
    Ready,
    Updating,
    Failed,
    Deleting,
    Deleted,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Failed | DeploymentState::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSpec {
    pub model: String,
    pub role: JobRole,
    pub accelerator: String,
    pub accelerator_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerJobStatus {
    pub id: JobId,
    pub role: JobRole,
    pub state: JobState,
    /// Present only once the job is running.
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentShape {
    /// Reference to the weights the deployment starts serving.
    pub model: String,
    pub accelerator: String,
    pub accelerator_count: u32,
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub id: DeploymentId,
    /// Logical key the deployment was created under; lookups go through this
    /// so re-running the orchestration reuses instead of duplicating.
    pub key: String,
    pub state: DeploymentState,
    /// Present once the deployment is ready.
    pub endpoint: Option<Endpoint>,
    pub serving_generation: HotloadGeneration,
    pub target_generation: HotloadGeneration,
}

/// Checksum declared on every hotload request. Trainer and deployment must
/// agree on this; the default is fixed at sha-256 rather than negotiated, a
/// silent mismatch here corrupts weights instead of failing loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChecksumFormat {
    #[default]
    Sha256,
    Crc32c,
    None,
}

/// Delta-compression declared on every hotload request. Defaults to no
/// compression; like the checksum, the default is fixed and documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionFormat {
    #[default]
    None,
    Zstd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotloadRequest {
    pub checkpoint_ref: String,
    pub checksum: ChecksumFormat,
    pub compression: CompressionFormat,
}

impl HotloadRequest {
    pub fn new(checkpoint_ref: impl Into<String>) -> Self {
        Self {
            checkpoint_ref: checkpoint_ref.into(),
            checksum: ChecksumFormat::default(),
            compression: CompressionFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTrainerJob {
    pub spec: TrainerSpec,
    /// Client-supplied so a retried create resolves to the same job instead
    /// of a duplicate.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDeployment {
    pub key: String,
    pub shape: DeploymentShape,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledCompletion {
    pub completion_id: String,
    pub text: String,
    /// One entry per completion token.
    pub token_logprobs: Vec<f64>,
    /// Prompt length in tokens, needed to align the routing trace.
    pub prompt_len: usize,
    pub routing_trace: Option<Vec<TokenRouting>>,
    /// The generation that was serving when this completion was produced.
    pub generation: HotloadGeneration,
}

/// Client-side contract of the remote control plane. Implementations wrap
/// the platform's REST API; everything here is an opaque remote call the
/// orchestration layer drives through [`crate::retry_remote`].
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_trainer_job(
        &self,
        request: CreateTrainerJob,
    ) -> Result<TrainerJobStatus, RemoteError>;
    async fn trainer_job_status(&self, id: &JobId) -> Result<TrainerJobStatus, RemoteError>;
    async fn delete_trainer_job(&self, id: &JobId) -> Result<(), RemoteError>;

    async fn find_deployment(&self, key: &str) -> Result<Option<DeploymentStatus>, RemoteError>;
    async fn create_deployment(
        &self,
        request: CreateDeployment,
    ) -> Result<DeploymentStatus, RemoteError>;
    async fn deployment_status(&self, id: &DeploymentId) -> Result<DeploymentStatus, RemoteError>;
    async fn delete_deployment(&self, id: &DeploymentId) -> Result<(), RemoteError>;

    /// Instructs the deployment to begin serving a new checkpoint. Returns
    /// the generation that will serve it; does not block until loaded.
    async fn hotload(
        &self,
        id: &DeploymentId,
        request: HotloadRequest,
    ) -> Result<HotloadGeneration, RemoteError>;
    async fn sample(
        &self,
        id: &DeploymentId,
        request: SampleRequest,
    ) -> Result<SampledCompletion, RemoteError>;
}
