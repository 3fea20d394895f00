mod api;
mod error;
mod idempotency;
mod retry;
pub mod testing;

pub use api::{
    ControlPlane, CreateDeployment, CreateTrainerJob, DeploymentId, DeploymentShape,
    DeploymentState, DeploymentStatus, Endpoint, JobId, JobRole, JobState, HotloadRequest,
    SampleRequest, SampledCompletion, TrainerJobStatus, TrainerSpec, ChecksumFormat,
    CompressionFormat,
};
pub use error::{ErrorClass, ErrorReport, RemoteError};
pub use idempotency::{fresh_idempotency_key, idempotency_key};
pub use retry::{retry_remote, retry_remote_with_params};
