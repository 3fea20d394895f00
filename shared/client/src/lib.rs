mod cli;
mod config;
mod deployment;
mod logging;
mod sync;
mod teardown;
mod trainer_job;

pub use cli::OrchestratorArgs;
pub use config::{
    ConfigError, DeploymentConfig, OrchestrationConfig, PollSettings, SyncSettings,
};
pub use deployment::{DeploymentError, DeploymentManager};
pub use logging::{init_logging, LogOutput};
pub use sync::{HotloadCadence, SyncConfig, SyncError, SyncOutcome, WeightSyncer};
pub use teardown::ResourceOwner;
pub use trainer_job::{TrainerJobError, TrainerJobManager};
