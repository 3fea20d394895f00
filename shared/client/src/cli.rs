use std::path::PathBuf;

use clap::Args;

use crate::config::{ConfigError, SyncSettings};
use crate::logging::LogOutput;
use crate::sync::SyncConfig;

/// Orchestration flags for the outer training binary to flatten into its own
/// CLI. Every flag can also come from the environment.
#[derive(Args, Debug)]
pub struct OrchestratorArgs {
    /// Base URL of the control-plane API.
    #[clap(long, env)]
    pub control_plane_url: String,

    /// A unique identifier for this training run.
    #[clap(long, env)]
    pub run_id: String,

    /// Path to the run's TOML config. Flags below override its [sync] table.
    #[clap(long, env)]
    pub config_path: Option<PathBuf>,

    /// Hotload the newest checkpoint every N optimizer steps; 1 hotloads
    /// every step and makes off-policy correction a no-op.
    #[clap(long, default_value_t = 1, env)]
    pub hotload_interval: u32,

    /// Seconds to wait for a deployment to finish applying a hotload.
    #[clap(long, default_value_t = 300, env)]
    pub hotload_timeout_secs: u64,

    /// How many times a failing hotload step is re-driven before the run
    /// keeps the previous generation and surfaces the error.
    #[clap(long, default_value_t = 3, env)]
    pub max_hotload_attempts: u32,

    /// Clip width for the importance-sampling ratio.
    #[clap(long, default_value_t = 0.2, env)]
    pub clip_epsilon: f64,

    /// If provided, logs are also appended to this file.
    #[clap(long, env)]
    pub write_log: Option<PathBuf>,

    #[clap(long, value_enum, default_value_t = LogOutput::Console, env)]
    pub log_output: LogOutput,
}

impl OrchestratorArgs {
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        SyncSettings {
            hotload_interval: self.hotload_interval,
            hotload_timeout_secs: self.hotload_timeout_secs,
            max_hotload_attempts: self.max_hotload_attempts,
            clip_epsilon: self.clip_epsilon,
            ..Default::default()
        }
        .sync_config()
    }
}
