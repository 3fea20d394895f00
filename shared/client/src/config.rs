use std::path::Path;
use std::time::Duration;

use halyard_remote::{ChecksumFormat, CompressionFormat, DeploymentShape, TrainerSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::{HotloadCadence, SyncConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How often and how patiently managers poll remote status. Polling always
/// sleeps at least `floor` between checks and backs off towards `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub floor: Duration,
    pub ceiling: Duration,
    pub factor: f32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(500),
            ceiling: Duration::from_secs(5),
            factor: 1.5,
        }
    }
}

impl PollSettings {
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f32(self.factor).min(self.ceiling)
    }
}

/// Weight-sync settings as they appear in the run's TOML config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    /// Hotload every N optimizer steps; 1 means every step.
    #[serde(default = "default_hotload_interval")]
    pub hotload_interval: u32,
    #[serde(default = "default_hotload_timeout_secs")]
    pub hotload_timeout_secs: u64,
    #[serde(default = "default_max_hotload_attempts")]
    pub max_hotload_attempts: u32,
    #[serde(default = "default_clip_epsilon")]
    pub clip_epsilon: f64,
    #[serde(default)]
    pub checksum: ChecksumFormat,
    #[serde(default)]
    pub compression: CompressionFormat,
}

fn default_hotload_interval() -> u32 {
    1
}

fn default_hotload_timeout_secs() -> u64 {
    300
}

fn default_max_hotload_attempts() -> u32 {
    3
}

fn default_clip_epsilon() -> f64 {
    0.2
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            hotload_interval: default_hotload_interval(),
            hotload_timeout_secs: default_hotload_timeout_secs(),
            max_hotload_attempts: default_max_hotload_attempts(),
            clip_epsilon: default_clip_epsilon(),
            checksum: ChecksumFormat::default(),
            compression: CompressionFormat::default(),
        }
    }
}

impl SyncSettings {
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        if self.hotload_interval == 0 {
            return Err(ConfigError::Invalid(
                "hotload_interval must be at least 1".to_string(),
            ));
        }
        if self.max_hotload_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_hotload_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.clip_epsilon) || self.clip_epsilon == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "clip_epsilon must be in (0, 1), got {}",
                self.clip_epsilon
            )));
        }
        Ok(SyncConfig {
            cadence: if self.hotload_interval == 1 {
                HotloadCadence::EveryStep
            } else {
                HotloadCadence::Interval(self.hotload_interval)
            },
            hotload_timeout: Duration::from_secs(self.hotload_timeout_secs),
            max_hotload_attempts: self.max_hotload_attempts,
            clip_epsilon: self.clip_epsilon,
            checksum: self.checksum,
            compression: self.compression,
            poll: PollSettings::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Logical key; re-running with the same key reuses the deployment.
    pub key: String,
    pub shape: DeploymentShape,
}

/// Everything one orchestration run needs, loadable from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub run_id: String,
    pub trainer: TrainerSpec,
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl OrchestrationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_id.is_empty() {
            return Err(ConfigError::Invalid("run_id must not be empty".to_string()));
        }
        if self.deployment.key.is_empty() {
            return Err(ConfigError::Invalid(
                "deployment.key must not be empty".to_string(),
            ));
        }
        if self.deployment.shape.replicas == 0 {
            return Err(ConfigError::Invalid(
                "deployment.shape.replicas must be at least 1".to_string(),
            ));
        }
        self.sync.sync_config()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const EXAMPLE: &str = r#"
run_id = "grpo-8x7b-0412"

[trainer]
model = "base-8x7b"
role = "Trainable"
accelerator = "h100"
accelerator_count = 8

[deployment]
key = "grpo-8x7b-0412-rollout"

[deployment.shape]
model = "base-8x7b"
accelerator = "h100"
accelerator_count = 4
replicas = 2

[sync]
hotload_interval = 4
"#;

    #[test]
    fn test_parses_example_config() {
        let config: OrchestrationConfig = toml::from_str(EXAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.run_id, "grpo-8x7b-0412");
        assert_eq!(config.sync.hotload_interval, 4);
        // omitted settings fall back to their documented defaults
        assert_eq!(config.sync.checksum, ChecksumFormat::Sha256);
        assert_eq!(config.sync.compression, CompressionFormat::None);
        let sync = config.sync.sync_config().unwrap();
        assert_eq!(sync.cadence, HotloadCadence::Interval(4));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let settings = SyncSettings {
            hotload_interval: 0,
            ..Default::default()
        };
        assert!(settings.sync_config().is_err());
    }

    #[rstest]
    #[case(0.0)]
    #[case(1.0)]
    #[case(1.5)]
    #[case(-0.1)]
    fn test_rejects_epsilon_out_of_range(#[case] clip_epsilon: f64) {
        let settings = SyncSettings {
            clip_epsilon,
            ..Default::default()
        };
        assert!(settings.sync_config().is_err(), "epsilon {clip_epsilon}");
    }

    #[test]
    fn test_interval_one_is_synchronous() {
        let sync = SyncSettings::default().sync_config().unwrap();
        assert_eq!(sync.cadence, HotloadCadence::EveryStep);
    }
}
