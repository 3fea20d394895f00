use std::sync::Arc;
use std::time::Duration;

use halyard_core::{
    CheckpointId, CheckpointRefError, CheckpointRefResolver, HotloadGeneration,
    ImportanceCorrector,
};
use halyard_remote::{ChecksumFormat, CompressionFormat, DeploymentId, ErrorClass, HotloadRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PollSettings;
use crate::deployment::{DeploymentError, DeploymentManager};

/// When checkpoints get pushed to the deployment. A configuration choice,
/// not a code fork: the sync loop is identical, only `should_sync` and the
/// need for off-policy correction differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotloadCadence {
    /// Hotload after every optimizer step. Sampling lag is at most one step
    /// and importance-sampling correction is a no-op.
    EveryStep,
    /// Hotload every N steps. Sampling lag can reach N steps and correction
    /// is mandatory.
    Interval(u32),
}

impl HotloadCadence {
    pub fn should_sync(&self, step: u64) -> bool {
        match self {
            HotloadCadence::EveryStep => true,
            HotloadCadence::Interval(n) => step % u64::from(*n) == 0,
        }
    }

    pub fn requires_correction(&self) -> bool {
        matches!(self, HotloadCadence::Interval(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    pub cadence: HotloadCadence,
    pub hotload_timeout: Duration,
    pub max_hotload_attempts: u32,
    pub clip_epsilon: f64,
    pub checksum: ChecksumFormat,
    pub compression: CompressionFormat,
    pub poll: PollSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cadence: HotloadCadence::EveryStep,
            hotload_timeout: Duration::from_secs(300),
            max_hotload_attempts: 3,
            clip_epsilon: 0.2,
            checksum: ChecksumFormat::default(),
            compression: CompressionFormat::default(),
            poll: PollSettings::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("resolving checkpoint reference: {0}")]
    Ref(#[from] CheckpointRefError),
    #[error(
        "hotload of {checkpoint} onto {deployment} failed after {attempts} attempts: {last}"
    )]
    HotloadFailed {
        deployment: DeploymentId,
        checkpoint: String,
        attempts: u32,
        #[source]
        last: Box<DeploymentError>,
    },
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}

/// Result of one successful sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub current: HotloadGeneration,
    /// The generation that was serving before this cycle, now eligible for
    /// garbage collection by the caller.
    pub replaced: Option<HotloadGeneration>,
    pub checkpoint_ref: String,
    pub attempts: u32,
}

/// Drives the save -> hotload -> verify sequence: the single place where
/// training-side checkpoint state and serving-side loaded-weights state are
/// reconciled.
pub struct WeightSyncer {
    deployments: Arc<DeploymentManager>,
    deployment: DeploymentId,
    resolver: CheckpointRefResolver,
    config: SyncConfig,
    current: Option<HotloadGeneration>,
}

impl WeightSyncer {
    pub fn new(
        deployments: Arc<DeploymentManager>,
        deployment: DeploymentId,
        resolver: CheckpointRefResolver,
        config: SyncConfig,
    ) -> Self {
        Self {
            deployments,
            deployment,
            resolver,
            config,
            current: None,
        }
    }

    pub fn should_sync(&self, step: u64) -> bool {
        self.config.cadence.should_sync(step)
    }

    /// The corrector matching this syncer's cadence: a real clip under
    /// interval-based hotloads, a pass-through when every step syncs.
    pub fn corrector(&self) -> ImportanceCorrector {
        if self.config.cadence.requires_correction() {
            ImportanceCorrector::new(self.config.clip_epsilon)
        } else {
            ImportanceCorrector::disabled()
        }
    }

    pub fn current_generation(&self) -> Option<HotloadGeneration> {
        self.current
    }

    /// Runs one sync cycle for a checkpoint the trainer has already saved.
    ///
    /// On failure the whole hotload step (not the save) is retried up to the
    /// configured attempt cap; if every attempt fails the deployment stays
    /// on its last successfully loaded generation and the failure surfaces
    /// with context.
    pub async fn sync(
        &mut self,
        checkpoint: &CheckpointId,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let checkpoint_ref = self.resolver.resolve_id(checkpoint)?;
        let request = HotloadRequest {
            checkpoint_ref: checkpoint_ref.clone(),
            checksum: self.config.checksum,
            compression: self.config.compression,
        };

        let mut last_error = None;
        for attempt in 1..=self.config.max_hotload_attempts {
            match self.try_hotload(&request, cancel).await {
                Ok(generation) => {
                    let replaced = self.current.replace(generation);
                    info!(
                        deployment = %self.deployment,
                        %generation,
                        ?replaced,
                        checkpoint = %checkpoint_ref,
                        "weights synced"
                    );
                    return Ok(SyncOutcome {
                        current: generation,
                        replaced,
                        checkpoint_ref,
                        attempts: attempt,
                    });
                }
                Err(e) if !hotload_step_retryable(&e) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        deployment = %self.deployment,
                        attempt,
                        max_attempts = self.config.max_hotload_attempts,
                        error = %e,
                        "hotload attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        // unreachable only if max_hotload_attempts were 0, which config rejects
        let last = last_error.unwrap_or(DeploymentError::HotloadTimeout {
            id: self.deployment.clone(),
            generation: HotloadGeneration::default(),
            waited: Duration::ZERO,
        });
        if let DeploymentError::Remote(remote) = &last {
            warn!(
                "{}",
                remote.report(format!(
                    "hotloading {checkpoint_ref} onto {}",
                    self.deployment
                ))
            );
        }
        Err(SyncError::HotloadFailed {
            deployment: self.deployment.clone(),
            checkpoint: checkpoint_ref,
            attempts: self.config.max_hotload_attempts,
            last: Box::new(last),
        })
    }

    async fn try_hotload(
        &self,
        request: &HotloadRequest,
        cancel: &CancellationToken,
    ) -> Result<HotloadGeneration, DeploymentError> {
        let generation = self
            .deployments
            .hotload(&self.deployment, request.clone())
            .await?;
        self.deployments
            .wait_for_hotload_ready(
                &self.deployment,
                generation,
                self.config.hotload_timeout,
                cancel,
            )
            .await?;
        Ok(generation)
    }
}

/// Whether a failed hotload attempt is worth re-driving from the top.
/// Fatal classifications, cancellation and permanent rejections are not;
/// timeouts and exhausted transient retries are.
fn hotload_step_retryable(error: &DeploymentError) -> bool {
    match error {
        DeploymentError::HotloadTimeout { .. } => true,
        DeploymentError::Remote(e) => e.class() == ErrorClass::Transient,
        DeploymentError::Failed(_)
        | DeploymentError::DeadlineExceeded { .. }
        | DeploymentError::HotloadInProgress(_)
        | DeploymentError::Cancelled(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_step_cadence_syncs_every_step() {
        let cadence = HotloadCadence::EveryStep;
        assert!((0..16).all(|step| cadence.should_sync(step)));
        assert!(!cadence.requires_correction());
    }

    #[test]
    fn test_interval_cadence() {
        let cadence = HotloadCadence::Interval(4);
        let synced: Vec<u64> = (0..10).filter(|s| cadence.should_sync(*s)).collect();
        assert_eq!(synced, vec![0, 4, 8]);
        assert!(cadence.requires_correction());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(hotload_step_retryable(&DeploymentError::HotloadTimeout {
            id: DeploymentId::new("dep-1"),
            generation: HotloadGeneration::from_u64(2),
            waited: Duration::from_secs(1),
        }));
        assert!(!hotload_step_retryable(&DeploymentError::Cancelled(
            DeploymentId::new("dep-1")
        )));
        assert!(!hotload_step_retryable(&DeploymentError::Remote(
            halyard_remote::RemoteError::GenerationMismatch {
                expected: HotloadGeneration::from_u64(2),
                observed: HotloadGeneration::from_u64(3),
            }
        )));
    }
}
