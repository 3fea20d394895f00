use serde::Serialize;
use tracing::debug;

/// Log-probabilities and advantage for one sampled sequence. The behavior
/// log-probability was captured at sampling time against whatever generation
/// the deployment was serving; the current one comes from the trainer at the
/// present step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceSample {
    pub behavior_logprob: Option<f64>,
    pub current_logprob: f64,
    pub advantage: f64,
}

/// Diagnostics over the unclipped ratios of one corrected batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ImportanceStats {
    pub sequences: usize,
    /// Sequences dropped for a missing or non-finite behavior log-probability.
    pub excluded: usize,
    pub clipped_fraction: f64,
    pub mean_ratio: f64,
    /// Largest |rho - 1| seen before clipping.
    pub max_deviation: f64,
}

/// Off-policy correction for samples produced by a stale generation.
///
/// `rho = exp(logp_current - logp_behavior)` per sequence, clipped to
/// `[1 - epsilon, 1 + epsilon]` before it multiplies the advantage term.
/// With a synchronous hotload cadence the sampling policy lags by at most
/// one step and `rho` is defined to be exactly 1; construct with
/// [`ImportanceCorrector::disabled`] for that case.
#[derive(Debug, Clone, Copy)]
pub struct ImportanceCorrector {
    epsilon: f64,
    enabled: bool,
}

/// Per-sequence loss terms plus batch diagnostics. A `None` term means the
/// sequence is excluded from the loss entirely rather than contributing a
/// NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedBatch {
    pub loss_terms: Vec<Option<f64>>,
    pub stats: ImportanceStats,
}

impl ImportanceCorrector {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            enabled: true,
        }
    }

    /// Correction for the synchronous cadence: every weight is exactly the
    /// advantage, nothing is clipped or excluded.
    pub fn disabled() -> Self {
        Self {
            epsilon: 0.0,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ratio(&self, behavior_logprob: f64, current_logprob: f64) -> f64 {
        (current_logprob - behavior_logprob).exp()
    }

    pub fn clip(&self, rho: f64) -> f64 {
        rho.clamp(1.0 - self.epsilon, 1.0 + self.epsilon)
    }

    pub fn correct(&self, samples: &[SequenceSample]) -> CorrectedBatch {
        let mut loss_terms = Vec::with_capacity(samples.len());
        let mut excluded = 0usize;
        let mut clipped = 0usize;
        let mut ratio_sum = 0.0f64;
        let mut max_deviation = 0.0f64;
        let mut included = 0usize;

        for sample in samples {
            if !self.enabled {
                loss_terms.push(Some(sample.advantage));
                ratio_sum += 1.0;
                included += 1;
                continue;
            }
            let rho = match sample.behavior_logprob {
                Some(behavior) if behavior.is_finite() && sample.current_logprob.is_finite() => {
                    self.ratio(behavior, sample.current_logprob)
                }
                _ => {
                    debug!("excluding sequence with missing or non-finite behavior logprob");
                    excluded += 1;
                    loss_terms.push(None);
                    continue;
                }
            };
            if !rho.is_finite() {
                excluded += 1;
                loss_terms.push(None);
                continue;
            }
            if rho < 1.0 - self.epsilon || rho > 1.0 + self.epsilon {
                clipped += 1;
            }
            ratio_sum += rho;
            max_deviation = max_deviation.max((rho - 1.0).abs());
            included += 1;
            loss_terms.push(Some(self.clip(rho) * sample.advantage));
        }

        let stats = ImportanceStats {
            sequences: samples.len(),
            excluded,
            clipped_fraction: if included == 0 {
                0.0
            } else {
                clipped as f64 / included as f64
            },
            mean_ratio: if included == 0 {
                0.0
            } else {
                ratio_sum / included as f64
            },
            max_deviation,
        };
        CorrectedBatch { loss_terms, stats }
    }
}
