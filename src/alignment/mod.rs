//! Force–Elongation Aligner
//!
//! The force trace is captured by a separate device at its own rate. It is
//! resampled onto the video frame grid, paired with the tendon elongation of
//! each frame, and the lag maximising their cross-correlation is reported.
//! Both recordings are assumed to start and stop together.

pub mod elongation;
pub mod resample;
pub mod xcorr;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{Result, TrackerError};
use crate::types::CoordinateSeries;

pub use elongation::{elongation_mm, elongation_px};
pub use resample::resample_fft;
pub use xcorr::{cross_correlate, estimate_lag, LagEstimate};

/// Relative disagreement between force and video durations tolerated silently.
const DURATION_TOLERANCE: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignedRow {
    /// 1-based frame number
    pub frame: usize,
    pub force: f64,
    pub elongation_mm: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignedDataset {
    pub rows: Vec<AlignedRow>,
    /// `None` when no coordinates were available to correlate against
    pub lag: Option<LagEstimate>,
}

impl AlignedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn force(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.force).collect()
    }

    pub fn elongation(&self) -> Option<Vec<f64>> {
        self.rows.iter().map(|r| r.elongation_mm).collect()
    }
}

#[derive(Clone, Debug)]
pub struct ForceElongationAligner {
    force_rate_hz: f64,
    /// Pixels per millimetre
    conversion_factor: f64,
}

impl ForceElongationAligner {
    pub fn new(force_rate_hz: f64, conversion_factor: f64) -> Self {
        Self {
            force_rate_hz,
            conversion_factor,
        }
    }

    pub fn from_config(config: &PipelineConfig, conversion_factor: f64) -> Self {
        Self::new(config.force_sample_rate_hz, conversion_factor)
    }

    pub fn conversion_factor(&self) -> f64 {
        self.conversion_factor
    }

    /// Resample `force` to `frame_count` samples and, when coordinates are
    /// given, attach elongation and the force/elongation lag.
    pub fn align(
        &self,
        force: &[f64],
        coordinates: Option<(&CoordinateSeries, &CoordinateSeries)>,
        frame_count: usize,
        fps: f64,
    ) -> Result<AlignedDataset> {
        if force.is_empty() {
            return Err(TrackerError::EmptySeries("force samples"));
        }
        if frame_count == 0 {
            return Err(TrackerError::EmptySeries("video frames"));
        }
        if !(fps > 0.0) {
            return Err(TrackerError::InvalidConfig(format!("fps must be positive, got {}", fps)));
        }

        self.check_durations(force.len(), frame_count, fps);

        let elongation = match coordinates {
            Some((distal, proximal)) => {
                if distal.len() != frame_count {
                    return Err(TrackerError::LengthMismatch {
                        what: "distal coordinates",
                        expected: frame_count,
                        actual: distal.len(),
                    });
                }
                Some(elongation_mm(distal, proximal, self.conversion_factor)?)
            }
            None => {
                log::warn!("No coordinates available, skipping elongation and cross-correlation");
                None
            }
        };

        let resampled = resample_fft(force, frame_count)?;

        let lag = match &elongation {
            Some(elong) => {
                let estimate = estimate_lag(&resampled, elong, fps)?;
                match estimate.peak_correlation {
                    Some(peak) => log::info!(
                        "Force/elongation lag: {} frames ({:.4} s), peak correlation {:.3}",
                        estimate.lag_frames,
                        estimate.lag_seconds,
                        peak
                    ),
                    None => log::info!("Force/elongation lag undefined, reported as 0"),
                }
                Some(estimate)
            }
            None => None,
        };

        let rows = resampled
            .iter()
            .enumerate()
            .map(|(i, &f)| AlignedRow {
                frame: i + 1,
                force: f,
                elongation_mm: elongation.as_ref().map(|e| e[i]),
            })
            .collect();

        Ok(AlignedDataset { rows, lag })
    }

    fn check_durations(&self, force_len: usize, frame_count: usize, fps: f64) {
        let force_secs = force_len as f64 / self.force_rate_hz;
        let video_secs = frame_count as f64 / fps;
        let relative = (force_secs - video_secs).abs() / video_secs;
        if relative > DURATION_TOLERANCE {
            log::warn!(
                "Force duration {:.2} s differs from video duration {:.2} s by {:.1}%, alignment may be unreliable",
                force_secs,
                video_secs,
                relative * 100.0
            );
        }
    }
}
