//! Pipeline configuration
//!
//! Every tuning constant of the pipeline lives here. Values can be loaded from
//! a JSON file; missing fields fall back to the defaults below.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Pixels per millimetre used when no calibration file is available.
pub const FALLBACK_CONVERSION_FACTOR: f64 = 6.48;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Canonical frame height (rows)
    pub canonical_height: u32,
    /// Canonical frame width (columns)
    pub canonical_width: u32,
    /// Intensity strictly below this value counts as border
    pub darkness_threshold: u8,
    /// Row scanned for left/right bounds, as a fraction of frame height
    pub scan_row_fraction: f64,
    /// Sensor artifact band always removed from the bottom
    pub bottom_trim_px: u32,

    pub heatmap_height: usize,
    pub heatmap_width: usize,
    /// Minimum horizontal gap between distal and proximal (0 disables the check)
    pub min_landmark_separation_px: f64,

    pub corrector: CorrectorConfig,

    /// Force acquisition rate [Hz]
    pub force_sample_rate_hz: f64,
    /// Column holding the force samples in the force CSV
    pub force_column: String,
    /// Pixels per millimetre when the calibration file is unusable
    pub fallback_conversion_factor: f64,
    /// Align against filter output (true) or raw detections (false)
    pub use_corrected_coordinates: bool,

    pub marker_radius_px: i32,
}

/// Gating threshold and noise tuning shared by both landmark filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    /// Frames with acceleration >= threshold are filter-corrected [px/s²]
    pub acceleration_threshold: f64,
    /// Diagonal of the initial covariance
    pub initial_covariance: f64,
    /// Diagonal of the process noise Q
    pub process_noise: f64,
    /// Diagonal of the measurement noise R
    pub measurement_noise: f64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            acceleration_threshold: 1121.0,
            initial_covariance: 0.1,
            process_noise: 0.1,
            measurement_noise: 1.0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonical_height: 632,
            canonical_width: 508,
            darkness_threshold: 10,
            scan_row_fraction: 0.75,
            bottom_trim_px: 20,
            heatmap_height: 224,
            heatmap_width: 224,
            min_landmark_separation_px: 0.0,
            corrector: CorrectorConfig::default(),
            force_sample_rate_hz: 1000.0,
            force_column: "Force_right".to_string(),
            fallback_conversion_factor: FALLBACK_CONVERSION_FACTOR,
            use_corrected_coordinates: true,
            marker_radius_px: 4,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.canonical_height == 0 || self.canonical_width == 0 {
            return Err(TrackerError::InvalidConfig(
                "canonical frame size must be non-zero".to_string(),
            ));
        }
        if self.heatmap_height == 0 || self.heatmap_width < 2 {
            return Err(TrackerError::InvalidConfig(
                "heatmap must be at least 1 row and 2 columns".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.scan_row_fraction) {
            return Err(TrackerError::InvalidConfig(format!(
                "scan_row_fraction {} outside [0, 1)",
                self.scan_row_fraction
            )));
        }
        if !(self.force_sample_rate_hz > 0.0) {
            return Err(TrackerError::InvalidConfig(
                "force_sample_rate_hz must be positive".to_string(),
            ));
        }
        if !(self.fallback_conversion_factor > 0.0) {
            return Err(TrackerError::InvalidConfig(
                "fallback_conversion_factor must be positive".to_string(),
            ));
        }
        if self.marker_radius_px < 0 {
            return Err(TrackerError::InvalidConfig(
                "marker_radius_px must be non-negative".to_string(),
            ));
        }
        let c = &self.corrector;
        if !c.acceleration_threshold.is_finite() {
            return Err(TrackerError::InvalidConfig(
                "acceleration_threshold must be finite".to_string(),
            ));
        }
        if !(c.initial_covariance > 0.0 && c.process_noise >= 0.0 && c.measurement_noise > 0.0)
        {
            return Err(TrackerError::InvalidConfig(
                "filter covariances must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the px→mm factor from a calibration file.
    ///
    /// Any problem (absent, unreadable, not a number, not positive) falls back
    /// to `fallback_conversion_factor` with a warning.
    pub fn conversion_factor(&self, path: Option<&Path>) -> f64 {
        let Some(path) = path else {
            log::info!(
                "No conversion factor file given, using fallback {}",
                self.fallback_conversion_factor
            );
            return self.fallback_conversion_factor;
        };

        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!(
                    "Could not read conversion factor from {}: {} (using {})",
                    path.display(),
                    e,
                    self.fallback_conversion_factor
                );
                return self.fallback_conversion_factor;
            }
        };

        match content.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => v,
            _ => {
                log::warn!(
                    "Invalid conversion factor {:?} in {} (using {})",
                    content.trim(),
                    path.display(),
                    self.fallback_conversion_factor
                );
                self.fallback_conversion_factor
            }
        }
    }
}
