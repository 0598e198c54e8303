//! Adaptive Trajectory Corrector
//!
//! One constant-velocity filter per landmark. Every frame runs `predict`.
//! Frames whose acceleration reaches the threshold are fused through `update`
//! and replaced by the filter estimate; all other frames keep the raw
//! detection and the filter is left at its predicted state (it is not pulled
//! back to the raw value).
//!
//! High acceleration triggers correction and low acceleration bypasses it,
//! which is the reverse of a conventional outlier-rejecting gate. Thresholds
//! downstream are calibrated against this polarity.

use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::error::{Result, TrackerError};
use crate::filters::cv_kalman::{ConstantVelocityKalman, CvKalmanState, FilterFault};
use crate::types::{CoordinateSeries, KinematicRecord, Landmark, LandmarkPoint};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectedPoint {
    pub raw: LandmarkPoint,
    pub corrected: LandmarkPoint,
    /// The emitted point came from the filter rather than the detector
    pub filter_applied: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectedSeries {
    pub landmark: Landmark,
    pub fps: f64,
    pub points: Vec<CorrectedPoint>,
}

impl CorrectedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The canonical output: emitted positions as a plain coordinate series.
    pub fn coordinates(&self) -> CoordinateSeries {
        CoordinateSeries::new(
            self.landmark,
            self.fps,
            self.points.iter().map(|p| p.corrected).collect(),
        )
    }

    pub fn corrections(&self) -> usize {
        self.points.iter().filter(|p| p.filter_applied).count()
    }

    /// RMS distance between emitted and raw positions [px]
    pub fn rms_deviation(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self
            .points
            .iter()
            .map(|p| p.raw.distance_to(&p.corrected).powi(2))
            .sum();
        (sum_sq / self.points.len() as f64).sqrt()
    }
}

/// Shared configuration, independent runtime state per `correct` call.
#[derive(Clone, Debug)]
pub struct AdaptiveTrajectoryCorrector {
    landmark: Landmark,
    config: CorrectorConfig,
}

impl AdaptiveTrajectoryCorrector {
    pub fn new(landmark: Landmark, config: &CorrectorConfig) -> Self {
        Self {
            landmark,
            config: *config,
        }
    }

    pub fn landmark(&self) -> Landmark {
        self.landmark
    }

    pub fn threshold(&self) -> f64 {
        self.config.acceleration_threshold
    }

    /// Correct a full series. `kinematics` must be derived from `series`.
    pub fn correct(
        &self,
        series: &CoordinateSeries,
        kinematics: &[KinematicRecord],
    ) -> Result<CorrectedSeries> {
        self.correct_with_state(series, kinematics)
            .map(|(corrected, _)| corrected)
    }

    /// Like [`correct`](Self::correct), also returning the final filter state.
    pub fn correct_with_state(
        &self,
        series: &CoordinateSeries,
        kinematics: &[KinematicRecord],
    ) -> Result<(CorrectedSeries, Option<CvKalmanState>)> {
        if kinematics.len() != series.len() {
            return Err(TrackerError::LengthMismatch {
                what: "kinematic records",
                expected: series.len(),
                actual: kinematics.len(),
            });
        }

        let mut output = CorrectedSeries {
            landmark: self.landmark,
            fps: series.fps,
            points: Vec::with_capacity(series.len()),
        };
        let (Some(first), Some(first_kin)) = (series.points.first(), kinematics.first()) else {
            return Ok((output, None));
        };

        let mut kf = ConstantVelocityKalman::new(
            series.delta_t(),
            *first,
            (first_kin.speed_row, first_kin.speed_col),
            &self.config,
        );
        let threshold = self.config.acceleration_threshold;

        for (frame, (raw, kin)) in series.points.iter().zip(kinematics).enumerate() {
            kf.predict();

            let point = if kin.acceleration >= threshold {
                kf.update(*raw).map_err(|fault| match fault {
                    FilterFault::SingularInnovation => TrackerError::SingularInnovation {
                        landmark: self.landmark,
                        frame,
                    },
                    FilterFault::NonFinite => TrackerError::NumericDegenerate(format!(
                        "{} filter state not finite at frame {}",
                        self.landmark, frame
                    )),
                })?;
                log::debug!(
                    "{} frame {}: acceleration {:.1} >= {:.1}, filter-corrected",
                    self.landmark,
                    frame,
                    kin.acceleration,
                    threshold
                );
                CorrectedPoint {
                    raw: *raw,
                    corrected: kf.position(),
                    filter_applied: true,
                }
            } else {
                CorrectedPoint {
                    raw: *raw,
                    corrected: *raw,
                    filter_applied: false,
                }
            };
            output.points.push(point);
        }

        log::info!(
            "{}: {} of {} frames filter-corrected (threshold {:.1})",
            self.landmark,
            output.corrections(),
            output.len(),
            threshold
        );

        Ok((output, Some(kf.get_state())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics;

    fn constant_series(n: usize, fps: f64) -> CoordinateSeries {
        CoordinateSeries::new(
            Landmark::Distal,
            fps,
            vec![LandmarkPoint::new(200.0, 120.0); n],
        )
    }

    #[test]
    fn test_constant_series_passes_through() {
        let series = constant_series(30, 50.0);
        let kin = kinematics::compute(&series).unwrap();
        let corrector = AdaptiveTrajectoryCorrector::new(Landmark::Distal, &CorrectorConfig::default());
        let out = corrector.correct(&series, &kin).unwrap();

        assert_eq!(out.len(), 30);
        assert_eq!(out.corrections(), 0);
        for (p, raw) in out.points.iter().zip(&series.points) {
            assert_eq!(p.corrected, *raw);
        }
        assert_eq!(out.rms_deviation(), 0.0);
    }

    #[test]
    fn test_single_jump_is_filter_corrected() {
        let mut series = constant_series(20, 50.0);
        series.points[10] = LandmarkPoint::new(200.0, 160.0);
        let kin = kinematics::compute(&series).unwrap();
        assert!(kin[10].acceleration >= 1121.0);
        assert!(kin[11].acceleration < 1121.0);

        let corrector = AdaptiveTrajectoryCorrector::new(Landmark::Distal, &CorrectorConfig::default());
        let out = corrector.correct(&series, &kin).unwrap();

        let jump = out.points[10];
        assert!(jump.filter_applied);
        assert_ne!(jump.corrected, jump.raw);
        // Pulled from the raw jump back toward the steady position
        assert!(jump.corrected.col < 160.0 && jump.corrected.col > 120.0);

        for idx in [9, 11] {
            assert!(!out.points[idx].filter_applied);
            assert_eq!(out.points[idx].corrected, series.points[idx]);
        }
    }

    #[test]
    fn test_gate_is_inclusive_at_threshold() {
        let series = constant_series(3, 10.0);
        let mut kin = kinematics::compute(&series).unwrap();
        kin[1].acceleration = 1121.0;
        let corrector = AdaptiveTrajectoryCorrector::new(Landmark::Proximal, &CorrectorConfig::default());
        let out = corrector.correct(&series, &kin).unwrap();
        assert!(out.points[1].filter_applied);
        assert!(!out.points[2].filter_applied);
    }

    #[test]
    fn test_filter_not_resynced_on_passthrough() {
        // Moving landmark below threshold: the filter keeps predicting from the
        // initial zero velocity and never sees the raw positions.
        let points: Vec<LandmarkPoint> = (0..10)
            .map(|i| LandmarkPoint::new(100.0, 100.0 + i as f64))
            .collect();
        let series = CoordinateSeries::new(Landmark::Distal, 50.0, points);
        let kin = kinematics::compute(&series).unwrap();
        let corrector = AdaptiveTrajectoryCorrector::new(Landmark::Distal, &CorrectorConfig::default());
        let (out, state) = corrector.correct_with_state(&series, &kin).unwrap();

        // First step: speed 50 px/s → acceleration 2500 ≥ threshold, corrected once.
        assert!(out.points[1].filter_applied);
        assert_eq!(out.corrections(), 1);
        let state = state.unwrap();
        assert_eq!(state.predict_count, 10);
        assert_eq!(state.update_count, 1);
        assert!(state.position.1 < 109.0);
    }

    #[test]
    fn test_length_mismatch() {
        let series = constant_series(5, 30.0);
        let kin = kinematics::compute(&constant_series(4, 30.0)).unwrap();
        let corrector = AdaptiveTrajectoryCorrector::new(Landmark::Distal, &CorrectorConfig::default());
        assert!(matches!(
            corrector.correct(&series, &kin),
            Err(TrackerError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_series() {
        let series = constant_series(0, 30.0);
        let corrector = AdaptiveTrajectoryCorrector::new(Landmark::Distal, &CorrectorConfig::default());
        let out = corrector.correct(&series, &[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_instances_are_independent() {
        let mut distal = constant_series(12, 50.0);
        distal.points[6] = LandmarkPoint::new(260.0, 120.0);
        let proximal = CoordinateSeries::new(
            Landmark::Proximal,
            50.0,
            vec![LandmarkPoint::new(210.0, 400.0); 12],
        );
        let config = CorrectorConfig::default();
        let a = AdaptiveTrajectoryCorrector::new(Landmark::Distal, &config);
        let b = AdaptiveTrajectoryCorrector::new(Landmark::Proximal, &config);

        let out_a = a.correct(&distal, &kinematics::compute(&distal).unwrap()).unwrap();
        let out_b = b.correct(&proximal, &kinematics::compute(&proximal).unwrap()).unwrap();
        assert!(out_a.corrections() > 0);
        assert_eq!(out_b.corrections(), 0);

        // Re-running gives identical output: no state leaks between calls.
        let again = a.correct(&distal, &kinematics::compute(&distal).unwrap()).unwrap();
        assert_eq!(again, out_a);
    }
}
