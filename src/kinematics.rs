//! Kinematics Estimator
//! Derives per-frame displacement, speed and acceleration from a landmark trajectory.
//!
//! For frame i > 0, with Δt = 1 / fps:
//!   displacement  = p[i] - p[i-1]            (per axis, px)
//!   distance      = |displacement|           (px)
//!   speed         = distance / Δt            (px/s)
//!   acceleration  = |speed[i] - speed[i-1]| / Δt   (px/s²)
//! Frame 0 has no predecessor and is all zeros.
//!
//! Acceleration is the change of the scalar speed, so a reversal at constant
//! speed yields zero. The correction gate is tuned against this definition.

use crate::error::{Result, TrackerError};
use crate::types::{CoordinateSeries, KinematicRecord};

pub fn compute(series: &CoordinateSeries) -> Result<Vec<KinematicRecord>> {
    if !(series.fps > 0.0) || !series.fps.is_finite() {
        return Err(TrackerError::InvalidConfig(format!(
            "fps must be positive, got {}",
            series.fps
        )));
    }

    let dt = series.delta_t();
    let mut records = Vec::with_capacity(series.len());
    if series.is_empty() {
        return Ok(records);
    }

    records.push(KinematicRecord::default());
    for pair in series.points.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        let prev_speed = records.last().map_or(0.0, |r| r.speed);

        let disp_row = curr.row - prev.row;
        let disp_col = curr.col - prev.col;
        let distance = prev.distance_to(&curr);
        let speed = distance / dt;

        records.push(KinematicRecord {
            disp_row,
            disp_col,
            distance,
            speed,
            speed_row: disp_row / dt,
            speed_col: disp_col / dt,
            acceleration: (speed - prev_speed).abs() / dt,
        });
    }

    Ok(records)
}

/// Acceleration column of a kinematic series.
pub fn accelerations(records: &[KinematicRecord]) -> Vec<f64> {
    records.iter().map(|r| r.acceleration).collect()
}
