use crate::error::{Result, TrackerError};
use crate::types::CoordinateSeries;

/// Per-frame distal-proximal distance [px].
///
/// x is taken from the column and y from the row on both landmarks.
pub fn elongation_px(distal: &CoordinateSeries, proximal: &CoordinateSeries) -> Result<Vec<f64>> {
    if distal.len() != proximal.len() {
        return Err(TrackerError::LengthMismatch {
            what: "proximal coordinates",
            expected: distal.len(),
            actual: proximal.len(),
        });
    }
    Ok(distal
        .points
        .iter()
        .zip(&proximal.points)
        .map(|(d, p)| {
            let dx = d.col - p.col;
            let dy = d.row - p.row;
            (dx * dx + dy * dy).sqrt()
        })
        .collect())
}

/// Elongation in millimetres, `factor` in px per mm.
pub fn elongation_mm(
    distal: &CoordinateSeries,
    proximal: &CoordinateSeries,
    factor: f64,
) -> Result<Vec<f64>> {
    if !(factor > 0.0) || !factor.is_finite() {
        return Err(TrackerError::InvalidConfig(format!(
            "conversion factor must be positive, got {}",
            factor
        )));
    }
    Ok(elongation_px(distal, proximal)?
        .into_iter()
        .map(|px| px / factor)
        .collect())
}
