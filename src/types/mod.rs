pub mod linalg;

pub use linalg::*;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tendon insertion being tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Landmark {
    Distal,
    Proximal,
}

impl Landmark {
    pub const ALL: [Landmark; 2] = [Landmark::Distal, Landmark::Proximal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Landmark::Distal => "distal",
            Landmark::Proximal => "proximal",
        }
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in canonical-frame pixels. Origin top-left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub row: f64,
    pub col: f64,
}

impl LandmarkPoint {
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    pub fn distance_to(&self, other: &LandmarkPoint) -> f64 {
        let d_row = other.row - self.row;
        let d_col = other.col - self.col;
        (d_row * d_row + d_col * d_col).sqrt()
    }
}

/// Both insertions detected on one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPair {
    pub distal: LandmarkPoint,
    pub proximal: LandmarkPoint,
}

/// One point per processed frame, gap-free, sharing a single fps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSeries {
    pub landmark: Landmark,
    pub fps: f64,
    pub points: Vec<LandmarkPoint>,
}

impl CoordinateSeries {
    pub fn new(landmark: Landmark, fps: f64, points: Vec<LandmarkPoint>) -> Self {
        Self {
            landmark,
            fps,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Time step between frames [seconds]
    pub fn delta_t(&self) -> f64 {
        1.0 / self.fps
    }
}

/// Per-frame motion derived from a coordinate series.
///
/// Frame 0 is all zeros. `acceleration` is the magnitude of the change in
/// scalar speed, not a vector quantity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KinematicRecord {
    pub disp_row: f64,
    pub disp_col: f64,
    pub distance: f64,
    pub speed: f64,
    pub speed_row: f64,
    pub speed_col: f64,
    pub acceleration: f64,
}

/// Why a frame was dropped from a batch stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// No sub-threshold pixel on the scan row
    CropBoundsNotFound,
    /// Bounds found but the crop has no area
    DegenerateCrop { width: i64, height: i64 },
    MissingHeatmap,
    UnreadableHeatmap { message: String },
    MissingFrame,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::CropBoundsNotFound => write!(f, "left/right crop bounds not found"),
            SkipReason::DegenerateCrop { width, height } => {
                write!(f, "degenerate crop {}x{}", width, height)
            }
            SkipReason::MissingHeatmap => write!(f, "no heatmap for frame"),
            SkipReason::UnreadableHeatmap { message } => {
                write!(f, "heatmap unreadable: {}", message)
            }
            SkipReason::MissingFrame => write!(f, "no frame for index"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedFrame {
    pub index: usize,
    pub reason: SkipReason,
}

/// Batch-level outcome of a stage: what went through, what was dropped and why.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub processed: usize,
    pub skipped: Vec<SkippedFrame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StageReport {
    pub fn skip(&mut self, index: usize, reason: SkipReason) {
        log::warn!("Skipping frame {}: {}", index, reason);
        self.skipped.push(SkippedFrame { index, reason });
    }

    pub fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}
