//! Trajectory overlay for visual review.
//!
//! Draws one filled marker per landmark on each frame: distal green, proximal
//! blue. Works on raw detections as well as filter output.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

use crate::config::PipelineConfig;
use crate::error::{Result, TrackerError};
use crate::types::{CoordinateSeries, LandmarkPoint, SkipReason, StageReport};
use crate::video::FrameSink;

pub const DISTAL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const PROXIMAL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

#[derive(Clone, Debug)]
pub struct TrajectoryVisualizer {
    radius: i32,
}

impl TrajectoryVisualizer {
    pub fn new(radius: i32) -> Self {
        Self { radius }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.marker_radius_px)
    }

    /// Draw both markers on a copy of every frame referenced by the series.
    ///
    /// Series entry `i` belongs to `frames[frame_indices[i]]`. Entries whose
    /// frame is missing are skipped and reported.
    pub fn annotate(
        &self,
        frames: &[RgbImage],
        frame_indices: &[usize],
        distal: &CoordinateSeries,
        proximal: &CoordinateSeries,
    ) -> Result<(Vec<RgbImage>, StageReport)> {
        for (what, len) in [("distal coordinates", distal.len()), ("proximal coordinates", proximal.len())] {
            if len != frame_indices.len() {
                return Err(TrackerError::LengthMismatch {
                    what,
                    expected: frame_indices.len(),
                    actual: len,
                });
            }
        }

        let mut report = StageReport::default();
        let mut annotated = Vec::with_capacity(frame_indices.len());

        for ((&index, d), p) in frame_indices.iter().zip(&distal.points).zip(&proximal.points) {
            let Some(frame) = frames.get(index) else {
                report.skip(index, SkipReason::MissingFrame);
                continue;
            };
            let mut canvas = frame.clone();
            self.draw_marker(&mut canvas, d, DISTAL_COLOR);
            self.draw_marker(&mut canvas, p, PROXIMAL_COLOR);
            annotated.push(canvas);
            report.processed += 1;
        }

        Ok((annotated, report))
    }

    /// Annotate and write every frame through `sink`, then finish it.
    pub fn export(
        &self,
        frames: &[RgbImage],
        frame_indices: &[usize],
        distal: &CoordinateSeries,
        proximal: &CoordinateSeries,
        sink: &mut dyn FrameSink,
    ) -> Result<StageReport> {
        let (annotated, report) = self.annotate(frames, frame_indices, distal, proximal)?;
        for frame in &annotated {
            sink.write_frame(frame)?;
        }
        sink.finish()?;
        log::info!(
            "Exported {} annotated frames ({} skipped)",
            annotated.len(),
            report.skipped_count()
        );
        Ok(report)
    }

    fn draw_marker(&self, canvas: &mut RgbImage, point: &LandmarkPoint, color: Rgb<u8>) {
        // Truncation toward zero, not rounding
        let center = (point.col as i32, point.row as i32);
        draw_filled_circle_mut(canvas, center, self.radius, color);
    }
}
