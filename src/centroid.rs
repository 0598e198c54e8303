//! Centroid Extractor
//!
//! Turns a per-frame heatmap into the two landmark positions. The heatmap is
//! split at the vertical midline; in each half the centroid of the pixels that
//! share the maximum value is taken. Left half is the distal insertion, right
//! half the proximal one. Nothing validates that the landmarks stay on their
//! side of the midline; the optional separation check only flags frames.

use std::path::{Path, PathBuf};

use ndarray::{s, Array2, ArrayView2};

use crate::config::PipelineConfig;
use crate::error::{Result, TrackerError};
use crate::types::{
    CoordinateSeries, Landmark, LandmarkPair, LandmarkPoint, SkipReason, StageReport,
};

/// Per-frame likelihood fields produced by the external detector.
pub trait HeatmapSource {
    /// `Ok(None)` when the detector produced nothing for this frame.
    fn heatmap(&self, frame_index: usize) -> Result<Option<Array2<f32>>>;
}

impl HeatmapSource for Vec<Option<Array2<f32>>> {
    fn heatmap(&self, frame_index: usize) -> Result<Option<Array2<f32>>> {
        Ok(self.get(frame_index).cloned().flatten())
    }
}

/// Prediction images on disk, `frame_0000_prediction.png` style.
pub struct HeatmapDirectory {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl HeatmapDirectory {
    pub fn new(dir: &Path) -> Self {
        Self::with_pattern(dir, "frame_", "_prediction.png")
    }

    pub fn with_pattern(dir: &Path, prefix: &str, suffix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }

    pub fn path_for(&self, frame_index: usize) -> PathBuf {
        self.dir
            .join(format!("{}{:04}{}", self.prefix, frame_index, self.suffix))
    }
}

impl HeatmapSource for HeatmapDirectory {
    fn heatmap(&self, frame_index: usize) -> Result<Option<Array2<f32>>> {
        let path = self.path_for(frame_index);
        if !path.is_file() {
            return Ok(None);
        }
        load_heatmap_png(&path).map(Some)
    }
}

/// Grayscale prediction image scaled to [0, 1].
pub fn load_heatmap_png(path: &Path) -> Result<Array2<f32>> {
    let gray = image::open(path)?.to_luma8();
    let (w, h) = gray.dimensions();
    Ok(Array2::from_shape_fn((h as usize, w as usize), |(r, c)| {
        gray.get_pixel(c as u32, r as u32)[0] as f32 / 255.0
    }))
}

/// Unweighted centroid of the pixels equal to the maximum of `view`.
fn plateau_centroid(view: ArrayView2<f32>) -> Option<LandmarkPoint> {
    let max = view
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return None;
    }

    let (mut sum_row, mut sum_col, mut count) = (0.0f64, 0.0f64, 0usize);
    for ((r, c), &v) in view.indexed_iter() {
        if v == max {
            sum_row += r as f64;
            sum_col += c as f64;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some(LandmarkPoint::new(
        sum_row / count as f64,
        sum_col / count as f64,
    ))
}

/// Hottest-plateau centroids of the left and right halves, in heatmap pixels.
pub fn hottest_centroids(heatmap: &Array2<f32>) -> Result<(LandmarkPoint, LandmarkPoint)> {
    let (h, w) = heatmap.dim();
    if h == 0 || w < 2 {
        return Err(TrackerError::EmptySeries("heatmap half"));
    }
    let mid = w / 2;

    let left = plateau_centroid(heatmap.slice(s![.., ..mid])).ok_or_else(|| {
        TrackerError::NumericDegenerate("left heatmap half has no finite maximum".to_string())
    })?;
    let mut right = plateau_centroid(heatmap.slice(s![.., mid..])).ok_or_else(|| {
        TrackerError::NumericDegenerate("right heatmap half has no finite maximum".to_string())
    })?;
    right.col += mid as f64;

    Ok((left, right))
}

/// Coordinate series built from a batch of heatmaps.
#[derive(Debug, Clone)]
pub struct CentroidSeries {
    pub distal: CoordinateSeries,
    pub proximal: CoordinateSeries,
    /// Source frame index of each series entry
    pub frame_indices: Vec<usize>,
    pub report: StageReport,
}

pub struct CentroidExtractor {
    heatmap_shape: (usize, usize),
    scale_row: f64,
    scale_col: f64,
    min_separation: f64,
}

impl CentroidExtractor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            heatmap_shape: (config.heatmap_height, config.heatmap_width),
            scale_row: config.canonical_height as f64 / config.heatmap_height as f64,
            scale_col: config.canonical_width as f64 / config.heatmap_width as f64,
            min_separation: config.min_landmark_separation_px,
        }
    }

    /// Landmarks of one frame in canonical-frame pixels.
    pub fn extract(&self, heatmap: &Array2<f32>) -> Result<LandmarkPair> {
        if heatmap.dim() != self.heatmap_shape {
            return Err(TrackerError::LengthMismatch {
                what: "heatmap shape",
                expected: self.heatmap_shape.0 * self.heatmap_shape.1,
                actual: heatmap.len(),
            });
        }
        let (left, right) = hottest_centroids(heatmap)?;
        Ok(LandmarkPair {
            distal: self.to_canonical(left),
            proximal: self.to_canonical(right),
        })
    }

    fn to_canonical(&self, p: LandmarkPoint) -> LandmarkPoint {
        LandmarkPoint::new(p.row * self.scale_row, p.col * self.scale_col)
    }

    /// Horizontal gap is below the configured minimum (or the landmarks crossed).
    pub fn separation_violated(&self, pair: &LandmarkPair) -> bool {
        self.min_separation > 0.0 && pair.proximal.col - pair.distal.col < self.min_separation
    }

    /// Run over `frame_count` frames. Frames without a usable heatmap are
    /// skipped and reported; the batch continues.
    pub fn extract_series(
        &self,
        frame_count: usize,
        heatmaps: &dyn HeatmapSource,
        fps: f64,
    ) -> Result<CentroidSeries> {
        let mut distal = Vec::with_capacity(frame_count);
        let mut proximal = Vec::with_capacity(frame_count);
        let mut frame_indices = Vec::with_capacity(frame_count);
        let mut report = StageReport::default();

        for index in 0..frame_count {
            let heatmap = match heatmaps.heatmap(index) {
                Ok(Some(h)) => h,
                Ok(None) => {
                    report.skip(index, SkipReason::MissingHeatmap);
                    continue;
                }
                Err(e) => {
                    report.skip(
                        index,
                        SkipReason::UnreadableHeatmap {
                            message: e.to_string(),
                        },
                    );
                    continue;
                }
            };

            let pair = match self.extract(&heatmap) {
                Ok(p) => p,
                Err(e) => {
                    report.skip(
                        index,
                        SkipReason::UnreadableHeatmap {
                            message: e.to_string(),
                        },
                    );
                    continue;
                }
            };

            if self.separation_violated(&pair) {
                report.warn(format!(
                    "Frame {}: landmarks {:.1}px apart horizontally (minimum {:.1}px)",
                    index,
                    pair.proximal.col - pair.distal.col,
                    self.min_separation
                ));
            }

            distal.push(pair.distal);
            proximal.push(pair.proximal);
            frame_indices.push(index);
            report.processed += 1;
        }

        log::info!(
            "Extracted centroids for {} of {} frames ({} skipped)",
            report.processed,
            frame_count,
            report.skipped_count()
        );

        Ok(CentroidSeries {
            distal: CoordinateSeries::new(Landmark::Distal, fps, distal),
            proximal: CoordinateSeries::new(Landmark::Proximal, fps, proximal),
            frame_indices,
            report,
        })
    }
}
