//! Frame Normalizer
//!
//! Extracts the ultrasound window from each raw frame and brings it to the
//! canonical size:
//!
//! 1. Left/right bounds: first and last sub-threshold pixel on a fixed scan row
//!    (75% of the frame height).
//! 2. Top bound: first row holding any sub-threshold pixel.
//! 3. The bottom artifact band is always trimmed.
//! 4. Aspect-preserving rescale into the canonical box, black padding around.
//!
//! Frames where the left/right bounds cannot be found are dropped; nothing is
//! emitted in their place.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};

use crate::config::PipelineConfig;
use crate::error::{Result, TrackerError};
use crate::types::{SkipReason, StageReport};
use crate::video::{FrameSink, FrameSource};

/// Crop rectangle in source pixels. `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBounds {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropBounds {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

#[derive(Debug, Clone)]
pub struct FrameNormalizer {
    width: u32,
    height: u32,
    threshold: u8,
    scan_row_fraction: f64,
    bottom_trim: u32,
}

/// Output of a full normalization pass.
pub struct NormalizedVideo {
    pub frames: Vec<RgbImage>,
    pub fps: f64,
    pub report: StageReport,
}

impl FrameNormalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            width: config.canonical_width,
            height: config.canonical_height,
            threshold: config.darkness_threshold,
            scan_row_fraction: config.scan_row_fraction,
            bottom_trim: config.bottom_trim_px,
        }
    }

    /// Canonical (width, height)
    pub fn canonical_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Locate the ultrasound window on a single-channel view of the frame.
    pub fn detect_crop(&self, gray: &GrayImage) -> std::result::Result<CropBounds, SkipReason> {
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return Err(SkipReason::DegenerateCrop {
                width: w as i64,
                height: h as i64,
            });
        }

        let scan_row = ((h as f64 * self.scan_row_fraction) as u32).min(h - 1);
        let is_dark = |x: u32, y: u32| gray.get_pixel(x, y)[0] < self.threshold;

        let left = (0..w).find(|&x| is_dark(x, scan_row));
        let right = (0..w).rev().find(|&x| is_dark(x, scan_row));
        let (left, right) = match (left, right) {
            (Some(l), Some(r)) => (l, r),
            _ => return Err(SkipReason::CropBoundsNotFound),
        };

        let top = (0..h)
            .find(|&y| (0..w).any(|x| is_dark(x, y)))
            .unwrap_or(0);
        let bottom = h.saturating_sub(self.bottom_trim);

        let bounds = CropBounds {
            left,
            right,
            top,
            bottom,
        };
        if bounds.width() == 0 || bounds.height() == 0 {
            return Err(SkipReason::DegenerateCrop {
                width: right as i64 - left as i64,
                height: bottom as i64 - top as i64,
            });
        }
        Ok(bounds)
    }

    /// Crop, rescale and pad one frame to exactly the canonical size.
    pub fn normalize(&self, frame: &DynamicImage) -> std::result::Result<RgbImage, SkipReason> {
        let bounds = self.detect_crop(&frame.to_luma8())?;

        let rgb = frame.to_rgb8();
        let cropped = imageops::crop_imm(
            &rgb,
            bounds.left,
            bounds.top,
            bounds.width(),
            bounds.height(),
        )
        .to_image();

        let (cw, ch) = (bounds.width() as f64, bounds.height() as f64);
        let scale = (self.width as f64 / cw).min(self.height as f64 / ch);
        let new_w = ((cw * scale) as u32).clamp(1, self.width);
        let new_h = ((ch * scale) as u32).clamp(1, self.height);

        let resized = if (new_w, new_h) == cropped.dimensions() {
            cropped
        } else {
            imageops::resize(&cropped, new_w, new_h, FilterType::Triangle)
        };

        let pad_top = (self.height - new_h) / 2;
        let pad_left = (self.width - new_w) / 2;

        let mut canvas = RgbImage::new(self.width, self.height);
        imageops::overlay(&mut canvas, &resized, pad_left as i64, pad_top as i64);
        Ok(canvas)
    }

    /// Normalize every frame of a source, forwarding kept frames to `sink`.
    pub fn normalize_source(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<NormalizedVideo> {
        let fps = source.fps();
        let mut frames = Vec::new();
        let mut report = StageReport::default();
        let mut index = 0usize;

        while let Some(frame) = source.next_frame()? {
            match self.normalize(&frame) {
                Ok(canonical) => {
                    sink.write_frame(&canonical)?;
                    frames.push(canonical);
                    report.processed += 1;
                }
                Err(reason) => report.skip(index, reason),
            }
            index += 1;
        }
        sink.finish()?;

        if index == 0 {
            return Err(TrackerError::SourceUnavailable(
                "frame source produced no frames".to_string(),
            ));
        }

        log::info!(
            "Normalized {} of {} frames to {}x{} ({} skipped)",
            report.processed,
            index,
            self.width,
            self.height,
            report.skipped_count()
        );

        Ok(NormalizedVideo {
            frames,
            fps,
            report,
        })
    }
}
