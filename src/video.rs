//! Frame sources and sinks.
//!
//! Container encode/decode is outside this crate: a "video" here is an ordered
//! image sequence on disk (one file per frame plus a `sequence.json` sidecar
//! carrying the fps) or an in-memory list of rasters.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

pub const SIDECAR_FILE: &str = "sequence.json";

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Decoded frames in presentation order.
pub trait FrameSource {
    fn fps(&self) -> f64;

    /// Next decoded frame, `None` once the sequence is exhausted.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}

/// Destination for produced frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceMeta {
    pub fps: f64,
    pub frame_count: usize,
}

/// Directory of frame images sorted by file name.
pub struct ImageSequence {
    files: VecDeque<PathBuf>,
    fps: f64,
}

impl ImageSequence {
    /// Open a frame directory.
    ///
    /// fps comes from the `sequence.json` sidecar when present, otherwise from
    /// `fps_hint`. A missing directory, an empty directory, or an unknown fps
    /// means there is nothing to process.
    pub fn open(dir: &Path, fps_hint: Option<f64>) -> Result<Self> {
        if !dir.is_dir() {
            return Err(TrackerError::SourceUnavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let files = list_images(dir)?;
        if files.is_empty() {
            return Err(TrackerError::SourceUnavailable(format!(
                "no frames in {}",
                dir.display()
            )));
        }

        let sidecar = dir.join(SIDECAR_FILE);
        let fps = if sidecar.is_file() {
            let meta: SequenceMeta = serde_json::from_reader(BufReader::new(File::open(&sidecar)?))?;
            meta.fps
        } else {
            fps_hint.ok_or_else(|| {
                TrackerError::SourceUnavailable(format!(
                    "fps unknown for {} (no {} and no hint)",
                    dir.display(),
                    SIDECAR_FILE
                ))
            })?
        };

        if !(fps > 0.0) || !fps.is_finite() {
            return Err(TrackerError::SourceUnavailable(format!(
                "invalid fps {} for {}",
                fps,
                dir.display()
            )));
        }

        log::info!(
            "Opened {} ({} frames, {:.3} fps)",
            dir.display(),
            files.len(),
            fps
        );

        Ok(Self {
            files: files.into(),
            fps,
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for ImageSequence {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        match self.files.pop_front() {
            Some(path) => Ok(Some(image::open(&path)?)),
            None => Ok(None),
        }
    }
}

/// Sorted image files in `dir` (sidecar excluded).
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Writes `frame_0000.png`, `frame_0001.png`, ... and the fps sidecar.
pub struct ImageSequenceWriter {
    dir: PathBuf,
    fps: f64,
    written: usize,
}

impl ImageSequenceWriter {
    pub fn create(dir: &Path, fps: f64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            fps,
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{:04}.png", index))
    }
}

impl FrameSink for ImageSequenceWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        frame.save(self.frame_path(self.written))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let meta = SequenceMeta {
            fps: self.fps,
            frame_count: self.written,
        };
        let writer = BufWriter::new(File::create(self.dir.join(SIDECAR_FILE))?);
        serde_json::to_writer_pretty(writer, &meta)?;
        log::info!(
            "Wrote {} frames to {} at {:.3} fps",
            self.written,
            self.dir.display(),
            self.fps
        );
        Ok(())
    }
}

/// Frames already decoded in memory.
pub struct MemorySource {
    frames: VecDeque<DynamicImage>,
    fps: f64,
}

impl MemorySource {
    pub fn new(frames: Vec<DynamicImage>, fps: f64) -> Self {
        Self {
            frames: frames.into(),
            fps,
        }
    }
}

impl FrameSource for MemorySource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        Ok(self.frames.pop_front())
    }
}

impl FrameSink for Vec<RgbImage> {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.push(frame.clone());
        Ok(())
    }
}
