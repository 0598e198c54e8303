//! Sequential tracking pipeline.
//!
//! heatmaps -> centroids -> kinematics -> per-landmark correction -> force
//! alignment, with an optional overlay export for review. Each finished stage
//! emits a [`StageEvent`] on the channel supplied by the caller, if any.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::alignment::{AlignedDataset, ForceElongationAligner, LagEstimate};
use crate::centroid::{CentroidExtractor, CentroidSeries, HeatmapSource};
use crate::config::PipelineConfig;
use crate::error::{Result, TrackerError};
use crate::filters::{AdaptiveTrajectoryCorrector, CorrectedSeries};
use crate::kinematics;
use crate::preprocess::{FrameNormalizer, NormalizedVideo};
use crate::tables;
use crate::types::{KinematicRecord, Landmark, StageReport};
use crate::video::{FrameSink, FrameSource};
use crate::visualize::TrajectoryVisualizer;

/// Completion notice for one pipeline stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageEvent {
    FramesNormalized { kept: usize, skipped: usize },
    CentroidsExtracted { tracked: usize, skipped: usize },
    KinematicsComputed { frames: usize },
    TrajectoryCorrected { landmark: Landmark, corrected: usize, total: usize },
    ForceAligned { frames: usize, lag_frames: Option<i64> },
    VisualizationExported { written: usize, skipped: usize },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub created_at: DateTime<Utc>,
    pub fps: f64,
    pub frames_requested: usize,
    pub frames_tracked: usize,
    pub acceleration_threshold: f64,
    pub conversion_factor: f64,
    /// Filter-corrected frame count per landmark
    pub corrections: BTreeMap<Landmark, usize>,
    pub lag: Option<LagEstimate>,
    pub stages: BTreeMap<String, StageReport>,
}

impl RunSummary {
    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Everything produced by [`Pipeline::track`].
#[derive(Clone, Debug)]
pub struct TrackingRun {
    pub centroids: CentroidSeries,
    pub distal_kinematics: Vec<KinematicRecord>,
    pub proximal_kinematics: Vec<KinematicRecord>,
    pub distal_corrected: CorrectedSeries,
    pub proximal_corrected: CorrectedSeries,
    /// `None` when no force series was supplied
    pub aligned: Option<AlignedDataset>,
    pub summary: RunSummary,
}

impl TrackingRun {
    /// Write every table and the run summary into `dir`.
    pub fn write_outputs(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        tables::write_coordinates(
            &dir.join("insertion_coords.csv"),
            &self.centroids.distal,
            &self.centroids.proximal,
            &self.centroids.frame_indices,
        )?;
        let frames = &self.centroids.frame_indices;
        tables::write_kinematics(&dir.join("kinematics_distal.csv"), &self.distal_kinematics, frames)?;
        tables::write_kinematics(&dir.join("kinematics_proximal.csv"), &self.proximal_kinematics, frames)?;
        tables::write_corrected(&dir.join("kalman_coords_distal.csv"), &self.distal_corrected, frames)?;
        tables::write_corrected(&dir.join("kalman_coords_proximal.csv"), &self.proximal_corrected, frames)?;
        if let Some(aligned) = &self.aligned {
            tables::write_aligned(&dir.join("force_elongation.csv"), aligned)?;
        }
        self.summary.save(&dir.join("run_summary.json"))?;
        log::info!("Outputs written to {}", dir.display());
        Ok(())
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    events: Option<Sender<StageEvent>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Sender<StageEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn emit(&self, event: StageEvent) {
        log::debug!("Stage event: {:?}", event);
        if let Some(tx) = &self.events {
            // Nobody listening is fine
            let _ = tx.send(event);
        }
    }

    /// Normalize a raw frame source into canonical frames, also written to `sink`.
    pub fn normalize(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<NormalizedVideo> {
        let video = FrameNormalizer::new(&self.config).normalize_source(source, sink)?;
        self.emit(StageEvent::FramesNormalized {
            kept: video.report.processed,
            skipped: video.report.skipped_count(),
        });
        Ok(video)
    }

    /// Track both landmarks over `frame_count` heatmaps and align the force
    /// series against the resulting elongation.
    pub fn track(
        &self,
        frame_count: usize,
        heatmaps: &dyn HeatmapSource,
        force: Option<&[f64]>,
        conversion_factor: f64,
        fps: f64,
    ) -> Result<TrackingRun> {
        self.config.validate()?;
        if !(fps > 0.0) || !fps.is_finite() {
            return Err(TrackerError::InvalidConfig(format!("fps must be positive, got {}", fps)));
        }

        let centroids = CentroidExtractor::new(&self.config).extract_series(frame_count, heatmaps, fps)?;
        self.emit(StageEvent::CentroidsExtracted {
            tracked: centroids.distal.len(),
            skipped: centroids.report.skipped_count(),
        });
        if centroids.distal.is_empty() {
            return Err(TrackerError::EmptySeries("tracked frames"));
        }

        let distal_kinematics = kinematics::compute(&centroids.distal)?;
        let proximal_kinematics = kinematics::compute(&centroids.proximal)?;
        self.emit(StageEvent::KinematicsComputed {
            frames: distal_kinematics.len(),
        });

        let mut corrected = Vec::with_capacity(2);
        for (series, kin) in [
            (&centroids.distal, &distal_kinematics),
            (&centroids.proximal, &proximal_kinematics),
        ] {
            let corrector = AdaptiveTrajectoryCorrector::new(series.landmark, &self.config.corrector);
            let out = corrector.correct(series, kin)?;
            self.emit(StageEvent::TrajectoryCorrected {
                landmark: series.landmark,
                corrected: out.corrections(),
                total: out.len(),
            });
            corrected.push(out);
        }
        let proximal_corrected = corrected.pop().ok_or(TrackerError::EmptySeries("proximal correction"))?;
        let distal_corrected = corrected.pop().ok_or(TrackerError::EmptySeries("distal correction"))?;

        let aligned = match force {
            Some(force) => {
                let aligner = ForceElongationAligner::from_config(&self.config, conversion_factor);
                let (d, p) = if self.config.use_corrected_coordinates {
                    (distal_corrected.coordinates(), proximal_corrected.coordinates())
                } else {
                    (centroids.distal.clone(), centroids.proximal.clone())
                };
                let dataset = aligner.align(force, Some((&d, &p)), d.len(), fps)?;
                self.emit(StageEvent::ForceAligned {
                    frames: dataset.len(),
                    lag_frames: dataset.lag.map(|l| l.lag_frames),
                });
                Some(dataset)
            }
            None => {
                log::info!("No force series supplied, alignment skipped");
                None
            }
        };

        let mut corrections = BTreeMap::new();
        corrections.insert(Landmark::Distal, distal_corrected.corrections());
        corrections.insert(Landmark::Proximal, proximal_corrected.corrections());
        let mut stages = BTreeMap::new();
        stages.insert("centroids".to_string(), centroids.report.clone());

        let summary = RunSummary {
            created_at: Utc::now(),
            fps,
            frames_requested: frame_count,
            frames_tracked: centroids.distal.len(),
            acceleration_threshold: self.config.corrector.acceleration_threshold,
            conversion_factor,
            corrections,
            lag: aligned.as_ref().and_then(|a| a.lag),
            stages,
        };

        log::info!(
            "Tracked {} of {} frames; corrected distal {}, proximal {}",
            summary.frames_tracked,
            frame_count,
            distal_corrected.corrections(),
            proximal_corrected.corrections()
        );

        Ok(TrackingRun {
            centroids,
            distal_kinematics,
            proximal_kinematics,
            distal_corrected,
            proximal_corrected,
            aligned,
            summary,
        })
    }

    /// Align a force series against stored per-landmark trajectory tables.
    ///
    /// Reads the corrected columns, or the raw detections when
    /// `use_corrected_coordinates` is off. Tables lacking those columns give a
    /// force-only dataset with one row per table row.
    pub fn align_tables(
        &self,
        force: &[f64],
        distal_path: &Path,
        proximal_path: &Path,
        conversion_factor: f64,
        fps: f64,
    ) -> Result<AlignedDataset> {
        let frame_count = tables::row_count(distal_path)?;
        let coordinates = if self.config.use_corrected_coordinates {
            match (
                tables::read_corrected(distal_path, Landmark::Distal, fps)?,
                tables::read_corrected(proximal_path, Landmark::Proximal, fps)?,
            ) {
                (Some(d), Some(p)) => Some((d.coordinates(), p.coordinates())),
                _ => None,
            }
        } else {
            match (
                tables::read_raw_trajectory(distal_path, Landmark::Distal, fps)?,
                tables::read_raw_trajectory(proximal_path, Landmark::Proximal, fps)?,
            ) {
                (Some(d), Some(p)) => Some((d, p)),
                _ => None,
            }
        };
        if coordinates.is_none() {
            log::warn!("Coordinate columns missing, elongation and lag skipped");
        }

        let aligner = ForceElongationAligner::from_config(&self.config, conversion_factor);
        let dataset = aligner.align(
            force,
            coordinates.as_ref().map(|(d, p)| (d, p)),
            frame_count,
            fps,
        )?;
        self.emit(StageEvent::ForceAligned {
            frames: dataset.len(),
            lag_frames: dataset.lag.map(|l| l.lag_frames),
        });
        Ok(dataset)
    }

    /// Overlay the emitted trajectories on the canonical frames and write them to `sink`.
    pub fn export_overlay(
        &self,
        frames: &[RgbImage],
        run: &mut TrackingRun,
        sink: &mut dyn FrameSink,
    ) -> Result<StageReport> {
        let visualizer = TrajectoryVisualizer::from_config(&self.config);
        let report = visualizer.export(
            frames,
            &run.centroids.frame_indices,
            &run.distal_corrected.coordinates(),
            &run.proximal_corrected.coordinates(),
            sink,
        )?;
        self.emit(StageEvent::VisualizationExported {
            written: report.processed,
            skipped: report.skipped_count(),
        });
        run.summary
            .stages
            .insert("overlay".to_string(), report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use ndarray::Array2;
    use tempfile::TempDir;

    use crate::filters::CorrectedPoint;
    use crate::types::LandmarkPoint;

    fn config() -> PipelineConfig {
        PipelineConfig {
            heatmap_height: 16,
            heatmap_width: 16,
            canonical_height: 64,
            canonical_width: 64,
            ..Default::default()
        }
    }

    /// Hot pixels at (4, 3) left and (4, 12) right on every frame.
    fn still_heatmaps(n: usize) -> Vec<Option<Array2<f32>>> {
        (0..n)
            .map(|_| {
                let mut h = Array2::<f32>::zeros((16, 16));
                h[[4, 3]] = 1.0;
                h[[4, 12]] = 1.0;
                Some(h)
            })
            .collect()
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, rx) = unbounded();
        let pipeline = Pipeline::new(config()).with_events(tx);
        let heatmaps = still_heatmaps(10);
        let force = vec![1.0; 1000];
        pipeline
            .track(10, &heatmaps, Some(&force), 6.48, 10.0)
            .unwrap();
        drop(pipeline);

        let events: Vec<StageEvent> = rx.iter().collect();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], StageEvent::CentroidsExtracted { tracked: 10, skipped: 0 }));
        assert!(matches!(events[1], StageEvent::KinematicsComputed { frames: 10 }));
        assert!(matches!(
            events[2],
            StageEvent::TrajectoryCorrected { landmark: Landmark::Distal, corrected: 0, total: 10 }
        ));
        assert!(matches!(
            events[3],
            StageEvent::TrajectoryCorrected { landmark: Landmark::Proximal, .. }
        ));
        assert!(matches!(events[4], StageEvent::ForceAligned { frames: 10, lag_frames: Some(0) }));
    }

    #[test]
    fn test_missing_heatmaps_are_skipped() {
        let mut heatmaps = still_heatmaps(6);
        heatmaps[2] = None;
        let run = Pipeline::new(config())
            .track(6, &heatmaps, None, 6.48, 30.0)
            .unwrap();
        assert_eq!(run.centroids.frame_indices, vec![0, 1, 3, 4, 5]);
        assert_eq!(run.summary.frames_tracked, 5);
        assert_eq!(run.summary.stages["centroids"].skipped_count(), 1);
        assert!(run.aligned.is_none());
    }

    #[test]
    fn test_no_heatmaps_at_all_is_an_error() {
        let heatmaps: Vec<Option<Array2<f32>>> = vec![None; 4];
        assert!(matches!(
            Pipeline::new(config()).track(4, &heatmaps, None, 6.48, 30.0),
            Err(TrackerError::EmptySeries(_))
        ));
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = unbounded();
        drop(rx);
        let pipeline = Pipeline::new(config()).with_events(tx);
        assert!(pipeline.track(3, &still_heatmaps(3), None, 6.48, 30.0).is_ok());
    }

    #[test]
    fn test_overlay_export_recorded_in_summary() {
        let pipeline = Pipeline::new(config());
        let mut run = pipeline
            .track(3, &still_heatmaps(3), None, 6.48, 30.0)
            .unwrap();
        let frames: Vec<RgbImage> = (0..3).map(|_| RgbImage::new(64, 64)).collect();
        let mut sink: Vec<RgbImage> = Vec::new();
        let report = pipeline.export_overlay(&frames, &mut run, &mut sink).unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(sink.len(), 3);
        assert!(run.summary.stages.contains_key("overlay"));
    }

    /// Raw columns hold a still pair 100 px apart; corrected columns drift apart by 1 px a frame.
    fn write_trajectory_tables(dir: &Path, n: usize) -> (std::path::PathBuf, std::path::PathBuf) {
        let frames: Vec<usize> = (0..n).collect();
        let series = |landmark, col: f64, drift: f64| CorrectedSeries {
            landmark,
            fps: 10.0,
            points: (0..n)
                .map(|i| CorrectedPoint {
                    raw: LandmarkPoint::new(50.0, col),
                    corrected: LandmarkPoint::new(50.0, col + drift * i as f64),
                    filter_applied: false,
                })
                .collect(),
        };
        let distal = dir.join("kalman_coords_distal.csv");
        let proximal = dir.join("kalman_coords_proximal.csv");
        tables::write_corrected(&distal, &series(Landmark::Distal, 20.0, 0.0), &frames).unwrap();
        tables::write_corrected(&proximal, &series(Landmark::Proximal, 120.0, 1.0), &frames).unwrap();
        (distal, proximal)
    }

    #[test]
    fn test_align_tables_uses_corrected_columns() {
        let tmp = TempDir::new().unwrap();
        let (distal, proximal) = write_trajectory_tables(tmp.path(), 10);
        let force: Vec<f64> = (0..1000).map(|i| i as f64 * 0.01).collect();

        let dataset = Pipeline::new(config())
            .align_tables(&force, &distal, &proximal, 1.0, 10.0)
            .unwrap();
        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.rows[0].elongation_mm, Some(100.0));
        assert_eq!(dataset.rows[9].elongation_mm, Some(109.0));
        assert!(dataset.lag.is_some());
    }

    #[test]
    fn test_align_tables_uses_raw_detections_when_configured() {
        let tmp = TempDir::new().unwrap();
        let (distal, proximal) = write_trajectory_tables(tmp.path(), 10);
        let force: Vec<f64> = (0..1000).map(|i| i as f64 * 0.01).collect();

        let raw_config = PipelineConfig {
            use_corrected_coordinates: false,
            ..config()
        };
        let dataset = Pipeline::new(raw_config)
            .align_tables(&force, &distal, &proximal, 1.0, 10.0)
            .unwrap();
        for row in &dataset.rows {
            assert_eq!(row.elongation_mm, Some(100.0));
        }
        // Still pair: elongation is flat
        assert!(dataset.lag.unwrap().peak_correlation.is_none());
    }

    #[test]
    fn test_align_tables_without_coordinate_columns_keeps_force() {
        let tmp = TempDir::new().unwrap();
        let distal = tmp.path().join("d.csv");
        let proximal = tmp.path().join("p.csv");
        fs::write(&distal, "corrected_row,corrected_col\n1,2\n3,4\n5,6\n").unwrap();
        fs::write(&proximal, "corrected_row,corrected_col\n1,9\n3,9\n5,9\n").unwrap();
        let force = vec![2.0; 300];

        let (tx, rx) = unbounded();
        let raw_config = PipelineConfig {
            use_corrected_coordinates: false,
            ..config()
        };
        let pipeline = Pipeline::new(raw_config).with_events(tx);
        let dataset = pipeline
            .align_tables(&force, &distal, &proximal, 6.48, 10.0)
            .unwrap();
        drop(pipeline);

        assert_eq!(dataset.len(), 3);
        assert!(dataset.lag.is_none());
        for row in &dataset.rows {
            assert!(row.elongation_mm.is_none());
            assert!((row.force - 2.0).abs() < 1e-9);
        }
        let events: Vec<StageEvent> = rx.iter().collect();
        assert_eq!(events, vec![StageEvent::ForceAligned { frames: 3, lag_frames: None }]);
    }

    #[test]
    fn test_align_tables_without_raw_columns_uses_corrected() {
        let tmp = TempDir::new().unwrap();
        let distal = tmp.path().join("d.csv");
        let proximal = tmp.path().join("p.csv");
        fs::write(&distal, "corrected_row,corrected_col\n0,0\n0,0\n").unwrap();
        fs::write(&proximal, "corrected_row,corrected_col\n3,4\n6,8\n").unwrap();

        let dataset = Pipeline::new(config())
            .align_tables(&[1.0, 2.0, 3.0, 4.0], &distal, &proximal, 1.0, 10.0)
            .unwrap();
        assert_eq!(dataset.rows[0].elongation_mm, Some(5.0));
        assert_eq!(dataset.rows[1].elongation_mm, Some(10.0));
    }
}
