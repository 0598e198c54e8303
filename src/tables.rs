//! Column-labelled CSV tables
//!
//! Every tabular product of the pipeline (coordinates, kinematics, corrected
//! trajectories, aligned force/elongation) plus the force input and the
//! manual coordinate edits applied during review.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alignment::{AlignedDataset, AlignedRow};
use crate::error::{Result, TrackerError};
use crate::filters::{CorrectedPoint, CorrectedSeries};
use crate::types::{CoordinateSeries, KinematicRecord, Landmark, LandmarkPoint};

const COORDINATE_COLUMNS: [&str; 6] = [
    "frame",
    "distal_row",
    "distal_col",
    "proximal_row",
    "proximal_col",
    "fps",
];
const CORRECTED_RAW_COLUMNS: [&str; 3] = ["frame", "raw_row", "raw_col"];
const RAW_COLUMNS: [&str; 2] = ["raw_row", "raw_col"];
const CORRECTED_FILTER_COLUMNS: [&str; 2] = ["corrected_row", "corrected_col"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoordinateRow {
    frame: usize,
    distal_row: f64,
    distal_col: f64,
    proximal_row: f64,
    proximal_col: f64,
    fps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KinematicRow {
    frame: usize,
    disp_row: f64,
    disp_col: f64,
    distance: f64,
    speed: f64,
    speed_row: f64,
    speed_col: f64,
    acceleration: f64,
}

impl KinematicRow {
    fn new(frame: usize, r: &KinematicRecord) -> Self {
        Self {
            frame,
            disp_row: r.disp_row,
            disp_col: r.disp_col,
            distance: r.distance,
            speed: r.speed,
            speed_row: r.speed_row,
            speed_col: r.speed_col,
            acceleration: r.acceleration,
        }
    }

    fn record(&self) -> KinematicRecord {
        KinematicRecord {
            disp_row: self.disp_row,
            disp_col: self.disp_col,
            distance: self.distance,
            speed: self.speed,
            speed_row: self.speed_row,
            speed_col: self.speed_col,
            acceleration: self.acceleration,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CorrectedRow {
    frame: usize,
    raw_row: f64,
    raw_col: f64,
    corrected_row: f64,
    corrected_col: f64,
    #[serde(default)]
    filter_applied: bool,
}

/// Loose view of a trajectory table where any coordinate column may be absent.
#[derive(Debug, Clone, Deserialize)]
struct TrajectoryRow {
    #[serde(default)]
    raw_row: Option<f64>,
    #[serde(default)]
    raw_col: Option<f64>,
    #[serde(default)]
    corrected_row: Option<f64>,
    #[serde(default)]
    corrected_col: Option<f64>,
    #[serde(default)]
    filter_applied: bool,
}

fn trajectory_point(path: &Path, line: usize, row: Option<f64>, col: Option<f64>) -> Result<LandmarkPoint> {
    match (row, col) {
        (Some(row), Some(col)) => Ok(LandmarkPoint::new(row, col)),
        _ => Err(TrackerError::NumericDegenerate(format!(
            "{} row {}: empty coordinate cell",
            path.display(),
            line + 1
        ))),
    }
}

/// Raw detections of both landmarks, as stored on disk.
#[derive(Debug, Clone)]
pub struct CoordinateTable {
    pub distal: CoordinateSeries,
    pub proximal: CoordinateSeries,
    /// Source frame index of each row
    pub frames: Vec<usize>,
}

fn missing_columns(headers: &csv::StringRecord, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|c| !headers.iter().any(|h| h.trim() == **c))
        .map(|c| c.to_string())
        .collect()
}

fn require_columns(path: &Path, headers: &csv::StringRecord, required: &[&str]) -> Result<()> {
    let missing = missing_columns(headers, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TrackerError::MissingColumns {
            table: path.display().to_string(),
            columns: missing,
        })
    }
}

/// Number of data rows (header excluded).
pub fn row_count(path: &Path) -> Result<usize> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut count = 0;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

pub fn write_coordinates(
    path: &Path,
    distal: &CoordinateSeries,
    proximal: &CoordinateSeries,
    frames: &[usize],
) -> Result<()> {
    if distal.len() != proximal.len() || distal.len() != frames.len() {
        return Err(TrackerError::LengthMismatch {
            what: "coordinate table rows",
            expected: frames.len(),
            actual: distal.len().max(proximal.len()),
        });
    }
    let mut writer = csv::Writer::from_path(path)?;
    for ((&frame, d), p) in frames.iter().zip(&distal.points).zip(&proximal.points) {
        writer.serialize(CoordinateRow {
            frame,
            distal_row: d.row,
            distal_col: d.col,
            proximal_row: p.row,
            proximal_col: p.col,
            fps: distal.fps,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_coordinates(path: &Path) -> Result<CoordinateTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    require_columns(path, &headers, &COORDINATE_COLUMNS)?;

    let mut distal = Vec::new();
    let mut proximal = Vec::new();
    let mut frames = Vec::new();
    let mut fps = None;
    for row in reader.deserialize::<CoordinateRow>() {
        let row = row?;
        fps.get_or_insert(row.fps);
        frames.push(row.frame);
        distal.push(LandmarkPoint::new(row.distal_row, row.distal_col));
        proximal.push(LandmarkPoint::new(row.proximal_row, row.proximal_col));
    }
    let fps = fps.ok_or(TrackerError::EmptySeries("coordinate table"))?;

    Ok(CoordinateTable {
        distal: CoordinateSeries::new(Landmark::Distal, fps, distal),
        proximal: CoordinateSeries::new(Landmark::Proximal, fps, proximal),
        frames,
    })
}

fn check_frames(what: &'static str, frames: &[usize], rows: usize) -> Result<()> {
    if frames.len() != rows {
        return Err(TrackerError::LengthMismatch {
            what,
            expected: frames.len(),
            actual: rows,
        });
    }
    Ok(())
}

/// `frames` holds the source frame index of each record, as in the coordinate table.
pub fn write_kinematics(path: &Path, records: &[KinematicRecord], frames: &[usize]) -> Result<()> {
    check_frames("kinematics table rows", frames, records.len())?;
    let mut writer = csv::Writer::from_path(path)?;
    for (&frame, record) in frames.iter().zip(records) {
        writer.serialize(KinematicRow::new(frame, record))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_kinematics(path: &Path) -> Result<Vec<KinematicRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<KinematicRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.iter().map(KinematicRow::record).collect())
}

/// `frames` holds the source frame index of each point; manual edits match on it.
pub fn write_corrected(path: &Path, series: &CorrectedSeries, frames: &[usize]) -> Result<()> {
    check_frames("corrected table rows", frames, series.len())?;
    let mut writer = csv::Writer::from_path(path)?;
    for (&frame, p) in frames.iter().zip(&series.points) {
        writer.serialize(CorrectedRow {
            frame,
            raw_row: p.raw.row,
            raw_col: p.raw.col,
            corrected_row: p.corrected.row,
            corrected_col: p.corrected.col,
            filter_applied: p.filter_applied,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a corrected trajectory table.
///
/// `Ok(None)` when the corrected columns are absent. Without raw columns the
/// raw position of each point is taken from its corrected one.
pub fn read_corrected(path: &Path, landmark: Landmark, fps: f64) -> Result<Option<CorrectedSeries>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let absent = missing_columns(&headers, &CORRECTED_FILTER_COLUMNS);
    if !absent.is_empty() {
        log::warn!(
            "{} has no corrected columns ({:?})",
            path.display(),
            absent
        );
        return Ok(None);
    }
    let has_raw = missing_columns(&headers, &RAW_COLUMNS).is_empty();
    if !has_raw {
        log::debug!("{} has no raw columns", path.display());
    }

    let points = reader
        .deserialize::<TrajectoryRow>()
        .enumerate()
        .map(|(line, row)| {
            let row = row?;
            let corrected = trajectory_point(path, line, row.corrected_row, row.corrected_col)?;
            let raw = if has_raw {
                trajectory_point(path, line, row.raw_row, row.raw_col)?
            } else {
                corrected
            };
            Ok(CorrectedPoint {
                raw,
                corrected,
                filter_applied: row.filter_applied,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(CorrectedSeries {
        landmark,
        fps,
        points,
    }))
}

/// Raw detections stored alongside a corrected trajectory.
///
/// `Ok(None)` when the raw columns are absent.
pub fn read_raw_trajectory(path: &Path, landmark: Landmark, fps: f64) -> Result<Option<CoordinateSeries>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let absent = missing_columns(&headers, &RAW_COLUMNS);
    if !absent.is_empty() {
        log::warn!("{} has no raw columns ({:?})", path.display(), absent);
        return Ok(None);
    }

    let points = reader
        .deserialize::<TrajectoryRow>()
        .enumerate()
        .map(|(line, row)| {
            let row = row?;
            trajectory_point(path, line, row.raw_row, row.raw_col)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(CoordinateSeries::new(landmark, fps, points)))
}

pub fn write_aligned(path: &Path, dataset: &AlignedDataset) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in &dataset.rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_aligned(path: &Path) -> Result<Vec<AlignedRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader
        .deserialize::<AlignedRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Force samples from the named column of a headed CSV.
pub fn read_force(path: &Path, column: &str) -> Result<Vec<f64>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let idx = headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| TrackerError::MissingColumns {
            table: path.display().to_string(),
            columns: vec![column.to_string()],
        })?;

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = record.get(idx).unwrap_or("").trim();
        let value: f64 = field.parse().map_err(|_| {
            TrackerError::NumericDegenerate(format!(
                "{} row {}: '{}' is not a number",
                path.display(),
                line + 1,
                field
            ))
        })?;
        samples.push(value);
    }
    if samples.is_empty() {
        return Err(TrackerError::EmptySeries("force samples"));
    }
    log::info!("Read {} force samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Reviewer override of the emitted position on one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateEdit {
    pub frame: usize,
    #[serde(default)]
    pub distal: Option<LandmarkPoint>,
    #[serde(default)]
    pub proximal: Option<LandmarkPoint>,
}

pub fn load_edits(path: &Path) -> Result<Vec<CoordinateEdit>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// `kalman_distal.csv` -> `kalman_distal_backup.csv`
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}_backup.csv", stem))
}

fn ensure_backup(path: &Path) -> Result<()> {
    let backup = backup_path(path);
    if !backup.exists() {
        fs::copy(path, &backup)?;
        log::info!("Backup created: {}", backup.display());
    }
    Ok(())
}

fn edit_table(path: &Path, edits: &[(usize, LandmarkPoint)]) -> Result<usize> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    require_columns(path, &headers, &CORRECTED_RAW_COLUMNS)?;
    require_columns(path, &headers, &CORRECTED_FILTER_COLUMNS)?;
    let mut rows = reader
        .deserialize::<CorrectedRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut applied = 0;
    for (frame, point) in edits {
        match rows.iter_mut().find(|r| r.frame == *frame) {
            Some(row) => {
                row.corrected_row = point.row;
                row.corrected_col = point.col;
                applied += 1;
            }
            None => log::warn!("{}: no row for frame {}, edit ignored", path.display(), frame),
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(applied)
}

/// Overwrite corrected coordinates in both stored tables.
///
/// A `*_backup.csv` copy of each table is made before its first edit and never
/// overwritten afterwards. Returns the number of (frame, landmark) cells changed.
pub fn apply_manual_edits(
    distal_path: &Path,
    proximal_path: &Path,
    edits: &[CoordinateEdit],
) -> Result<usize> {
    ensure_backup(distal_path)?;
    ensure_backup(proximal_path)?;

    let distal: Vec<(usize, LandmarkPoint)> = edits
        .iter()
        .filter_map(|e| e.distal.map(|p| (e.frame, p)))
        .collect();
    let proximal: Vec<(usize, LandmarkPoint)> = edits
        .iter()
        .filter_map(|e| e.proximal.map(|p| (e.frame, p)))
        .collect();

    let applied = edit_table(distal_path, &distal)? + edit_table(proximal_path, &proximal)?;
    log::info!("Applied {} manual coordinate edits", applied);
    Ok(applied)
}

/// Put both tables back to their state before the first manual edit.
pub fn restore_from_backup(distal_path: &Path, proximal_path: &Path) -> Result<()> {
    let backups = [backup_path(distal_path), backup_path(proximal_path)];
    for backup in &backups {
        if !backup.is_file() {
            return Err(TrackerError::SourceUnavailable(format!(
                "backup {} not found",
                backup.display()
            )));
        }
    }
    fs::copy(&backups[0], distal_path)?;
    fs::copy(&backups[1], proximal_path)?;
    log::info!("Corrected coordinates restored from backup");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn corrected(landmark: Landmark, n: usize) -> CorrectedSeries {
        CorrectedSeries {
            landmark,
            fps: 50.0,
            points: (0..n)
                .map(|i| CorrectedPoint {
                    raw: LandmarkPoint::new(100.0 + i as f64, 200.0),
                    corrected: LandmarkPoint::new(100.0 + i as f64, 201.0),
                    filter_applied: i % 2 == 1,
                })
                .collect(),
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_coordinates_header_and_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coords.csv");
        let d = CoordinateSeries::new(Landmark::Distal, 51.5, vec![LandmarkPoint::new(1.0, 2.0)]);
        let p = CoordinateSeries::new(Landmark::Proximal, 51.5, vec![LandmarkPoint::new(3.0, 4.0)]);
        write_coordinates(&path, &d, &p, &[5]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("frame,distal_row,distal_col,proximal_row,proximal_col,fps"));

        let table = read_coordinates(&path).unwrap();
        assert_eq!(table.frames, vec![5]);
        assert_eq!(table.distal.fps, 51.5);
        assert_eq!(table.proximal.points[0], LandmarkPoint::new(3.0, 4.0));
    }

    #[test]
    fn test_coordinates_missing_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "c.csv", "frame,distal_row,distal_col\n0,1,2\n");
        match read_coordinates(&path) {
            Err(TrackerError::MissingColumns { columns, .. }) => {
                assert!(columns.contains(&"proximal_row".to_string()));
                assert!(columns.contains(&"fps".to_string()));
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_kinematics_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kin.csv");
        let records = vec![
            KinematicRecord::default(),
            KinematicRecord {
                disp_row: 1.0,
                speed: 50.0,
                acceleration: 2500.0,
                ..Default::default()
            },
        ];
        write_kinematics(&path, &records, &[0, 2]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "frame,disp_row,disp_col,distance,speed,speed_row,speed_col,acceleration"
        ));
        assert!(text.lines().nth(2).unwrap().starts_with("2,"));
        assert_eq!(read_kinematics(&path).unwrap(), records);
        assert!(write_kinematics(&path, &records, &[0]).is_err());
    }

    #[test]
    fn test_corrected_without_filter_columns_is_none() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "k.csv", "frame,raw_row,raw_col\n0,1,2\n1,1,3\n");
        assert!(read_corrected(&path, Landmark::Distal, 50.0).unwrap().is_none());
        assert_eq!(row_count(&path).unwrap(), 2);
        let raw = read_raw_trajectory(&path, Landmark::Distal, 50.0).unwrap().unwrap();
        assert_eq!(raw.points, vec![LandmarkPoint::new(1.0, 2.0), LandmarkPoint::new(1.0, 3.0)]);
    }

    #[test]
    fn test_corrected_without_raw_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "k.csv", "corrected_row,corrected_col\n1,2\n3,4\n");
        let series = read_corrected(&path, Landmark::Proximal, 50.0).unwrap().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.points[1].corrected, LandmarkPoint::new(3.0, 4.0));
        assert_eq!(series.points[1].raw, series.points[1].corrected);
        assert!(!series.points[1].filter_applied);
        assert!(read_raw_trajectory(&path, Landmark::Proximal, 50.0).unwrap().is_none());
    }

    #[test]
    fn test_corrected_empty_cell_is_degenerate() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "k.csv", "corrected_row,corrected_col\n1,2\n,4\n");
        assert!(matches!(
            read_corrected(&path, Landmark::Distal, 50.0),
            Err(TrackerError::NumericDegenerate(_))
        ));
    }

    #[test]
    fn test_corrected_written_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.csv");
        let series = corrected(Landmark::Proximal, 4);
        write_corrected(&path, &series, &[0, 1, 2, 3]).unwrap();
        let back = read_corrected(&path, Landmark::Proximal, 50.0).unwrap().unwrap();
        assert_eq!(back, series);
    }

    #[test]
    fn test_aligned_empty_elongation_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aligned.csv");
        let dataset = AlignedDataset {
            rows: vec![
                AlignedRow { frame: 1, force: 2.0, elongation_mm: None },
                AlignedRow { frame: 2, force: 3.0, elongation_mm: None },
            ],
            lag: None,
        };
        write_aligned(&path, &dataset).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("frame,force,elongation_mm"));
        assert_eq!(read_aligned(&path).unwrap(), dataset.rows);
    }

    #[test]
    fn test_force_column_required() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "f.csv", "Time,Force_left\n0,1\n");
        assert!(matches!(
            read_force(&path, "Force_right"),
            Err(TrackerError::MissingColumns { .. })
        ));
        let path = write_file(&dir, "g.csv", "Time,Force_right\n0,1.5\n0.001,2.5\n");
        assert_eq!(read_force(&path, "Force_right").unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_manual_edit_backup_and_restore() {
        let dir = TempDir::new().unwrap();
        let distal_path = dir.path().join("kalman_distal.csv");
        let proximal_path = dir.path().join("kalman_proximal.csv");
        // Source frame 2 had no heatmap
        let frames = [0, 1, 3];
        write_corrected(&distal_path, &corrected(Landmark::Distal, 3), &frames).unwrap();
        write_corrected(&proximal_path, &corrected(Landmark::Proximal, 3), &frames).unwrap();
        let original = fs::read_to_string(&distal_path).unwrap();

        let edits = vec![CoordinateEdit {
            frame: 1,
            distal: Some(LandmarkPoint::new(7.0, 8.0)),
            proximal: None,
        }];
        assert_eq!(apply_manual_edits(&distal_path, &proximal_path, &edits).unwrap(), 1);
        assert!(backup_path(&distal_path).is_file());
        assert!(backup_path(&proximal_path).is_file());

        let edited = read_corrected(&distal_path, Landmark::Distal, 50.0).unwrap().unwrap();
        assert_eq!(edited.points[1].corrected, LandmarkPoint::new(7.0, 8.0));
        assert_eq!(edited.points[1].raw, LandmarkPoint::new(101.0, 200.0));

        // Second edit must not refresh the backup; it targets source frame 3
        let edits = vec![CoordinateEdit {
            frame: 3,
            distal: Some(LandmarkPoint::new(9.0, 9.0)),
            proximal: None,
        }];
        assert_eq!(apply_manual_edits(&distal_path, &proximal_path, &edits).unwrap(), 1);
        let edited = read_corrected(&distal_path, Landmark::Distal, 50.0).unwrap().unwrap();
        assert_eq!(edited.points[2].corrected, LandmarkPoint::new(9.0, 9.0));
        assert_eq!(fs::read_to_string(backup_path(&distal_path)).unwrap(), original);

        restore_from_backup(&distal_path, &proximal_path).unwrap();
        assert_eq!(fs::read_to_string(&distal_path).unwrap(), original);
    }

    #[test]
    fn test_restore_without_backup_fails() {
        let dir = TempDir::new().unwrap();
        let distal_path = dir.path().join("d.csv");
        let proximal_path = dir.path().join("p.csv");
        assert!(restore_from_backup(&distal_path, &proximal_path).is_err());
    }

    #[test]
    fn test_backup_path_naming() {
        assert_eq!(
            backup_path(Path::new("/data/kalman_coords_distal.csv")),
            PathBuf::from("/data/kalman_coords_distal_backup.csv")
        );
    }
}
