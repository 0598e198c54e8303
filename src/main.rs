use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam::channel::unbounded;
use image::RgbImage;

use tendon_tracker_rs::centroid::HeatmapDirectory;
use tendon_tracker_rs::config::PipelineConfig;
use tendon_tracker_rs::pipeline::{Pipeline, StageEvent};
use tendon_tracker_rs::tables;
use tendon_tracker_rs::types::Landmark;
use tendon_tracker_rs::video::{FrameSource, ImageSequence, ImageSequenceWriter};

#[derive(Parser, Debug)]
#[command(name = "tendon_tracker")]
#[command(about = "Ultrasound tendon insertion tracking and force alignment", long_about = None)]
struct Args {
    /// Pipeline configuration (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crop, rescale and pad raw frames to the canonical raster
    Normalize {
        /// Directory of raw frame images
        #[arg(long)]
        input: PathBuf,

        /// Directory for canonical frames
        #[arg(long)]
        output: PathBuf,

        /// Frame rate when the input has no sequence.json
        #[arg(long)]
        fps: Option<f64>,
    },

    /// Track both insertions from detector heatmaps and align with force
    Track {
        /// Canonical frame directory (frame count, fps, overlay background)
        #[arg(long)]
        frames: PathBuf,

        /// Heatmap directory (frame_0000_prediction.png, ...)
        #[arg(long)]
        heatmaps: PathBuf,

        /// Force CSV; alignment is skipped when omitted
        #[arg(long)]
        force: Option<PathBuf>,

        /// Output directory for tables, summary and overlay
        #[arg(long, default_value = "tendon_tracker_output")]
        output: PathBuf,

        /// Text file with the px per mm factor
        #[arg(long)]
        conversion_factor_file: Option<PathBuf>,

        /// Override the correction threshold [px/s²]
        #[arg(long)]
        acceleration_threshold: Option<f64>,

        /// Frame rate when the frame directory has no sequence.json
        #[arg(long)]
        fps: Option<f64>,

        /// Skip the annotated overlay export
        #[arg(long, default_value_t = false)]
        no_overlay: bool,
    },

    /// Align a force CSV with stored corrected coordinate tables
    Align {
        #[arg(long)]
        coords_distal: PathBuf,

        #[arg(long)]
        coords_proximal: PathBuf,

        #[arg(long)]
        force: PathBuf,

        /// Video frame rate
        #[arg(long)]
        fps: f64,

        /// Aligned force/elongation table
        #[arg(long)]
        output: PathBuf,

        #[arg(long)]
        conversion_factor_file: Option<PathBuf>,
    },

    /// Apply reviewer coordinate edits (JSON list) to corrected tables
    Edit {
        #[arg(long)]
        distal: PathBuf,

        #[arg(long)]
        proximal: PathBuf,

        #[arg(long)]
        edits: PathBuf,
    },

    /// Restore corrected tables from their pre-edit backups
    Restore {
        #[arg(long)]
        distal: PathBuf,

        #[arg(long)]
        proximal: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Command::Normalize { input, output, fps } => normalize(config, &input, &output, fps),
        Command::Track {
            frames,
            heatmaps,
            force,
            output,
            conversion_factor_file,
            acceleration_threshold,
            fps,
            no_overlay,
        } => {
            let mut config = config;
            if let Some(t) = acceleration_threshold {
                config.corrector.acceleration_threshold = t;
            }
            track(
                config,
                &frames,
                &heatmaps,
                force.as_deref(),
                &output,
                conversion_factor_file.as_deref(),
                fps,
                !no_overlay,
            )
        }
        Command::Align {
            coords_distal,
            coords_proximal,
            force,
            fps,
            output,
            conversion_factor_file,
        } => align(
            config,
            &coords_distal,
            &coords_proximal,
            &force,
            fps,
            &output,
            conversion_factor_file.as_deref(),
        ),
        Command::Edit {
            distal,
            proximal,
            edits,
        } => {
            let edits = tables::load_edits(&edits)
                .with_context(|| format!("reading edits {}", edits.display()))?;
            let applied = tables::apply_manual_edits(&distal, &proximal, &edits)?;
            println!("[{}] Updated {} coordinates", ts_now(), applied);
            Ok(())
        }
        Command::Restore { distal, proximal } => {
            tables::restore_from_backup(&distal, &proximal)?;
            println!("[{}] Coordinates restored from backup", ts_now());
            Ok(())
        }
    }
}

fn normalize(config: PipelineConfig, input: &Path, output: &Path, fps: Option<f64>) -> Result<()> {
    let mut source = ImageSequence::open(input, fps)
        .with_context(|| format!("opening frames in {}", input.display()))?;
    let mut sink = ImageSequenceWriter::create(output, source.fps())?;
    let pipeline = Pipeline::new(config);
    let video = pipeline.normalize(&mut source, &mut sink)?;

    println!(
        "[{}] Normalized {} frames ({} skipped) to {}",
        ts_now(),
        video.report.processed,
        video.report.skipped_count(),
        output.display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn track(
    config: PipelineConfig,
    frames_dir: &Path,
    heatmaps_dir: &Path,
    force_path: Option<&Path>,
    output: &Path,
    factor_path: Option<&Path>,
    fps: Option<f64>,
    overlay: bool,
) -> Result<()> {
    let mut source = ImageSequence::open(frames_dir, fps)
        .with_context(|| format!("opening frames in {}", frames_dir.display()))?;
    let fps = source.fps();
    let frame_count = source.remaining();

    let force = match force_path {
        Some(path) => Some(
            tables::read_force(path, &config.force_column)
                .with_context(|| format!("reading force {}", path.display()))?,
        ),
        None => None,
    };
    let factor = config.conversion_factor(factor_path);

    let (tx, rx) = unbounded::<StageEvent>();
    let printer = thread::spawn(move || {
        for event in rx {
            println!("[{}] {:?}", ts_now(), event);
        }
    });

    let pipeline = Pipeline::new(config).with_events(tx);
    let heatmaps = HeatmapDirectory::new(heatmaps_dir);
    let mut run = pipeline.track(frame_count, &heatmaps, force.as_deref(), factor, fps)?;

    if overlay {
        let mut frames: Vec<RgbImage> = Vec::with_capacity(frame_count);
        while let Some(frame) = source.next_frame()? {
            frames.push(frame.to_rgb8());
        }
        let mut sink = ImageSequenceWriter::create(&output.join("overlay"), fps)?;
        pipeline.export_overlay(&frames, &mut run, &mut sink)?;
    }

    run.write_outputs(output)?;
    drop(pipeline);
    let _ = printer.join();

    println!("\n=== Run Summary ===");
    println!("Frames tracked: {}/{}", run.summary.frames_tracked, frame_count);
    for landmark in Landmark::ALL {
        println!(
            "{} corrected frames: {}",
            landmark,
            run.summary.corrections.get(&landmark).copied().unwrap_or(0)
        );
    }
    match run.summary.lag {
        Some(lag) => println!(
            "Lag: {} frames ({:.4} s), peak correlation {}",
            lag.lag_frames,
            lag.lag_seconds,
            lag.peak_correlation
                .map(|p| format!("{:.3}", p))
                .unwrap_or_else(|| "undefined".to_string())
        ),
        None => println!("Lag: not computed"),
    }
    Ok(())
}

fn align(
    config: PipelineConfig,
    distal_path: &Path,
    proximal_path: &Path,
    force_path: &Path,
    fps: f64,
    output: &Path,
    factor_path: Option<&Path>,
) -> Result<()> {
    let force = tables::read_force(force_path, &config.force_column)
        .with_context(|| format!("reading force {}", force_path.display()))?;
    let factor = config.conversion_factor(factor_path);

    let pipeline = Pipeline::new(config);
    let dataset = pipeline
        .align_tables(&force, distal_path, proximal_path, factor, fps)
        .with_context(|| format!("aligning against {}", distal_path.display()))?;
    tables::write_aligned(output, &dataset)?;

    println!(
        "[{}] Aligned {} frames to {}",
        ts_now(),
        dataset.len(),
        output.display()
    );
    println!("{}", serde_json::to_string_pretty(&dataset.lag)?);
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
