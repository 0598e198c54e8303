use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tendon_tracker_rs::config::CorrectorConfig;
use tendon_tracker_rs::filters::AdaptiveTrajectoryCorrector;
use tendon_tracker_rs::kinematics;
use tendon_tracker_rs::tables;
use tendon_tracker_rs::types::CoordinateSeries;

#[derive(Parser, Debug)]
struct Args {
    /// Path to an insertion coordinate table
    #[arg(long, conflicts_with = "coords_dir")]
    coords: Option<PathBuf>,

    /// Directory of coordinate tables to batch replay (processes *.csv)
    #[arg(long)]
    coords_dir: Option<PathBuf>,

    /// Acceleration thresholds to sweep [px/s²]
    #[arg(long, value_delimiter = ',', default_value = "1121")]
    thresholds: Vec<f64>,

    /// Process noise diagonal (q)
    #[arg(long, default_value = "0.1")]
    process_noise: f64,

    /// Measurement noise diagonal (r)
    #[arg(long, default_value = "1.0")]
    measurement_noise: f64,
}

fn replay_series(series: &CoordinateSeries, config: &CorrectorConfig) -> anyhow::Result<Value> {
    let kin = kinematics::compute(series)?;
    let corrector = AdaptiveTrajectoryCorrector::new(series.landmark, config);
    let (out, state) = corrector.correct_with_state(series, &kin)?;

    let max_accel = kinematics::accelerations(&kin)
        .into_iter()
        .fold(0.0_f64, f64::max);

    Ok(json!({
        "frames": out.len(),
        "corrected": out.corrections(),
        "rms_deviation_px": out.rms_deviation(),
        "max_acceleration": max_accel,
        "final_state": state,
    }))
}

fn run_once(path: &Path, args: &Args) -> anyhow::Result<Value> {
    let table = tables::read_coordinates(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut sweeps = Vec::new();
    for &threshold in &args.thresholds {
        let config = CorrectorConfig {
            acceleration_threshold: threshold,
            process_noise: args.process_noise,
            measurement_noise: args.measurement_noise,
            ..Default::default()
        };
        let distal = replay_series(&table.distal, &config)?;
        let proximal = replay_series(&table.proximal, &config)?;
        println!(
            "[SWEEP] {} T={:.0} distal {}/{} rms={:.3}px proximal {}/{} rms={:.3}px",
            path.display(),
            threshold,
            distal["corrected"],
            distal["frames"],
            distal["rms_deviation_px"].as_f64().unwrap_or(0.0),
            proximal["corrected"],
            proximal["frames"],
            proximal["rms_deviation_px"].as_f64().unwrap_or(0.0),
        );
        sweeps.push(json!({
            "threshold": threshold,
            "distal": distal,
            "proximal": proximal,
        }));
    }

    Ok(json!({
        "coords": path.display().to_string(),
        "fps": table.distal.fps,
        "process_noise": args.process_noise,
        "measurement_noise": args.measurement_noise,
        "sweeps": sweeps,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.thresholds.is_empty() {
        anyhow::bail!("Provide at least one threshold");
    }
    let mut results = Vec::new();

    if let Some(dir) = args.coords_dir.as_ref() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().map(|e| e == "csv").unwrap_or(false))
            .collect();
        paths.sort();
        for path in paths {
            match run_once(&path, &args) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {:#}", path.display(), e),
            }
        }
    } else if let Some(coords) = args.coords.as_ref() {
        results.push(run_once(coords, &args)?);
    } else {
        anyhow::bail!("Provide --coords or --coords-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
