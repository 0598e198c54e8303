//! Ultrasound tendon insertion tracking.
//!
//! Raw frames are normalized to a canonical raster, an external detector turns
//! them into heatmaps, and this crate follows the distal and proximal
//! insertions through the sequence, corrects sudden jumps with a
//! constant-velocity Kalman filter, and aligns the resulting tendon elongation
//! with an externally recorded force trace.

pub mod alignment;
pub mod centroid;
pub mod config;
pub mod error;
pub mod filters;
pub mod kinematics;
pub mod pipeline;
pub mod preprocess;
pub mod tables;
pub mod types;
pub mod video;
pub mod visualize;

pub use error::{Result, TrackerError};
