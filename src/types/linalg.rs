//! Linear algebra type system for the landmark filters
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the constant-velocity Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM_CV: usize = 4; // [row, v_row, col, v_col]

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POS: usize = 2; // (row, col)

// ===== Constant-Velocity Filter Types =====
pub type StateVec4 = SVector<f64, STATE_DIM_CV>;
pub type StateMat4 = SMatrix<f64, STATE_DIM_CV, STATE_DIM_CV>;

// Measurement types
pub type PosVec = SVector<f64, MEASURE_DIM_POS>;
pub type PosNoise = SMatrix<f64, MEASURE_DIM_POS, MEASURE_DIM_POS>;

// Kalman gain: 4×2
pub type KalmanGainPos = SMatrix<f64, STATE_DIM_CV, MEASURE_DIM_POS>;

// Observation model: 2×4
pub type ObservationPos = SMatrix<f64, MEASURE_DIM_POS, STATE_DIM_CV>;

// State indices
pub const IDX_ROW: usize = 0;
pub const IDX_V_ROW: usize = 1;
pub const IDX_COL: usize = 2;
pub const IDX_V_COL: usize = 3;
