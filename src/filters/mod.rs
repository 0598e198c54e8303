pub mod cv_kalman;
pub mod trajectory;

pub use cv_kalman::ConstantVelocityKalman;
pub use trajectory::{AdaptiveTrajectoryCorrector, CorrectedPoint, CorrectedSeries};
