/// Constant-Velocity Kalman Filter (4D)
///
/// State Vector (4D):
/// [0]: row position (px)
/// [1]: row velocity (px/s)
/// [2]: column position (px)
/// [3]: column velocity (px/s)
///
/// Position advances by velocity × dt each step, velocity is carried over.
/// Both axes use identical, uncorrelated diagonal noise. The measurement is
/// the (row, col) position.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::types::linalg::*;
use crate::types::LandmarkPoint;

/// Numerical failure of an update step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterFault {
    SingularInnovation,
    NonFinite,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CvKalmanState {
    /// (row, col) [px]
    pub position: (f64, f64),
    /// (v_row, v_col) [px/s]
    pub velocity: (f64, f64),
    pub covariance_trace: f64,
    pub predict_count: u64,
    pub update_count: u64,
}

#[derive(Clone, Debug)]
pub struct ConstantVelocityKalman {
    state: StateVec4,
    covariance: StateMat4,

    transition: StateMat4,
    process_noise: StateMat4,
    observation: ObservationPos,
    measurement_noise: PosNoise,

    predict_count: u64,
    update_count: u64,
}

impl ConstantVelocityKalman {
    pub fn new(
        dt: f64,
        initial_position: LandmarkPoint,
        initial_velocity: (f64, f64),
        config: &CorrectorConfig,
    ) -> Self {
        let state = StateVec4::new(
            initial_position.row,
            initial_velocity.0,
            initial_position.col,
            initial_velocity.1,
        );

        let observation = ObservationPos::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        );

        Self {
            state,
            covariance: StateMat4::identity() * config.initial_covariance,
            transition: Self::build_transition(dt),
            process_noise: StateMat4::identity() * config.process_noise,
            observation,
            measurement_noise: Matrix2::identity() * config.measurement_noise,
            predict_count: 0,
            update_count: 0,
        }
    }

    fn build_transition(dt: f64) -> StateMat4 {
        let mut f = StateMat4::identity();
        f[(IDX_ROW, IDX_V_ROW)] = dt;
        f[(IDX_COL, IDX_V_COL)] = dt;
        f
    }

    /// x = F x, P = F P Fᵀ + Q
    pub fn predict(&mut self) {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
        self.predict_count += 1;
    }

    /// Fuse a position measurement.
    ///
    /// Covariance uses the Joseph form: P = (I - KH) P (I - KH)ᵀ + K R Kᵀ.
    pub fn update(&mut self, measurement: LandmarkPoint) -> Result<(), FilterFault> {
        let z = PosVec::new(measurement.row, measurement.col);
        let h = &self.observation;
        let h_t = h.transpose();

        let innovation = z - h * self.state;
        let s = h * self.covariance * h_t + self.measurement_noise;
        let Some(s_inv) = s.try_inverse() else {
            return Err(FilterFault::SingularInnovation);
        };
        let k: KalmanGainPos = self.covariance * h_t * s_inv;

        let new_state = self.state + k * innovation;
        let i_kh = StateMat4::identity() - k * h;
        let new_cov = i_kh * self.covariance * i_kh.transpose()
            + k * self.measurement_noise * k.transpose();

        if new_state.iter().any(|v| !v.is_finite()) || new_cov.iter().any(|v| !v.is_finite()) {
            return Err(FilterFault::NonFinite);
        }

        self.state = new_state;
        self.covariance = new_cov;
        self.update_count += 1;
        Ok(())
    }

    pub fn position(&self) -> LandmarkPoint {
        LandmarkPoint::new(self.state[IDX_ROW], self.state[IDX_COL])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[IDX_V_ROW], self.state[IDX_V_COL])
    }

    pub fn covariance(&self) -> &StateMat4 {
        &self.covariance
    }

    pub fn get_state(&self) -> CvKalmanState {
        let p = self.position();
        CvKalmanState {
            position: (p.row, p.col),
            velocity: self.velocity(),
            covariance_trace: self.covariance.trace(),
            predict_count: self.predict_count,
            update_count: self.update_count,
        }
    }
}
