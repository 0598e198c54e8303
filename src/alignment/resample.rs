//! Fourier-domain resampling.
//!
//! The whole signal is transformed, its spectrum truncated or zero-padded to
//! the target length, and transformed back. The signal is treated as one
//! period of a periodic sequence, so the mean is preserved exactly and
//! low-frequency shape is kept.

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::error::{Result, TrackerError};

/// Resample `signal` to exactly `num` samples.
pub fn resample_fft(signal: &[f64], num: usize) -> Result<Vec<f64>> {
    let nx = signal.len();
    if nx == 0 {
        return Err(TrackerError::EmptySeries("resample input"));
    }
    if num == 0 {
        return Err(TrackerError::EmptySeries("resample target"));
    }
    if let Some(i) = signal.iter().position(|v| !v.is_finite()) {
        return Err(TrackerError::NumericDegenerate(format!(
            "resample input sample {} is {}",
            i, signal[i]
        )));
    }
    if num == nx {
        return Ok(signal.to_vec());
    }

    let mut planner = FftPlanner::<f64>::new();

    let mut spectrum: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    planner.plan_fft_forward(nx).process(&mut spectrum);

    // Half-spectrum of the output: bins 0..=num/2
    let half_len = num / 2 + 1;
    let mut half = vec![Complex64::new(0.0, 0.0); half_len];
    let n = nx.min(num);
    let nyq = n / 2 + 1;
    for k in 0..nyq.min(half_len) {
        half[k] = spectrum[k];
    }
    if n % 2 == 0 {
        let k = n / 2;
        if k < half_len {
            if num < nx {
                // Downsampling: the kept Nyquist bin stands for both ±k.
                half[k] *= 2.0;
            } else {
                // Upsampling: split the old Nyquist energy between ±k.
                half[k] *= 0.5;
            }
        }
    }

    // Hermitian-symmetric full spectrum of length `num`.
    let mut full = vec![Complex64::new(0.0, 0.0); num];
    full[0] = Complex64::new(half[0].re, 0.0);
    for k in 1..half_len {
        if num % 2 == 0 && k == num / 2 {
            full[k] = Complex64::new(half[k].re, 0.0);
        } else {
            full[k] = half[k];
            full[num - k] = half[k].conj();
        }
    }

    planner.plan_fft_inverse(num).process(&mut full);

    // Unnormalised inverse → divide by num, then rescale amplitude by num / nx.
    let scale = 1.0 / nx as f64;
    let out: Vec<f64> = full.iter().map(|c| c.re * scale).collect();

    if out.iter().any(|v| !v.is_finite()) {
        return Err(TrackerError::NumericDegenerate(
            "resampling produced non-finite values".to_string(),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn mean(v: &[f64]) -> f64 {
        v.iter().sum::<f64>() / v.len() as f64
    }

    #[test]
    fn test_identity_when_lengths_match() {
        let x = [1.0, -2.0, 3.5, 0.25];
        assert_eq!(resample_fft(&x, 4).unwrap(), x.to_vec());
    }

    #[test]
    fn test_output_length() {
        let x: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.01).sin()).collect();
        for num in [1usize, 2, 7, 10, 99, 100, 333, 1000, 1500] {
            assert_eq!(resample_fft(&x, num).unwrap().len(), num);
        }
        let odd: Vec<f64> = (0..17).map(|i| i as f64).collect();
        for num in [1usize, 4, 5, 16, 18, 31, 64] {
            assert_eq!(resample_fft(&odd, num).unwrap().len(), num);
        }
    }

    #[test]
    fn test_constant_stays_constant() {
        let x = vec![3.0; 1000];
        let y = resample_fft(&x, 10).unwrap();
        for v in y {
            assert_relative_eq!(v, 3.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_mean_preserved() {
        let x: Vec<f64> = (0..500)
            .map(|i| 5.0 + (2.0 * PI * i as f64 / 500.0).sin() + 0.3 * (i as f64 * 0.37).cos())
            .collect();
        for num in [50usize, 123, 800] {
            let y = resample_fft(&x, num).unwrap();
            assert_relative_eq!(mean(&y), mean(&x), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_periodic_sine_is_sampled_exactly() {
        // One period of a sine, band-limited: downsampling hits the exact samples.
        let x: Vec<f64> = (0..400)
            .map(|i| (2.0 * PI * i as f64 / 400.0).sin())
            .collect();
        let y = resample_fft(&x, 40).unwrap();
        for (i, v) in y.iter().enumerate() {
            assert_relative_eq!(*v, (2.0 * PI * i as f64 / 40.0).sin(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_round_trip_keeps_low_frequency_shape() {
        let x: Vec<f64> = (0..256)
            .map(|i| 10.0 + 4.0 * (2.0 * PI * 2.0 * i as f64 / 256.0).cos())
            .collect();
        let down = resample_fft(&x, 32).unwrap();
        let back = resample_fft(&down, 256).unwrap();
        for (a, b) in x.iter().zip(&back) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_non_finite_input_is_degenerate() {
        let mut x: Vec<f64> = (0..100).map(|i| (i as f64 * 0.1).sin()).collect();
        x[42] = f64::NAN;
        for num in [10usize, 100, 250] {
            assert!(matches!(
                resample_fft(&x, num),
                Err(TrackerError::NumericDegenerate(_))
            ));
        }
        x[42] = f64::INFINITY;
        assert!(matches!(
            resample_fft(&x, 10),
            Err(TrackerError::NumericDegenerate(_))
        ));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert!(resample_fft(&[], 10).is_err());
        assert!(resample_fft(&[1.0], 0).is_err());
    }
}
