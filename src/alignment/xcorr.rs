//! Full discrete cross-correlation and lag search.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Variance below this is treated as a flat series.
const FLAT_STD_EPSILON: f64 = 1e-12;

/// Correlation values with their lags.
///
/// `values[i]` is `sum_n a[n + lag] * v[n]` for `lag = lags[i]`, lags running
/// from `-(len(v) - 1)` to `len(a) - 1`.
#[derive(Debug, Clone)]
pub struct Correlation {
    pub values: Vec<f64>,
    pub lags: Vec<i64>,
}

impl Correlation {
    /// Lag of the first maximum and its value.
    pub fn peak(&self) -> Option<(i64, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &v) in self.values.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ if v.is_nan() => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, v)| (self.lags[i], v))
    }
}

pub fn cross_correlate(a: &[f64], v: &[f64]) -> Result<Correlation> {
    if a.is_empty() || v.is_empty() {
        return Err(TrackerError::EmptySeries("cross-correlation input"));
    }
    let (na, nv) = (a.len() as i64, v.len() as i64);
    let lags: Vec<i64> = (-(nv - 1)..na).collect();

    let values = lags
        .iter()
        .map(|&lag| {
            // n ranges where both a[n + lag] and v[n] exist
            let start = 0.max(-lag);
            let end = nv.min(na - lag);
            (start..end)
                .map(|n| a[(n + lag) as usize] * v[n as usize])
                .sum::<f64>()
        })
        .collect();

    Ok(Correlation { values, lags })
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Population standard deviation.
pub fn std_dev(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let m = mean(x);
    (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
}

pub fn demean(x: &[f64]) -> Vec<f64> {
    let m = mean(x);
    x.iter().map(|v| v - m).collect()
}

/// Optimal temporal offset between two equally long series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LagEstimate {
    /// `a[n + lag_frames]` best matches `b[n]`; positive reads as force ahead of elongation
    pub lag_frames: i64,
    pub lag_seconds: f64,
    /// Peak correlation / (N · std(a) · std(b)); `None` when either series is flat
    pub peak_correlation: Option<f64>,
}

/// De-mean both series, correlate, and pick the lag of the peak.
pub fn estimate_lag(a: &[f64], b: &[f64], fps: f64) -> Result<LagEstimate> {
    if a.len() != b.len() {
        return Err(TrackerError::LengthMismatch {
            what: "correlated series",
            expected: a.len(),
            actual: b.len(),
        });
    }
    if !(fps > 0.0) {
        return Err(TrackerError::InvalidConfig(format!("fps must be positive, got {}", fps)));
    }

    let (std_a, std_b) = (std_dev(a), std_dev(b));
    if std_a < FLAT_STD_EPSILON || std_b < FLAT_STD_EPSILON {
        log::warn!(
            "Cross-correlation undefined: flat series (std {:.3e}, {:.3e}), reporting zero lag",
            std_a,
            std_b
        );
        return Ok(LagEstimate {
            lag_frames: 0,
            lag_seconds: 0.0,
            peak_correlation: None,
        });
    }

    let corr = cross_correlate(&demean(a), &demean(b))?;
    let (lag, peak) = corr.peak().ok_or_else(|| {
        TrackerError::NumericDegenerate("cross-correlation has no finite peak".to_string())
    })?;

    Ok(LagEstimate {
        lag_frames: lag,
        lag_seconds: lag as f64 / fps,
        peak_correlation: Some(peak / (a.len() as f64 * std_a * std_b)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_full_correlation_small() {
        // numpy.correlate([1, 2, 3], [0, 1, 0.5], "full") = [0.5, 2, 3.5, 3, 0]
        let c = cross_correlate(&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.5]).unwrap();
        assert_eq!(c.lags, vec![-2, -1, 0, 1, 2]);
        let expected = [0.5, 2.0, 3.5, 3.0, 0.0];
        for (v, e) in c.values.iter().zip(expected) {
            assert_relative_eq!(*v, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_length_is_2n_minus_1() {
        let a = vec![1.0; 10];
        let c = cross_correlate(&a, &a).unwrap();
        assert_eq!(c.values.len(), 19);
        assert_eq!(c.lags[0], -9);
        assert_eq!(*c.lags.last().unwrap(), 9);
    }

    #[test]
    fn test_peak_takes_first_maximum() {
        let c = Correlation {
            values: vec![1.0, 3.0, 3.0, 2.0],
            lags: vec![-1, 0, 1, 2],
        };
        assert_eq!(c.peak(), Some((0, 3.0)));
    }

    #[test]
    fn test_recovers_shift() {
        let n = 120;
        let base: Vec<f64> = (0..n + 20)
            .map(|i| {
                let t = i as f64;
                (t * 0.11).sin() + 0.5 * (t * 0.037).cos() + if i % 17 == 0 { 0.8 } else { 0.0 }
            })
            .collect();
        for k in [0i64, 3, 7, -5] {
            // a[n] = base[n + 10 - k]: a lags b by k frames
            let a: Vec<f64> = (0..n).map(|i| base[(i as i64 + 10 - k) as usize]).collect();
            let b: Vec<f64> = (0..n).map(|i| base[i + 10]).collect();
            let est = estimate_lag(&a, &b, 50.0).unwrap();
            assert_eq!(est.lag_frames, k, "shift {}", k);
            assert_relative_eq!(est.lag_seconds, k as f64 / 50.0);
            assert!(est.peak_correlation.unwrap() > 0.5);
        }
    }

    #[test]
    fn test_identical_series_peak_is_one() {
        let a: Vec<f64> = (0..64).map(|i| (i as f64 * 0.3).sin()).collect();
        let est = estimate_lag(&a, &a, 30.0).unwrap();
        assert_eq!(est.lag_frames, 0);
        assert_relative_eq!(est.peak_correlation.unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flat_series_is_undefined() {
        let a: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let b = vec![4.2; 10];
        let est = estimate_lag(&a, &b, 10.0).unwrap();
        assert_eq!(est.lag_frames, 0);
        assert!(est.peak_correlation.is_none());
    }

    #[test]
    fn test_length_mismatch() {
        assert!(estimate_lag(&[1.0, 2.0], &[1.0], 10.0).is_err());
    }
}
