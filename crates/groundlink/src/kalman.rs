//! # Kalman Filter — Link Noise Estimation
//!
//! Scalar Kalman filter smoothing the per-sample error ratio (lost and
//! FEC-recovered packets relative to the per-antenna packet count).
//! State: `[estimate]` with its error variance.
//!
//! The filter is seeded from configured priors rather than from the first
//! measurement, so the smoothed noise starts from a known value on every
//! process start.

use crate::config::KalmanPriors;

/// A one-state Kalman filter over the link error ratio.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    // ─── State ───
    estimate: f64,
    error_estimate: f64,

    // ─── Tuning ───
    /// Process noise. Higher = more reactive to changes.
    process_variance: f64,
    /// Measurement noise variance. Higher = smoother output, more lag.
    measurement_variance: f64,
}

impl NoiseFilter {
    pub fn new(priors: &KalmanPriors) -> Self {
        NoiseFilter {
            estimate: priors.estimate,
            error_estimate: priors.error_estimate,
            process_variance: priors.process_variance,
            measurement_variance: priors.measurement_variance,
        }
    }

    /// Current smoothed error ratio.
    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    /// Variance of the current estimate.
    pub fn error_estimate(&self) -> f64 {
        self.error_estimate
    }

    /// Incorporate one measurement and return the new estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        let predicted_error = self.error_estimate + self.process_variance;
        let gain = predicted_error / (predicted_error + self.measurement_variance);

        self.estimate += gain * (measurement - self.estimate);
        self.error_estimate = (1.0 - gain) * predicted_error;

        self.estimate
    }
}
