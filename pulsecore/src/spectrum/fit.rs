use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

use crate::error::{PulseError, Result};

/// Gaussian `amplitude * exp(-(x - mean)^2 / (2 sigma^2))` fitted to binned data.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
    // log-parabola coefficients in shifted coordinates, and their covariance
    coefficients: Vector3<f64>,
    covariance: Matrix3<f64>,
}

impl GaussianFit {
    /// Area under the fitted curve in units of counts, and its 1-sigma error.
    pub fn integral(&self, bin_width: f64) -> (f64, f64) {
        let value = self.amplitude * self.sigma * (2.0 * PI).sqrt() / bin_width;

        let (b, c) = (self.coefficients[1], self.coefficients[2]);
        let gradient = Vector3::new(1.0, -b / (2.0 * c), b * b / (4.0 * c * c) - 1.0 / (2.0 * c));
        let variance = (gradient.transpose() * self.covariance * gradient)[(0, 0)];

        (value, value * variance.max(0.0).sqrt())
    }
}

/// Fits a Gaussian by weighted least squares on `ln y = a + b u + c u^2`.
///
/// Bins with non-positive content are skipped; the remaining ones are weighted
/// by their content, the Poisson inverse variance of `ln y`.
///
/// # Arguments
///
/// * `x` - bin centers.
/// * `y` - bin contents.
pub fn fit_gaussian(x: &[f64], y: &[f64]) -> Result<GaussianFit> {
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(_, &v)| v > 0.0)
        .map(|(&u, &v)| (u, v))
        .collect();

    if points.len() < 3 {
        return Err(PulseError::FitFailed(format!(
            "need at least 3 populated bins, got {}",
            points.len()
        )));
    }

    let total: f64 = points.iter().map(|p| p.1).sum();
    let shift = points.iter().map(|p| p.0 * p.1).sum::<f64>() / total;

    let mut normal = Matrix3::<f64>::zeros();
    let mut rhs = Vector3::<f64>::zeros();
    for &(xi, yi) in &points {
        let u = xi - shift;
        let row = Vector3::new(1.0, u, u * u);
        normal += yi * row * row.transpose();
        rhs += yi * yi.ln() * row;
    }

    let covariance = normal
        .try_inverse()
        .ok_or_else(|| PulseError::FitFailed("singular normal equations".to_string()))?;
    let coefficients = covariance * rhs;
    let (a, b, c) = (coefficients[0], coefficients[1], coefficients[2]);

    if !(c < 0.0) {
        return Err(PulseError::FitFailed("data is not peaked (curvature >= 0)".to_string()));
    }

    let sigma = (-1.0 / (2.0 * c)).sqrt();
    let mean = shift - b / (2.0 * c);
    let amplitude = (a - b * b / (4.0 * c)).exp();

    Ok(GaussianFit {
        amplitude,
        mean,
        sigma,
        coefficients,
        covariance,
    })
}
