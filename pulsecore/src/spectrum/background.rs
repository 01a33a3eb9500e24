use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Order in which clipping windows are applied.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClippingDirection {
    #[default]
    Increasing,
    Decreasing,
}

/// Settings for the iterative peak-clipping background estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSettings {
    /// Largest clipping half-window, in bins.
    pub iterations: usize,
    /// Half-width of the local mean used for bins that are not clipped (0 = off).
    #[serde(default)]
    pub smoothing: usize,
    #[serde(default)]
    pub direction: ClippingDirection,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        BackgroundSettings {
            iterations: 20,
            smoothing: 0,
            direction: ClippingDirection::Increasing,
        }
    }
}

impl BackgroundSettings {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(PulseError::invalid("iterations", "background clipping needs at least one pass"));
        }
        Ok(())
    }
}

fn local_mean(values: &[f64], i: usize, half_width: usize) -> f64 {
    let lo = i.saturating_sub(half_width);
    let hi = (i + half_width).min(values.len() - 1);
    let window = &values[lo..=hi];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Estimates the smooth envelope underneath spectral peaks.
///
/// Each pass with half-window `p` replaces a bin by the mean of its neighbours
/// at distance `p` whenever that mean is lower, which shaves peaks off while
/// leaving a slowly varying continuum. Bins closer than `p` to either edge are
/// left alone in that pass.
///
/// # Arguments
///
/// * `contents` - spectrum bin contents.
/// * `settings` - number of passes, optional smoothing, window order.
///
/// # Returns
///
/// Background with the same length as `contents`, never above it.
///
/// # Example
///
/// ```rust
/// # use pulsecore::spectrum::background::{estimate_background, BackgroundSettings};
/// let mut contents = vec![10.0; 41];
/// contents[20] = 500.0;
/// let background = estimate_background(&contents, &BackgroundSettings::default());
/// assert_eq!(background[20], 10.0);
/// ```
pub fn estimate_background(contents: &[f64], settings: &BackgroundSettings) -> Vec<f64> {
    let n = contents.len();
    let mut current = contents.to_vec();
    if n < 3 {
        return current;
    }

    let max_window = settings.iterations.min((n - 1) / 2);
    let windows: Vec<usize> = match settings.direction {
        ClippingDirection::Increasing => (1..=max_window).collect(),
        ClippingDirection::Decreasing => (1..=max_window).rev().collect(),
    };

    let mut next = current.clone();
    for p in windows {
        for i in p..n - p {
            let clipped = 0.5 * (current[i - p] + current[i + p]);
            let own = if settings.smoothing > 0 {
                local_mean(&current, i, settings.smoothing)
            } else {
                current[i]
            };
            next[i] = if clipped < current[i] { clipped } else { own.min(current[i]) };
        }
        current.copy_from_slice(&next);
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_on_slope(n: usize) -> (Vec<f64>, Vec<f64>) {
        let continuum: Vec<f64> = (0..n).map(|i| 200.0 - 0.5 * i as f64).collect();
        let spectrum: Vec<f64> = continuum
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let x = i as f64 - 100.0;
                c + 1000.0 * (-x * x / (2.0 * 4.0 * 4.0)).exp()
            })
            .collect();
        (spectrum, continuum)
    }

    #[test]
    fn test_background_follows_linear_continuum() {
        let (spectrum, continuum) = gaussian_on_slope(200);
        let settings = BackgroundSettings { iterations: 30, ..Default::default() };
        let background = estimate_background(&spectrum, &settings);
        // a straight line is a fixed point of the clipping
        assert!((background[100] - continuum[100]).abs() < 1.0);
        assert!((background[20] - continuum[20]).abs() < 1e-9);
    }

    #[test]
    fn test_background_never_exceeds_spectrum() {
        let (spectrum, _) = gaussian_on_slope(200);
        for direction in [ClippingDirection::Increasing, ClippingDirection::Decreasing] {
            let settings = BackgroundSettings { iterations: 15, smoothing: 2, direction };
            let background = estimate_background(&spectrum, &settings);
            assert_eq!(background.len(), spectrum.len());
            for (b, s) in background.iter().zip(spectrum.iter()) {
                assert!(b <= s);
            }
        }
    }

    #[test]
    fn test_short_spectrum_is_returned_unchanged() {
        let contents = vec![3.0, 9.0];
        assert_eq!(estimate_background(&contents, &BackgroundSettings::default()), contents);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let settings = BackgroundSettings { iterations: 0, ..Default::default() };
        assert!(settings.validate().is_err());
    }
}
