use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};

use crate::error::{PulseError, Result};

/// Estimator used for the pre-trigger pedestal.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    #[default]
    Mean,
    /// Less sensitive to pulses arriving early inside the window.
    Median,
}

/// Pre-trigger sample window `[start, stop)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BaselineWindow {
    pub start: usize,
    pub stop: usize,
}

impl BaselineWindow {
    pub fn new(start: usize, stop: usize) -> Self {
        BaselineWindow { start, stop }
    }

    pub fn width(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    /// Checks the window against a record length.
    ///
    /// The window must lie inside the record and hold at least two samples.
    pub fn validate(&self, record_length: usize) -> Result<()> {
        if self.stop > record_length || self.start >= self.stop || self.width() < 2 {
            return Err(PulseError::BaselineWindow {
                start: self.start,
                stop: self.stop,
                record_length,
            });
        }
        Ok(())
    }
}

/// Estimates the DC offset of a waveform from its pre-trigger window.
///
/// # Arguments
///
/// * `samples` - raw waveform samples.
/// * `window` - pre-trigger window, must fit inside `samples`.
/// * `method` - mean or median of the window.
///
/// # Example
///
/// ```rust
/// # use pulsecore::waveform::baseline::{estimate_baseline, BaselineMethod, BaselineWindow};
/// let samples = vec![100, 102, 98, 100, 20, 100];
/// let baseline = estimate_baseline(&samples, BaselineWindow::new(0, 4), BaselineMethod::Mean).unwrap();
/// assert_eq!(baseline, 100.0);
/// ```
pub fn estimate_baseline(samples: &[i32], window: BaselineWindow, method: BaselineMethod) -> Result<f64> {
    window.validate(samples.len())?;
    let region = &samples[window.start..window.stop];

    let baseline = match method {
        BaselineMethod::Mean => {
            let sum: i64 = region.iter().map(|&s| s as i64).sum();
            sum as f64 / region.len() as f64
        }
        BaselineMethod::Median => {
            let values: Vec<f64> = region.iter().map(|&s| s as f64).collect();
            Data::new(values).median()
        }
    };

    Ok(baseline)
}
