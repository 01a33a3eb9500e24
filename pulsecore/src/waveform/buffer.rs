use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Sign of the pulses produced by a detector channel.
///
/// # Description
///
/// Conditioning multiplies by the polarity sign so that pulses are always
/// positive-going after baseline subtraction, whatever the detector emits.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn sign(&self) -> f64 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }
}

impl Default for Polarity {
    fn default() -> Self {
        Polarity::Negative
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => write!(f, "Positive"),
            Polarity::Negative => write!(f, "Negative"),
        }
    }
}

/// One channel's raw digitizer samples for a single trigger.
///
/// Uses Arc<Vec<i32>> so a waveform can be handed to several stages without copying.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    samples: Arc<Vec<i32>>,
}

impl Waveform {
    /// Constructs a new `Waveform`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use pulsecore::waveform::buffer::Waveform;
    /// let waveform = Waveform::new(vec![100, 101, 99, 100]);
    /// assert_eq!(waveform.len(), 4);
    /// assert_eq!(waveform.samples(), &[100, 101, 99, 100]);
    /// ```
    pub fn new(samples: Vec<i32>) -> Self {
        Waveform {
            samples: Arc::new(samples),
        }
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Baseline-subtracted, polarity-corrected copy of the samples.
    ///
    /// # Arguments
    ///
    /// * `baseline` - DC pedestal in raw ADC units.
    /// * `polarity` - pulse polarity of the channel.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use pulsecore::waveform::buffer::{Polarity, Waveform};
    /// let waveform = Waveform::new(vec![100, 100, 60, 100]);
    /// let corrected = waveform.baseline_corrected(100.0, Polarity::Negative);
    /// assert_eq!(corrected, vec![0.0, 0.0, 40.0, 0.0]);
    /// ```
    pub fn baseline_corrected(&self, baseline: f64, polarity: Polarity) -> Vec<f64> {
        let sign = polarity.sign();
        self.samples
            .iter()
            .map(|&s| sign * (s as f64 - baseline))
            .collect()
    }

    /// Baseline-corrected samples with everything below `ceiling` set to zero.
    pub fn zero_suppressed(&self, baseline: f64, polarity: Polarity, ceiling: f64) -> Vec<f64> {
        let mut values = self.baseline_corrected(baseline, polarity);
        zero_suppress(&mut values, ceiling);
        values
    }
}

impl From<Vec<i32>> for Waveform {
    fn from(samples: Vec<i32>) -> Self {
        Waveform::new(samples)
    }
}

pub fn zero_suppress(values: &mut [f64], ceiling: f64) {
    for v in values.iter_mut() {
        if *v < ceiling {
            *v = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_polarity_keeps_sign() {
        let waveform = Waveform::new(vec![10, 12, 30, 11]);
        let corrected = waveform.baseline_corrected(10.0, Polarity::Positive);
        assert_eq!(corrected, vec![0.0, 2.0, 20.0, 1.0]);
    }

    #[test]
    fn test_zero_suppression() {
        let waveform = Waveform::new(vec![100, 98, 40, 95, 100]);
        let suppressed = waveform.zero_suppressed(100.0, Polarity::Negative, 5.0);
        // 2.0 is below the ceiling, 5.0 is not
        assert_eq!(suppressed, vec![0.0, 0.0, 60.0, 5.0, 0.0]);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let waveform = Waveform::new(vec![1, 2, 3]);
        let other = waveform.clone();
        assert!(Arc::ptr_eq(&waveform.samples, &other.samples));
    }
}
