use bincode::{Decode, Encode};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Settings for local-maximum peak search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakFinderSettings {
    /// Minimum amplitude above baseline for a sample to be a peak.
    pub threshold: f64,
    /// Minimum distance in samples between two reported peaks.
    pub min_separation: usize,
    /// Keep at most this many peaks (the highest ones).
    #[serde(default)]
    pub max_peaks: Option<usize>,
}

impl PeakFinderSettings {
    pub fn new(threshold: f64, min_separation: usize) -> Self {
        PeakFinderSettings {
            threshold,
            min_separation,
            max_peaks: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(PulseError::invalid("threshold", format!("must be a positive number, got {}", self.threshold)));
        }
        if self.min_separation == 0 {
            return Err(PulseError::invalid("min_separation", "must be at least one sample"));
        }
        if self.max_peaks == Some(0) {
            return Err(PulseError::invalid("max_peaks", "must be at least one when set"));
        }
        Ok(())
    }
}

/// A detected and integrated pulse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct PeakInfo {
    pub event: usize,
    pub position: usize,
    pub height: f64,
    pub lower: usize,
    pub upper: usize,
    pub integral: f64,
    pub pileup: bool,
    pub psd_rejected: bool,
    /// (total, tail) integrals when PSD is enabled.
    pub psd: Option<(f64, f64)>,
}

/// Indices above `threshold` that rise from the left and do not rise on the right.
fn local_maxima(values: &[f64], threshold: f64) -> Vec<usize> {
    let n = values.len();
    let mut candidates = Vec::new();
    for i in 0..n {
        let v = values[i];
        if v < threshold {
            continue;
        }
        let rising = i == 0 || v > values[i - 1];
        let not_falling_next = i + 1 == n || v >= values[i + 1];
        if rising && not_falling_next {
            candidates.push(i);
        }
    }
    candidates
}

/// Finds pulse peaks in baseline-corrected values.
///
/// Candidates are accepted highest first; a candidate closer than `min_separation`
/// to an accepted peak is dropped. Equal heights resolve to the earlier index.
///
/// # Arguments
///
/// * `values` - baseline-corrected, polarity-corrected samples (or bin contents).
/// * `settings` - threshold, separation and optional peak cap.
///
/// # Returns
///
/// Peak positions sorted ascending.
///
/// # Example
///
/// ```rust
/// # use pulsecore::waveform::peak::{find_peaks, PeakFinderSettings};
/// let values = vec![0.0, 5.0, 60.0, 20.0, 0.0, 0.0, 80.0, 10.0];
/// let peaks = find_peaks(&values, &PeakFinderSettings::new(50.0, 2));
/// assert_eq!(peaks, vec![2, 6]);
/// ```
pub fn find_peaks(values: &[f64], settings: &PeakFinderSettings) -> Vec<usize> {
    let mut candidates = local_maxima(values, settings.threshold);
    if candidates.is_empty() {
        return candidates;
    }

    // stable sort keeps the earlier index first among equal heights
    candidates.sort_by_key(|&i| std::cmp::Reverse(OrderedFloat(values[i])));

    let limit = settings.max_peaks.unwrap_or(usize::MAX);
    let mut accepted: Vec<usize> = Vec::new();
    for i in candidates {
        if accepted.len() >= limit {
            break;
        }
        if accepted.iter().all(|&a| a.abs_diff(i) >= settings.min_separation) {
            accepted.push(i);
        }
    }

    accepted.sort_unstable();
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_flat_waveform_has_no_peaks() {
        let values = vec![0.0; 256];
        assert!(find_peaks(&values, &PeakFinderSettings::new(1.0, 4)).is_empty());
    }

    #[test]
    fn test_below_threshold_is_ignored() {
        let values = vec![0.0, 3.0, 9.0, 3.0, 0.0];
        assert!(find_peaks(&values, &PeakFinderSettings::new(10.0, 1)).is_empty());
        assert_eq!(find_peaks(&values, &PeakFinderSettings::new(9.0, 1)), vec![2]);
    }

    #[test]
    fn test_equal_maxima_keep_earlier() {
        let values = vec![0.0, 50.0, 0.0, 50.0, 0.0];
        let peaks = find_peaks(&values, &PeakFinderSettings::new(10.0, 3));
        assert_eq!(peaks, vec![1]);
    }

    #[test]
    fn test_plateau_reports_first_sample() {
        let values = vec![0.0, 40.0, 40.0, 40.0, 0.0];
        let peaks = find_peaks(&values, &PeakFinderSettings::new(10.0, 1));
        assert_eq!(peaks, vec![1]);
    }

    #[test]
    fn test_higher_peak_wins_inside_separation() {
        let values = vec![0.0, 30.0, 0.0, 90.0, 0.0, 0.0, 0.0, 0.0, 45.0, 0.0];
        let peaks = find_peaks(&values, &PeakFinderSettings::new(10.0, 4));
        assert_eq!(peaks, vec![3, 8]);
    }

    #[test]
    fn test_max_peaks_keeps_highest() {
        let values = vec![0.0, 30.0, 0.0, 90.0, 0.0, 60.0, 0.0];
        let settings = PeakFinderSettings {
            threshold: 10.0,
            min_separation: 1,
            max_peaks: Some(2),
        };
        assert_eq!(find_peaks(&values, &settings), vec![3, 5]);
    }

    #[test]
    fn test_separation_holds_on_random_input() {
        let mut rng = StdRng::seed_from_u64(17);
        for separation in [1usize, 2, 5, 13, 40] {
            for _ in 0..50 {
                let values: Vec<f64> = (0..512).map(|_| rng.gen_range(0.0..100.0)).collect();
                let peaks = find_peaks(&values, &PeakFinderSettings::new(20.0, separation));
                for pair in peaks.windows(2) {
                    assert!(pair[1] - pair[0] >= separation);
                }
                assert!(peaks.iter().all(|&p| values[p] >= 20.0));
            }
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(PeakFinderSettings::new(0.0, 3).validate().is_err());
        assert!(PeakFinderSettings::new(5.0, 0).validate().is_err());
        assert!(PeakFinderSettings::new(5.0, 3).validate().is_ok());
    }
}
