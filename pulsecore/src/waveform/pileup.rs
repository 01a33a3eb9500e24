use serde::{Deserialize, Serialize};

/// What happens to a waveform once pileup is detected.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PileupPolicy {
    /// Drop the waveform from spectrum and PSD accumulation.
    Reject,
    /// Keep accumulating, but mark its peaks.
    Flag,
}

/// Pileup parameters. Both fields are run configuration without defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PileupSettings {
    /// Minimum number of samples between the earlier pulse returning to the floor
    /// and the later pulse leaving it.
    pub clearance: usize,
    pub policy: PileupPolicy,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PileupVerdict {
    Clean,
    /// Indices (into the peak sequence) of the first offending pair.
    Pileup { earlier: usize, later: usize },
}

impl PileupVerdict {
    pub fn is_pileup(&self) -> bool {
        matches!(self, PileupVerdict::Pileup { .. })
    }
}

/// Checks consecutive peaks for tail overlap.
///
/// For each pair the earlier pulse must decay to `floor` and the later one must
/// rise from it, with at least `clearance` samples in between. A pair that never
/// touches the floor between its two maxima is pileup.
///
/// # Example
///
/// ```rust
/// # use pulsecore::waveform::pileup::{detect_pileup, PileupVerdict};
/// let values = vec![0.0, 80.0, 40.0, 30.0, 90.0, 10.0, 0.0];
/// assert_eq!(detect_pileup(&values, &[1, 4], 5.0, 0), PileupVerdict::Pileup { earlier: 0, later: 1 });
/// ```
pub fn detect_pileup(values: &[f64], positions: &[usize], floor: f64, clearance: usize) -> PileupVerdict {
    for (k, pair) in positions.windows(2).enumerate() {
        let (a, b) = (pair[0], pair[1]);

        let decay_end = (a + 1..b).find(|&i| values[i] <= floor);
        let rise_start = (a + 1..b).rev().find(|&i| values[i] <= floor);

        let overlapping = match (decay_end, rise_start) {
            (Some(end), Some(start)) => start - end < clearance,
            _ => true,
        };

        if overlapping {
            return PileupVerdict::Pileup { earlier: k, later: k + 1 };
        }
    }
    PileupVerdict::Clean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pulses(gap: usize) -> (Vec<f64>, Vec<usize>) {
        let mut values = vec![0.0; 10];
        values.extend([50.0, 100.0, 50.0]);
        values.extend(vec![0.0; gap]);
        values.extend([50.0, 100.0, 50.0]);
        values.extend(vec![0.0; 10]);
        (values, vec![11, 11 + 3 + gap])
    }

    #[test]
    fn test_single_peak_is_clean() {
        let values = vec![0.0, 10.0, 100.0, 10.0, 0.0];
        assert_eq!(detect_pileup(&values, &[2], 5.0, 3), PileupVerdict::Clean);
    }

    #[test]
    fn test_separated_pulses_are_clean() {
        let (values, positions) = two_pulses(6);
        assert_eq!(detect_pileup(&values, &positions, 5.0, 0), PileupVerdict::Clean);
        // six floor samples: decay end and rise start are five apart
        assert_eq!(detect_pileup(&values, &positions, 5.0, 5), PileupVerdict::Clean);
    }

    #[test]
    fn test_clearance_rejects_close_pulses() {
        let (values, positions) = two_pulses(6);
        assert!(detect_pileup(&values, &positions, 5.0, 6).is_pileup());
    }

    #[test]
    fn test_tail_overlap_is_pileup() {
        let values = vec![0.0, 100.0, 60.0, 40.0, 70.0, 20.0, 0.0];
        assert_eq!(
            detect_pileup(&values, &[1, 4], 5.0, 0),
            PileupVerdict::Pileup { earlier: 0, later: 1 }
        );
    }

    #[test]
    fn test_reports_first_offending_pair() {
        let values = vec![0.0, 100.0, 0.0, 0.0, 90.0, 50.0, 95.0, 0.0];
        assert_eq!(
            detect_pileup(&values, &[1, 4, 6], 5.0, 0),
            PileupVerdict::Pileup { earlier: 1, later: 2 }
        );
    }
}
