use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Settings for the outward walk that bounds each pulse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Integration floor as a fraction of the peak-finding threshold.
    pub floor_fraction: f64,
    /// Maximum number of samples walked on either side of a peak.
    pub max_search_width: usize,
}

impl LimitSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.floor_fraction) {
            return Err(PulseError::invalid(
                "floor_fraction",
                format!("must lie in [0, 1), got {}", self.floor_fraction),
            ));
        }
        if self.max_search_width == 0 {
            return Err(PulseError::invalid("max_search_width", "must be at least one sample"));
        }
        Ok(())
    }

    pub fn floor(&self, threshold: f64) -> f64 {
        self.floor_fraction * threshold
    }
}

/// Inclusive integration bounds `[lower, upper]` of one pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PeakLimits {
    pub lower: usize,
    pub upper: usize,
}

impl PeakLimits {
    pub fn width(&self) -> usize {
        self.upper - self.lower + 1
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Left,
    Right,
}

fn walk(values: &[f64], position: usize, floor: f64, max_width: usize, direction: Direction) -> Option<usize> {
    let last = values.len() - 1;
    let mut j = position;
    for _ in 0..max_width {
        match direction {
            Direction::Left if j == 0 => return Some(0),
            Direction::Right if j == last => return Some(last),
            Direction::Left => j -= 1,
            Direction::Right => j += 1,
        }
        if values[j] <= floor {
            return Some(j);
        }
    }
    // ran out of search width; the record edge still counts as a bound
    match direction {
        Direction::Left if j == 0 => Some(0),
        Direction::Right if j == last => Some(last),
        _ => None,
    }
}

/// Bounds of a single pulse before overlap resolution.
///
/// Walks outward from `position` until the first sample at or below `floor`
/// (included in the bounds) or the record edge. Returns `None` when either side
/// fails to terminate within `max_width` samples.
pub fn find_limits(values: &[f64], position: usize, floor: f64, max_width: usize) -> Option<PeakLimits> {
    if position >= values.len() {
        return None;
    }
    let lower = walk(values, position, floor, max_width, Direction::Left)?;
    let upper = walk(values, position, floor, max_width, Direction::Right)?;
    Some(PeakLimits { lower, upper })
}

/// Splits overlapping bounds of neighbouring peaks at the local minimum between them.
///
/// The minimum sample goes to the earlier peak, so no sample is shared afterwards.
/// Invalid (`None`) limits are skipped.
pub fn resolve_overlaps(values: &[f64], positions: &[usize], limits: &mut [Option<PeakLimits>]) {
    let mut previous: Option<usize> = None;
    for k in 0..positions.len() {
        if limits[k].is_none() {
            continue;
        }
        if let Some(p) = previous {
            let (Some(earlier), Some(later)) = (limits[p], limits[k]) else {
                continue;
            };
            if earlier.upper >= later.lower {
                let split = argmin_first(values, positions[p], positions[k]);
                limits[p] = Some(PeakLimits { lower: earlier.lower, upper: split });
                limits[k] = Some(PeakLimits { lower: split + 1, upper: later.upper });
            }
        }
        previous = Some(k);
    }
}

/// Earliest index of the minimum in `values[from..to]`.
fn argmin_first(values: &[f64], from: usize, to: usize) -> usize {
    let mut best = from;
    for i in from..to {
        if values[i] < values[best] {
            best = i;
        }
    }
    best
}

/// Limits for every peak of a waveform, overlaps already resolved.
///
/// # Arguments
///
/// * `values` - conditioned waveform.
/// * `positions` - sorted peak positions from [`crate::waveform::peak::find_peaks`].
/// * `threshold` - the peak-finding threshold the floor is derived from.
/// * `settings` - floor fraction and maximum search width.
///
/// # Example
///
/// ```rust
/// # use pulsecore::waveform::limits::{find_peak_limits, LimitSettings, PeakLimits};
/// let values = vec![0.0, 0.0, 10.0, 50.0, 20.0, 0.0, 0.0];
/// let settings = LimitSettings { floor_fraction: 0.0, max_search_width: 10 };
/// let limits = find_peak_limits(&values, &[3], 20.0, &settings);
/// assert_eq!(limits, vec![Some(PeakLimits { lower: 1, upper: 5 })]);
/// ```
pub fn find_peak_limits(
    values: &[f64],
    positions: &[usize],
    threshold: f64,
    settings: &LimitSettings,
) -> Vec<Option<PeakLimits>> {
    let floor = settings.floor(threshold);
    let mut limits: Vec<Option<PeakLimits>> = positions
        .iter()
        .map(|&p| find_limits(values, p, floor, settings.max_search_width))
        .collect();
    resolve_overlaps(values, positions, &mut limits);
    limits
}
