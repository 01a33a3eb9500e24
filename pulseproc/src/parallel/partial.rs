use bincode::{Decode, Encode};
use pulsecore::{Histogram1D, Histogram2D, PeakInfo};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-run tallies. All fields add up across partitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct RunCounters {
    pub events: u64,
    pub peaks_found: u64,
    pub peaks_accepted: u64,
    /// Waveforms without a single peak above threshold.
    pub empty_waveforms: u64,
    pub pileup_waveforms: u64,
    /// Peaks whose limits could not be resolved within the search width.
    pub invalid_limits: u64,
    pub psd_rejected: u64,
    /// Integrated monitor charge, scaled to physical units.
    pub total_charge: f64,
}

impl RunCounters {
    pub fn merge(&mut self, other: &RunCounters) {
        self.events += other.events;
        self.peaks_found += other.peaks_found;
        self.peaks_accepted += other.peaks_accepted;
        self.empty_waveforms += other.empty_waveforms;
        self.pileup_waveforms += other.pileup_waveforms;
        self.invalid_limits += other.invalid_limits;
        self.psd_rejected += other.psd_rejected;
        self.total_charge += other.total_charge;
    }
}

/// Everything one worker accumulates over its partition.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct PartialResult {
    pub rank: usize,
    pub counters: RunCounters,
    pub spectrum: Histogram1D,
    pub psd: Option<Histogram2D>,
    /// Retained peaks, sorted by `(event, position)` after `combine`.
    pub peaks: Vec<PeakInfo>,
}

impl PartialResult {
    pub fn new(rank: usize, spectrum: Histogram1D, psd: Option<Histogram2D>) -> Self {
        PartialResult {
            rank,
            counters: RunCounters::default(),
            spectrum,
            psd,
            peaks: Vec::new(),
        }
    }

    /// Merges two partials. The result carries the lower rank.
    ///
    /// Histogram bins and counters add, peak lists are concatenated and
    /// re-sorted, so the operation is associative and commutative.
    pub fn combine(mut self, other: PartialResult) -> Result<PartialResult> {
        self.spectrum.merge(&other.spectrum)?;
        self.psd = match (self.psd.take(), other.psd) {
            (Some(mut a), Some(b)) => {
                a.merge(&b)?;
                Some(a)
            }
            (a, b) => a.or(b),
        };
        self.counters.merge(&other.counters);
        self.peaks.extend(other.peaks);
        self.peaks.sort_by_key(|p| (p.event, p.position));
        self.rank = self.rank.min(other.rank);
        Ok(self)
    }
}
