use std::ops::Range;

use log::{info, warn};
use pulsecore::psd::discriminator::PsdDiscriminator;
use pulsecore::{Calibrator, Histogram1D};

use crate::config::ProcessingConfig;
use crate::error::Result;
use crate::parallel::partial::PartialResult;
use crate::source::RunMetadata;

/// Validated, read-only state of one run, shared by every worker.
///
/// Calibrations and PSD filters are frozen here before any event is
/// processed, so all partitions apply exactly the same mappings.
#[derive(Clone, Debug)]
pub struct ProcessingContext {
    config: ProcessingConfig,
    metadata: RunMetadata,
    calibrator: Calibrator,
    psd: Option<PsdDiscriminator>,
    events: Range<usize>,
}

impl ProcessingContext {
    pub fn new(config: ProcessingConfig, metadata: RunMetadata, num_events: usize) -> Result<Self> {
        config.validate(&metadata)?;

        let mut calibrator = Calibrator::new(metadata.num_channels);
        for entry in &config.calibrations {
            calibrator.clear(entry.channel)?;
            for point in &entry.points {
                calibrator.add_point(entry.channel, point.raw, point.energy)?;
            }
            calibrator.build(entry.channel, entry.model)?;
            info!(
                "channel {}: {:?} calibration with {} points",
                entry.channel,
                entry.model,
                entry.points.len()
            );
        }

        let psd = match &config.psd {
            Some(settings) => {
                let mut discriminator = PsdDiscriminator::new(settings.clone(), metadata.num_channels)?;
                for filter in &config.psd_filters {
                    discriminator.set_filter(filter.channel, filter.polygon.clone(), filter.polarity)?;
                }
                Some(discriminator)
            }
            None => None,
        };

        let events = match config.waveform_range {
            Some((start, end)) => {
                let clamped = start.min(num_events)..end.min(num_events);
                if clamped.end != end {
                    warn!(
                        "waveform range [{}, {}) exceeds the {} available events, using [{}, {})",
                        start, end, num_events, clamped.start, clamped.end
                    );
                }
                clamped
            }
            None => 0..num_events,
        };

        Ok(ProcessingContext {
            config,
            metadata,
            calibrator,
            psd,
            events,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn psd(&self) -> Option<&PsdDiscriminator> {
        self.psd.as_ref()
    }

    /// Events selected for processing.
    pub fn events(&self) -> Range<usize> {
        self.events.clone()
    }

    /// Integration floor in conditioned units.
    pub fn floor(&self) -> f64 {
        self.config.limits.floor(self.config.peak_finding.threshold)
    }

    /// Empty accumulator with this run's binning.
    pub fn empty_partial(&self, rank: usize) -> PartialResult {
        PartialResult::new(
            rank,
            Histogram1D::with_axis(self.config.spectrum.binning),
            self.psd.as_ref().map(|d| d.new_histogram()),
        )
    }
}
