use pulsecore::spectrum::builder::{IntegrationMethod, RangeIntegral, SpectrumBuilder};
use pulsecore::{Histogram1D, Histogram2D, PeakInfo};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, Result};
use crate::parallel::partial::RunCounters;
use crate::source::MeasurementParameters;

/// Denominator used by [`RunResult::normalized_spectrum`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationBasis {
    TotalCharge,
    TriggerCount,
    /// Counts per second of acquisition.
    AcquisitionTime,
}

/// What [`RunResult::count_rate`] counts.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    Events,
    AcceptedPeaks,
}

/// Reduced and finalized output of a run.
#[derive(Clone, Debug)]
pub struct RunResult {
    counters: RunCounters,
    spectrum: SpectrumBuilder,
    psd: Option<Histogram2D>,
    peaks: Vec<PeakInfo>,
    parameters: MeasurementParameters,
    ranks: usize,
}

/// Serializable digest of a run, written by the command line tool.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub ranks: usize,
    pub counters: RunCounters,
    pub spectrum: Histogram1D,
    pub background: Option<Histogram1D>,
    pub deconvolved: Option<Histogram1D>,
    pub psd_entries: Option<u64>,
    pub retained_peaks: usize,
    /// Events per second, when the acquisition time is known.
    pub event_rate: Option<f64>,
}

impl RunResult {
    pub(crate) fn new(
        counters: RunCounters,
        spectrum: SpectrumBuilder,
        psd: Option<Histogram2D>,
        peaks: Vec<PeakInfo>,
        parameters: MeasurementParameters,
        ranks: usize,
    ) -> Self {
        RunResult {
            counters,
            spectrum,
            psd,
            peaks,
            parameters,
            ranks,
        }
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn spectrum(&self) -> &Histogram1D {
        self.spectrum.spectrum()
    }

    pub fn background(&self) -> Option<&Histogram1D> {
        self.spectrum.background()
    }

    pub fn deconvolved(&self) -> Option<&Histogram1D> {
        self.spectrum.deconvolved()
    }

    /// The finalized builder, for peak and edge searches on the spectrum.
    pub fn builder(&self) -> &SpectrumBuilder {
        &self.spectrum
    }

    pub fn psd_histogram(&self) -> Option<&Histogram2D> {
        self.psd.as_ref()
    }

    /// Retained peaks ordered by `(event, position)`; empty unless `retain_peaks` was set.
    pub fn peaks(&self) -> &[PeakInfo] {
        &self.peaks
    }

    pub fn measurement_parameters(&self) -> &MeasurementParameters {
        &self.parameters
    }

    /// Number of partitions the run was reduced from.
    pub fn ranks(&self) -> usize {
        self.ranks
    }

    pub fn integrate_range(
        &self,
        lo: f64,
        hi: f64,
        subtract_background: bool,
        method: IntegrationMethod,
    ) -> Result<RangeIntegral> {
        Ok(self.spectrum.integrate_range(lo, hi, subtract_background, method)?)
    }

    fn acquisition_time(&self) -> Result<f64> {
        match self.parameters.acquisition_time {
            Some(time) if time.is_finite() && time > 0.0 => Ok(time),
            other => Err(ProcessingError::Config(format!(
                "no usable acquisition time in the measurement parameters: {:?}",
                other
            ))),
        }
    }

    /// Processed events or accepted peaks per second of acquisition.
    pub fn count_rate(&self, basis: RateBasis) -> Result<f64> {
        let time = self.acquisition_time()?;
        let count = match basis {
            RateBasis::Events => self.counters.events,
            RateBasis::AcceptedPeaks => self.counters.peaks_accepted,
        };
        Ok(count as f64 / time)
    }

    /// Spectrum divided by the integrated charge, the trigger count or the acquisition time.
    pub fn normalized_spectrum(&self, basis: NormalizationBasis) -> Result<Histogram1D> {
        let denominator = match basis {
            NormalizationBasis::TotalCharge => self.counters.total_charge,
            NormalizationBasis::TriggerCount => self.parameters.total_trigger_count as f64,
            NormalizationBasis::AcquisitionTime => self.acquisition_time()?,
        };
        if !(denominator.is_finite() && denominator > 0.0) {
            return Err(ProcessingError::Config(format!(
                "cannot normalise by {:?}, value is {}",
                basis, denominator
            )));
        }
        Ok(self.spectrum().scaled(1.0 / denominator))
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            ranks: self.ranks,
            counters: self.counters.clone(),
            spectrum: self.spectrum().clone(),
            background: self.background().cloned(),
            deconvolved: self.deconvolved().cloned(),
            psd_entries: self.psd.as_ref().map(|h| h.entries),
            retained_peaks: self.peaks.len(),
            event_rate: self.count_rate(RateBasis::Events).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsecore::spectrum::background::BackgroundSettings;
    use pulsecore::Axis;

    fn timed(acquisition_time: Option<f64>) -> RunResult {
        let mut run = result(2.0, 8);
        run.counters.peaks_accepted = 3;
        run.parameters.acquisition_time = acquisition_time;
        run
    }

    fn result(total_charge: f64, triggers: u64) -> RunResult {
        let mut builder = SpectrumBuilder::new(Axis::new(4, 0.0, 4.0).unwrap(), BackgroundSettings::default()).unwrap();
        for v in [0.5, 1.5, 1.5, 3.5] {
            builder.accumulate(v).unwrap();
        }
        builder.finalize().unwrap();
        let counters = RunCounters {
            events: 4,
            total_charge,
            ..Default::default()
        };
        let parameters = MeasurementParameters {
            total_trigger_count: triggers,
            acquisition_time: None,
        };
        RunResult::new(counters, builder, None, Vec::new(), parameters, 1)
    }

    #[test]
    fn test_normalisation() {
        let run = result(2.0, 8);
        let by_charge = run.normalized_spectrum(NormalizationBasis::TotalCharge).unwrap();
        assert_eq!(by_charge.contents, vec![0.5, 1.0, 0.0, 0.5]);
        let by_triggers = run.normalized_spectrum(NormalizationBasis::TriggerCount).unwrap();
        assert_eq!(by_triggers.contents, vec![0.125, 0.25, 0.0, 0.125]);

        let uncharged = result(0.0, 0);
        assert!(uncharged.normalized_spectrum(NormalizationBasis::TotalCharge).is_err());
        assert!(uncharged.normalized_spectrum(NormalizationBasis::TriggerCount).is_err());
    }

    #[test]
    fn test_count_rate_and_time_normalisation() {
        let run = timed(Some(0.5));
        assert_eq!(run.count_rate(RateBasis::Events).unwrap(), 8.0);
        assert_eq!(run.count_rate(RateBasis::AcceptedPeaks).unwrap(), 6.0);
        let per_second = run.normalized_spectrum(NormalizationBasis::AcquisitionTime).unwrap();
        assert_eq!(per_second.contents, vec![2.0, 4.0, 0.0, 2.0]);
        assert_eq!(run.summary().event_rate, Some(8.0));

        for missing in [None, Some(0.0), Some(f64::NAN)] {
            let run = timed(missing);
            assert!(matches!(run.count_rate(RateBasis::Events), Err(ProcessingError::Config(_))));
            assert!(run.normalized_spectrum(NormalizationBasis::AcquisitionTime).is_err());
            assert_eq!(run.summary().event_rate, None);
        }
    }

    #[test]
    fn test_range_integral_and_summary() {
        let run = result(1.0, 1);
        let integral = run.integrate_range(1.0, 2.0, false, IntegrationMethod::Counts).unwrap();
        assert_eq!(integral.value, 2.0);
        assert!((integral.error - 2f64.sqrt()).abs() < 1e-12);

        let summary = run.summary();
        assert_eq!(summary.counters.events, 4);
        assert!(summary.background.is_some());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["counters"]["events"], 4);
    }
}
