//! Per-waveform processing: conditioning, peaks, limits, pileup, integrals,
//! PSD and monitor charge, then accumulation into a partial result.

use log::trace;
use pulsecore::psd::discriminator::{compute_integrals, PsdIntegrals};
use pulsecore::waveform::baseline::estimate_baseline;
use pulsecore::waveform::integrate::{integrate_peak, integrate_window};
use pulsecore::waveform::limits::find_peak_limits;
use pulsecore::waveform::peak::find_peaks;
use pulsecore::waveform::pileup::{detect_pileup, PileupPolicy};
use pulsecore::{PeakInfo, Waveform};

use crate::config::{ChargeConfig, ConditioningConfig, SpectrumQuantity};
use crate::context::ProcessingContext;
use crate::error::{ProcessingError, Result};
use crate::parallel::partial::PartialResult;
use crate::source::WaveformSource;

/// What one event produced before anything is accumulated.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformOutcome {
    pub event: usize,
    pub peaks_found: usize,
    pub invalid_limits: usize,
    pub pileup: bool,
    /// Peaks with resolved limits, in position order.
    pub peaks: Vec<PeakInfo>,
    pub charge: Option<f64>,
}

fn fetch<S: WaveformSource + ?Sized>(
    context: &ProcessingContext,
    source: &S,
    event: usize,
    channel: usize,
) -> Result<Waveform> {
    let waveform = source.waveform(event, channel)?;
    let expected = context.metadata().record_length;
    if waveform.len() != expected {
        return Err(ProcessingError::RecordLength {
            event,
            channel,
            expected,
            found: waveform.len(),
        });
    }
    Ok(waveform)
}

/// Baseline-corrected, polarity-corrected and optionally zero-suppressed values.
pub fn condition(waveform: &Waveform, conditioning: &ConditioningConfig) -> Result<Vec<f64>> {
    let baseline = estimate_baseline(
        waveform.samples(),
        conditioning.baseline_window,
        conditioning.baseline_method,
    )?;
    Ok(match conditioning.zero_suppression {
        Some(ceiling) => waveform.zero_suppressed(baseline, conditioning.polarity, ceiling),
        None => waveform.baseline_corrected(baseline, conditioning.polarity),
    })
}

/// Scaled monitor integral over the configured window.
pub fn integrate_charge(waveform: &Waveform, charge: &ChargeConfig) -> Result<f64> {
    let baseline = estimate_baseline(waveform.samples(), charge.baseline_window, charge.baseline_method)?;
    let values = waveform.baseline_corrected(baseline, charge.polarity);
    Ok(integrate_window(&values, charge.start, charge.stop) * charge.units_per_integral)
}

/// Runs the full chain on one event of the analysed channel.
pub fn process_event<S: WaveformSource + ?Sized>(
    context: &ProcessingContext,
    source: &S,
    event: usize,
) -> Result<WaveformOutcome> {
    let config = context.config();
    let channel = config.channel;
    let waveform = fetch(context, source, event, channel)?;
    let values = condition(&waveform, &config.conditioning)?;

    let positions = find_peaks(&values, &config.peak_finding);
    let limits = find_peak_limits(&values, &positions, config.peak_finding.threshold, &config.limits);
    let verdict = detect_pileup(&values, &positions, context.floor(), config.pileup.clearance);
    let pileup = verdict.is_pileup();

    let mut peaks = Vec::with_capacity(positions.len());
    let mut invalid_limits = 0;
    for (&position, bounds) in positions.iter().zip(limits.iter()) {
        let Some(bounds) = bounds else {
            invalid_limits += 1;
            continue;
        };
        let (integral, height) = integrate_peak(&values, *bounds);

        let (psd, psd_rejected) = match context.psd() {
            Some(discriminator) => {
                let integrals = compute_integrals(&values, *bounds, position, discriminator.settings());
                let passes = discriminator.passes(channel, integrals)?;
                (Some((integrals.total, integrals.tail)), !passes)
            }
            None => (None, false),
        };

        peaks.push(PeakInfo {
            event,
            position,
            height,
            lower: bounds.lower,
            upper: bounds.upper,
            integral,
            pileup,
            psd_rejected,
            psd,
        });
    }

    let charge = match &config.charge {
        Some(charge) => {
            let monitor = fetch(context, source, event, charge.channel)?;
            Some(integrate_charge(&monitor, charge)?)
        }
        None => None,
    };

    trace!(
        "event {}: {} peaks, {} invalid limits, pileup {}",
        event,
        positions.len(),
        invalid_limits,
        pileup
    );

    Ok(WaveformOutcome {
        event,
        peaks_found: positions.len(),
        invalid_limits,
        pileup,
        peaks,
        charge,
    })
}

/// Adds one event's outcome to a partial result.
///
/// Under the reject policy a piled-up waveform fills nothing; its peaks still
/// count as found. PSD-rejected peaks are histogrammed in PSD space but kept
/// out of the spectrum.
pub fn accumulate(context: &ProcessingContext, partial: &mut PartialResult, outcome: WaveformOutcome) -> Result<()> {
    let config = context.config();
    let counters = &mut partial.counters;
    counters.events += 1;
    counters.peaks_found += outcome.peaks_found as u64;
    counters.invalid_limits += outcome.invalid_limits as u64;
    if outcome.peaks_found == 0 {
        counters.empty_waveforms += 1;
    }
    if outcome.pileup {
        counters.pileup_waveforms += 1;
    }
    if let Some(charge) = outcome.charge {
        counters.total_charge += charge;
    }

    let fills = !(outcome.pileup && config.pileup.policy == PileupPolicy::Reject);
    for peak in outcome.peaks {
        if fills {
            if let (Some(discriminator), Some(histogram), Some((total, tail))) =
                (context.psd(), partial.psd.as_mut(), peak.psd)
            {
                discriminator.accumulate(histogram, PsdIntegrals { total, tail });
            }
            if peak.psd_rejected {
                partial.counters.psd_rejected += 1;
            } else {
                let raw = match config.spectrum.quantity {
                    SpectrumQuantity::Integral => peak.integral,
                    SpectrumQuantity::Height => peak.height,
                };
                let value = context.calibrator().apply(config.channel, raw)?;
                partial.spectrum.fill(value);
                partial.counters.peaks_accepted += 1;
            }
        }
        if config.retain_peaks {
            partial.peaks.push(peak);
        }
    }
    Ok(())
}
