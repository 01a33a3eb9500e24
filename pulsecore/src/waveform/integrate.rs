use crate::waveform::buffer::Polarity;
use crate::waveform::limits::PeakLimits;

/// Riemann sum of conditioned values over inclusive limits, and the maximum inside them.
///
/// The whole run uses this one convention; calibrations built on integrals rely on it.
///
/// # Example
///
/// ```rust
/// # use pulsecore::waveform::integrate::integrate_peak;
/// # use pulsecore::waveform::limits::PeakLimits;
/// let values = vec![0.0, 10.0, 40.0, 20.0, 0.0];
/// let (integral, height) = integrate_peak(&values, PeakLimits { lower: 1, upper: 3 });
/// assert_eq!(integral, 70.0);
/// assert_eq!(height, 40.0);
/// ```
pub fn integrate_peak(values: &[f64], limits: PeakLimits) -> (f64, f64) {
    let window = &values[limits.lower..=limits.upper];
    let integral = window.iter().sum();
    let height = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (integral, height)
}

/// Sum of conditioned values over `[start, stop)`, clamped to the record.
pub fn integrate_window(values: &[f64], start: usize, stop: usize) -> f64 {
    let stop = stop.min(values.len());
    if start >= stop {
        return 0.0;
    }
    values[start..stop].iter().sum()
}

/// Integral over raw samples with the pedestal removed afterwards.
///
/// Equal to integrating the baseline-corrected waveform: `polarity * (sum(raw) - baseline * width)`.
pub fn integrate_raw(samples: &[i32], limits: PeakLimits, baseline: f64, polarity: Polarity) -> f64 {
    let raw: i64 = samples[limits.lower..=limits.upper].iter().map(|&s| s as i64).sum();
    polarity.sign() * (raw as f64 - baseline * limits.width() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::baseline::{estimate_baseline, BaselineMethod, BaselineWindow};
    use crate::waveform::buffer::Waveform;
    use crate::waveform::limits::{find_peak_limits, LimitSettings};
    use crate::waveform::peak::{find_peaks, PeakFinderSettings};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn synthetic(rng: &mut StdRng) -> Vec<i32> {
        let mut samples: Vec<i32> = (0..400).map(|_| 3000 + rng.gen_range(-3..=3)).collect();
        for _ in 0..3 {
            let start = rng.gen_range(60..340);
            let amplitude = rng.gen_range(200.0..1500.0);
            for (k, s) in samples.iter_mut().skip(start).take(50).enumerate() {
                let t = k as f64;
                *s -= (amplitude * (1.0 - (-t / 2.0).exp()) * (-t / 12.0).exp()) as i32;
            }
        }
        samples
    }

    #[test]
    fn test_window_clamps() {
        let values = vec![1.0, 2.0, 3.0];
        assert_eq!(integrate_window(&values, 1, 10), 5.0);
        assert_eq!(integrate_window(&values, 3, 10), 0.0);
    }

    #[test]
    fn test_baseline_subtraction_commutes_with_integration() {
        let mut rng = StdRng::seed_from_u64(5);
        let finder = PeakFinderSettings::new(80.0, 10);
        let limit_settings = LimitSettings { floor_fraction: 0.1, max_search_width: 120 };

        for _ in 0..40 {
            let waveform = Waveform::new(synthetic(&mut rng));
            let baseline = estimate_baseline(waveform.samples(), BaselineWindow::new(0, 50), BaselineMethod::Mean).unwrap();
            let values = waveform.baseline_corrected(baseline, Polarity::Negative);
            let positions = find_peaks(&values, &finder);
            let limits = find_peak_limits(&values, &positions, finder.threshold, &limit_settings);

            let mut corrected: Vec<(usize, f64)> = Vec::new();
            let mut raw: Vec<(usize, f64)> = Vec::new();
            for (k, l) in limits.iter().enumerate() {
                if let Some(l) = l {
                    let (integral, _) = integrate_peak(&values, *l);
                    let from_raw = integrate_raw(waveform.samples(), *l, baseline, Polarity::Negative);
                    assert!((integral - from_raw).abs() < 1e-6 * integral.abs().max(1.0));
                    corrected.push((k, integral));
                    raw.push((k, from_raw));
                }
            }

            corrected.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
            raw.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
            let rank_a: Vec<usize> = corrected.iter().map(|x| x.0).collect();
            let rank_b: Vec<usize> = raw.iter().map(|x| x.0).collect();
            assert_eq!(rank_a, rank_b);
        }
    }
}
