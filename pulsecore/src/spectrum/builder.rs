use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};
use crate::spectrum::background::{estimate_background, BackgroundSettings};
use crate::spectrum::fit::fit_gaussian;
use crate::spectrum::histogram::{Axis, Histogram1D};
use crate::waveform::peak::{find_peaks, PeakFinderSettings};

/// How `integrate_range` turns bins into a number.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Plain sum of bin contents, sqrt(N) error.
    #[default]
    Counts,
    /// Area of a Gaussian fitted to the range, error from the fit covariance.
    GaussianFit,
}

/// Integral over a spectrum range with its statistical error.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeIntegral {
    pub value: f64,
    pub error: f64,
}

/// A peak located in bin content.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumPeak {
    pub bin: usize,
    pub position: f64,
    pub content: f64,
}

/// Owns the pulse spectrum and the histograms derived from it.
///
/// Accumulation is only possible until `finalize` has run; the background and
/// the background-subtracted spectrum are then available.
#[derive(Clone, Debug)]
pub struct SpectrumBuilder {
    spectrum: Histogram1D,
    settings: BackgroundSettings,
    background: Option<Histogram1D>,
    deconvolved: Option<Histogram1D>,
}

impl SpectrumBuilder {
    pub fn new(axis: Axis, settings: BackgroundSettings) -> Result<Self> {
        settings.validate()?;
        Ok(SpectrumBuilder {
            spectrum: Histogram1D::with_axis(axis),
            settings,
            background: None,
            deconvolved: None,
        })
    }

    /// Wraps an already accumulated histogram, e.g. the reduced result of several workers.
    pub fn from_histogram(spectrum: Histogram1D, settings: BackgroundSettings) -> Result<Self> {
        settings.validate()?;
        Ok(SpectrumBuilder {
            spectrum,
            settings,
            background: None,
            deconvolved: None,
        })
    }

    pub fn accumulate(&mut self, value: f64) -> Result<()> {
        if self.is_finalized() {
            return Err(PulseError::SpectrumFinalized);
        }
        self.spectrum.fill(value);
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.background.is_some()
    }

    /// Computes background and background-subtracted spectrum.
    ///
    /// Both are derived from the spectrum alone, so repeated calls give identical results.
    pub fn finalize(&mut self) -> Result<()> {
        let axis = self.spectrum.axis;
        let background = estimate_background(&self.spectrum.contents, &self.settings);
        let deconvolved: Vec<f64> = self
            .spectrum
            .contents
            .iter()
            .zip(background.iter())
            .map(|(s, b)| (s - b).max(0.0))
            .collect();

        self.background = Some(Histogram1D::from_contents(axis, background)?);
        self.deconvolved = Some(Histogram1D::from_contents(axis, deconvolved)?);
        Ok(())
    }

    pub fn spectrum(&self) -> &Histogram1D {
        &self.spectrum
    }

    pub fn background(&self) -> Option<&Histogram1D> {
        self.background.as_ref()
    }

    pub fn deconvolved(&self) -> Option<&Histogram1D> {
        self.deconvolved.as_ref()
    }

    pub fn settings(&self) -> &BackgroundSettings {
        &self.settings
    }

    /// First difference of the spectrum, placed at the center of the lower bin.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use pulsecore::spectrum::builder::SpectrumBuilder;
    /// # use pulsecore::spectrum::histogram::Axis;
    /// # use pulsecore::spectrum::background::BackgroundSettings;
    /// let mut builder = SpectrumBuilder::new(Axis::new(3, 0.0, 3.0).unwrap(), BackgroundSettings::default()).unwrap();
    /// builder.accumulate(1.5).unwrap();
    /// let derivative = builder.compute_derivative();
    /// assert_eq!(derivative, vec![(0.5, 1.0), (1.5, -1.0)]);
    /// ```
    pub fn compute_derivative(&self) -> Vec<(f64, f64)> {
        self.spectrum
            .contents
            .windows(2)
            .enumerate()
            .map(|(i, w)| (self.spectrum.bin_center(i), w[1] - w[0]))
            .collect()
    }

    /// Peaks in bin content, using the waveform peak finder.
    ///
    /// Uses the background-subtracted spectrum when it exists and `use_deconvolved` is set.
    pub fn find_spectrum_peaks(&self, settings: &PeakFinderSettings, use_deconvolved: bool) -> Vec<SpectrumPeak> {
        let histogram = match (use_deconvolved, self.deconvolved.as_ref()) {
            (true, Some(d)) => d,
            _ => &self.spectrum,
        };
        find_peaks(&histogram.contents, settings)
            .into_iter()
            .map(|bin| SpectrumPeak {
                bin,
                position: histogram.bin_center(bin),
                content: histogram.contents[bin],
            })
            .collect()
    }

    /// Steepest falling edges of the spectrum (e.g. Compton edges).
    ///
    /// Peaks of the negated derivative; `content` holds the slope magnitude.
    pub fn find_edges(&self, settings: &PeakFinderSettings) -> Vec<SpectrumPeak> {
        let derivative = self.compute_derivative();
        let falling: Vec<f64> = derivative.iter().map(|(_, d)| -d).collect();
        find_peaks(&falling, settings)
            .into_iter()
            .map(|i| SpectrumPeak {
                bin: i,
                position: self.spectrum.axis.low_edge(i + 1),
                content: falling[i],
            })
            .collect()
    }

    /// Integrates bins whose centers lie in `[lo, hi]`.
    ///
    /// # Arguments
    ///
    /// * `lo`, `hi` - range in spectrum units.
    /// * `subtract_background` - use the background-subtracted spectrum (requires `finalize`).
    /// * `method` - plain count sum or Gaussian fit.
    pub fn integrate_range(
        &self,
        lo: f64,
        hi: f64,
        subtract_background: bool,
        method: IntegrationMethod,
    ) -> Result<RangeIntegral> {
        if !(lo < hi) {
            return Err(PulseError::invalid("range", format!("lower bound {} must be below upper bound {}", lo, hi)));
        }
        let (values, background) = if subtract_background {
            match (self.deconvolved.as_ref(), self.background.as_ref()) {
                (Some(d), Some(b)) => (&d.contents, Some(&b.contents)),
                _ => {
                    return Err(PulseError::invalid(
                        "subtract_background",
                        "spectrum must be finalized before background-subtracted integration",
                    ))
                }
            }
        } else {
            (&self.spectrum.contents, None)
        };

        let range = self.spectrum.bin_range(lo, hi);
        match method {
            IntegrationMethod::Counts => {
                let value: f64 = values[range.clone()].iter().sum();
                let mut variance: f64 = self.spectrum.contents[range.clone()].iter().sum();
                if let Some(b) = background {
                    variance += b[range].iter().sum::<f64>();
                }
                Ok(RangeIntegral { value, error: variance.sqrt() })
            }
            IntegrationMethod::GaussianFit => {
                let x: Vec<f64> = range.clone().map(|b| self.spectrum.bin_center(b)).collect();
                let y: Vec<f64> = values[range].to_vec();
                let fit = fit_gaussian(&x, &y)?;
                let (value, error) = fit.integral(self.spectrum.bin_width());
                Ok(RangeIntegral { value, error })
            }
        }
    }
}
