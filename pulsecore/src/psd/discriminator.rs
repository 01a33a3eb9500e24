//! Pulse shape discrimination: total/tail integrals, per-channel polygon
//! filters and the `(total, y)` histogram.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{check_channel, PulseError, Result};
use crate::psd::polygon::PsdFilterPolygon;
use crate::spectrum::histogram::{Axis, Histogram2D};
use crate::waveform::integrate::{integrate_peak, integrate_window};
use crate::waveform::limits::PeakLimits;

/// Quantity plotted against the total integral.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsdYAxis {
    /// Tail integral.
    #[default]
    Tail,
    /// Tail integral divided by the total integral.
    TailTotalRatio,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PsdSettings {
    /// Samples after the peak position where the tail window starts.
    pub tail_offset: usize,
    /// Tail window length; runs to the upper peak limit when absent.
    #[serde(default)]
    pub tail_length: Option<usize>,
    #[serde(default)]
    pub y_quantity: PsdYAxis,
    /// Peaks with a smaller total integral are not histogrammed.
    #[serde(default)]
    pub minimum_total: f64,
    pub total_binning: Axis,
    pub y_binning: Axis,
}

impl PsdSettings {
    pub fn validate(&self) -> Result<()> {
        if self.tail_length == Some(0) {
            return Err(PulseError::invalid("tail_length", "must be at least one sample when set"));
        }
        if !self.minimum_total.is_finite() {
            return Err(PulseError::invalid("minimum_total", "must be finite"));
        }
        Ok(())
    }
}

/// Total and tail integral of one pulse.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct PsdIntegrals {
    pub total: f64,
    pub tail: f64,
}

impl PsdIntegrals {
    pub fn y(&self, quantity: PsdYAxis) -> f64 {
        match quantity {
            PsdYAxis::Tail => self.tail,
            PsdYAxis::TailTotalRatio if self.total != 0.0 => self.tail / self.total,
            PsdYAxis::TailTotalRatio => 0.0,
        }
    }
}

/// Integrates the full pulse and its tail window.
///
/// The tail covers `[position + tail_offset, min(upper, position + tail_offset + tail_length - 1)]`
/// and is zero when that window is empty.
///
/// # Example
///
/// ```rust
/// # use pulsecore::psd::discriminator::{compute_integrals, PsdSettings, PsdYAxis};
/// # use pulsecore::spectrum::histogram::Axis;
/// # use pulsecore::waveform::limits::PeakLimits;
/// let settings = PsdSettings {
///     tail_offset: 2,
///     tail_length: None,
///     y_quantity: PsdYAxis::Tail,
///     minimum_total: 0.0,
///     total_binning: Axis::new(10, 0.0, 100.0).unwrap(),
///     y_binning: Axis::new(10, 0.0, 100.0).unwrap(),
/// };
/// let values = vec![0.0, 10.0, 40.0, 20.0, 8.0, 2.0, 0.0];
/// let integrals = compute_integrals(&values, PeakLimits { lower: 1, upper: 5 }, 2, &settings);
/// assert_eq!(integrals.total, 80.0);
/// assert_eq!(integrals.tail, 10.0);
/// ```
pub fn compute_integrals(values: &[f64], limits: PeakLimits, position: usize, settings: &PsdSettings) -> PsdIntegrals {
    let (total, _) = integrate_peak(values, limits);
    let start = position.saturating_add(settings.tail_offset);
    let end = match settings.tail_length {
        Some(length) => limits.upper.min(start.saturating_add(length).saturating_sub(1)),
        None => limits.upper,
    };
    let tail = if start > end { 0.0 } else { integrate_window(values, start, end + 1) };
    PsdIntegrals { total, tail }
}

/// Which side of a filter polygon is kept.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolarity {
    #[default]
    KeepInside,
    KeepOutside,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PsdClass {
    Inside,
    Outside,
    /// No filter on the channel.
    Unfiltered,
}

#[derive(Clone, Debug, PartialEq)]
struct PsdFilter {
    polygon: PsdFilterPolygon,
    polarity: FilterPolarity,
}

/// Per-channel PSD filters and the rules for filling the `(total, y)` histogram.
///
/// Read-only during a run; every worker fills its own histogram obtained from
/// `new_histogram`.
#[derive(Clone, Debug)]
pub struct PsdDiscriminator {
    settings: PsdSettings,
    filters: Vec<Option<PsdFilter>>,
}

impl PsdDiscriminator {
    pub fn new(settings: PsdSettings, num_channels: usize) -> Result<Self> {
        settings.validate()?;
        Ok(PsdDiscriminator {
            settings,
            filters: vec![None; num_channels],
        })
    }

    /// Empty histogram with the configured binning.
    pub fn new_histogram(&self) -> Histogram2D {
        Histogram2D::new(self.settings.total_binning, self.settings.y_binning)
    }

    pub fn settings(&self) -> &PsdSettings {
        &self.settings
    }

    pub fn set_filter(&mut self, channel: usize, polygon: PsdFilterPolygon, polarity: FilterPolarity) -> Result<()> {
        check_channel(channel, self.filters.len())?;
        self.filters[channel] = Some(PsdFilter { polygon, polarity });
        Ok(())
    }

    pub fn clear_filter(&mut self, channel: usize) -> Result<()> {
        check_channel(channel, self.filters.len())?;
        self.filters[channel] = None;
        Ok(())
    }

    pub fn has_filter(&self, channel: usize) -> Result<bool> {
        check_channel(channel, self.filters.len())?;
        Ok(self.filters[channel].is_some())
    }

    pub fn classify(&self, channel: usize, total: f64, y: f64) -> Result<PsdClass> {
        check_channel(channel, self.filters.len())?;
        Ok(match &self.filters[channel] {
            None => PsdClass::Unfiltered,
            Some(filter) if filter.polygon.contains(total, y) => PsdClass::Inside,
            Some(_) => PsdClass::Outside,
        })
    }

    /// Whether a pulse survives the channel filter, honouring its polarity.
    pub fn passes(&self, channel: usize, integrals: PsdIntegrals) -> Result<bool> {
        let y = integrals.y(self.settings.y_quantity);
        let class = self.classify(channel, integrals.total, y)?;
        let polarity = self.filters[channel].as_ref().map(|f| f.polarity);
        Ok(match (class, polarity) {
            (PsdClass::Unfiltered, _) => true,
            (PsdClass::Inside, Some(FilterPolarity::KeepInside)) => true,
            (PsdClass::Outside, Some(FilterPolarity::KeepOutside)) => true,
            _ => false,
        })
    }

    /// Fills `histogram`; returns false when the total is below `minimum_total`.
    pub fn accumulate(&self, histogram: &mut Histogram2D, integrals: PsdIntegrals) -> bool {
        if !(integrals.total >= self.settings.minimum_total) {
            return false;
        }
        histogram.fill(integrals.total, integrals.y(self.settings.y_quantity));
        true
    }
}
