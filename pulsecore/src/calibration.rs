//! Per-channel energy calibration.
//!
//! Each channel collects `(raw, energy)` points, builds a monotonic mapping
//! from them, and applies it until cleared or disabled. Channels without an
//! active calibration map values through unchanged.

use itertools::Itertools;
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{check_channel, PulseError, Result};

/// One `(raw value, physical energy)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub raw: f64,
    pub energy: f64,
}

impl CalibrationPoint {
    pub fn new(raw: f64, energy: f64) -> Self {
        CalibrationPoint { raw, energy }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationModel {
    /// Straight segments through every point, end segments extrapolated.
    #[default]
    PiecewiseLinear,
    /// Single least-squares line through all points.
    LeastSquaresLinear,
}

/// A validated, ready-to-apply calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    points: Vec<CalibrationPoint>,
    model: CalibrationModel,
    // least-squares line, (intercept, slope)
    line: Option<(f64, f64)>,
}

impl Calibration {
    /// Validates the points and fits the mapping.
    ///
    /// Requires at least two finite points with strictly increasing raw values and
    /// strictly increasing energies.
    pub fn build(points: &[CalibrationPoint], model: CalibrationModel) -> Result<Self> {
        if points.len() < 2 {
            return Err(PulseError::InvalidCalibration(format!(
                "at least 2 points are required, got {}",
                points.len()
            )));
        }
        if points.iter().any(|p| !p.raw.is_finite() || !p.energy.is_finite()) {
            return Err(PulseError::InvalidCalibration("points must be finite".to_string()));
        }
        for (a, b) in points.iter().tuple_windows() {
            if b.raw <= a.raw {
                return Err(PulseError::InvalidCalibration(format!(
                    "raw values must be strictly increasing ({} then {})",
                    a.raw, b.raw
                )));
            }
            if b.energy <= a.energy {
                return Err(PulseError::InvalidCalibration(format!(
                    "energies must be strictly increasing ({} then {})",
                    a.energy, b.energy
                )));
            }
        }

        let line = match model {
            CalibrationModel::PiecewiseLinear => None,
            CalibrationModel::LeastSquaresLinear => Some(least_squares_line(points)?),
        };

        Ok(Calibration {
            points: points.to_vec(),
            model,
            line,
        })
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn model(&self) -> CalibrationModel {
        self.model
    }

    /// Maps a raw value to energy.
    pub fn apply(&self, raw: f64) -> f64 {
        if let Some((intercept, slope)) = self.line {
            return intercept + slope * raw;
        }

        // segment containing raw, or the nearest end segment
        let last = self.points.len() - 2;
        let k = self.points[1..]
            .iter()
            .position(|p| raw <= p.raw)
            .unwrap_or(last)
            .min(last);
        let (a, b) = (self.points[k], self.points[k + 1]);
        if raw == a.raw {
            return a.energy;
        }
        if raw == b.raw {
            return b.energy;
        }
        a.energy + (raw - a.raw) * (b.energy - a.energy) / (b.raw - a.raw)
    }
}

fn least_squares_line(points: &[CalibrationPoint]) -> Result<(f64, f64)> {
    let design = DMatrix::from_fn(points.len(), 2, |r, c| if c == 0 { 1.0 } else { points[r].raw });
    let target = DVector::from_iterator(points.len(), points.iter().map(|p| p.energy));
    let solution = design
        .svd(true, true)
        .solve(&target, 1e-12)
        .map_err(|e| PulseError::InvalidCalibration(format!("least-squares fit failed: {}", e)))?;
    let (intercept, slope) = (solution[0], solution[1]);
    if !(slope > 0.0) {
        return Err(PulseError::InvalidCalibration(format!(
            "fitted slope {} is not increasing",
            slope
        )));
    }
    Ok((intercept, slope))
}

#[derive(Clone, Debug, Default)]
struct ChannelCalibration {
    pending: Vec<CalibrationPoint>,
    active: Option<Calibration>,
    enabled: bool,
}

/// Calibrations for every channel of a run, keyed by channel number.
#[derive(Clone, Debug)]
pub struct Calibrator {
    channels: Vec<ChannelCalibration>,
}

impl Calibrator {
    pub fn new(num_channels: usize) -> Self {
        Calibrator {
            channels: vec![ChannelCalibration::default(); num_channels],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, channel: usize) -> Result<&ChannelCalibration> {
        check_channel(channel, self.channels.len())?;
        Ok(&self.channels[channel])
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut ChannelCalibration> {
        check_channel(channel, self.channels.len())?;
        Ok(&mut self.channels[channel])
    }

    /// Queues a point for the next `build` on this channel.
    pub fn add_point(&mut self, channel: usize, raw: f64, energy: f64) -> Result<()> {
        self.channel_mut(channel)?
            .pending
            .push(CalibrationPoint::new(raw, energy));
        Ok(())
    }

    pub fn pending_points(&self, channel: usize) -> Result<&[CalibrationPoint]> {
        Ok(&self.channel(channel)?.pending)
    }

    /// Builds and activates a calibration from the queued points.
    ///
    /// On failure the channel keeps whatever calibration it had before.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use pulsecore::calibration::{Calibrator, CalibrationModel};
    /// let mut calibrator = Calibrator::new(2);
    /// calibrator.add_point(1, 10.0, 100.0).unwrap();
    /// calibrator.add_point(1, 20.0, 200.0).unwrap();
    /// calibrator.build(1, CalibrationModel::PiecewiseLinear).unwrap();
    /// assert_eq!(calibrator.apply(1, 15.0).unwrap(), 150.0);
    /// assert_eq!(calibrator.apply(0, 15.0).unwrap(), 15.0);
    /// ```
    pub fn build(&mut self, channel: usize, model: CalibrationModel) -> Result<&Calibration> {
        let slot = self.channel_mut(channel)?;
        let calibration = Calibration::build(&slot.pending, model)?;
        debug!(
            "channel {}: {:?} calibration from {} points",
            channel,
            model,
            calibration.points().len()
        );
        slot.enabled = true;
        Ok(slot.active.insert(calibration))
    }

    /// Energy for a raw value; identity when the channel is uncalibrated or disabled.
    pub fn apply(&self, channel: usize, raw: f64) -> Result<f64> {
        let slot = self.channel(channel)?;
        Ok(match (&slot.active, slot.enabled) {
            (Some(calibration), true) => calibration.apply(raw),
            _ => raw,
        })
    }

    pub fn set_enabled(&mut self, channel: usize, enabled: bool) -> Result<()> {
        self.channel_mut(channel)?.enabled = enabled;
        Ok(())
    }

    pub fn is_active(&self, channel: usize) -> Result<bool> {
        let slot = self.channel(channel)?;
        Ok(slot.enabled && slot.active.is_some())
    }

    pub fn calibration(&self, channel: usize) -> Result<Option<&Calibration>> {
        Ok(self.channel(channel)?.active.as_ref())
    }

    /// Drops queued points and the active calibration of a channel.
    pub fn clear(&mut self, channel: usize) -> Result<()> {
        *self.channel_mut(channel)? = ChannelCalibration::default();
        Ok(())
    }
}
