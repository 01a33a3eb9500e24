//! Run configuration, read from JSON.
//!
//! Thresholds, windows, pileup clearance and the PSD tail offset have no
//! defaults and must be given explicitly; optional sections are off when absent.

use std::path::{Path, PathBuf};

use pulsecore::calibration::{Calibration, CalibrationModel, CalibrationPoint};
use pulsecore::psd::discriminator::{FilterPolarity, PsdSettings};
use pulsecore::spectrum::background::BackgroundSettings;
use pulsecore::waveform::baseline::{BaselineMethod, BaselineWindow};
use pulsecore::waveform::limits::LimitSettings;
use pulsecore::waveform::peak::PeakFinderSettings;
use pulsecore::waveform::pileup::PileupSettings;
use pulsecore::{Axis, Polarity, PsdFilterPolygon, PulseError};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, Result};
use crate::parallel::partition::PartitionScheme;
use crate::source::RunMetadata;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditioningConfig {
    pub polarity: Polarity,
    pub baseline_window: BaselineWindow,
    #[serde(default)]
    pub baseline_method: BaselineMethod,
    /// Conditioned values below this are set to zero.
    #[serde(default)]
    pub zero_suppression: Option<f64>,
}

/// Per-peak value that goes into the spectrum.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumQuantity {
    #[default]
    Integral,
    Height,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumConfig {
    #[serde(default)]
    pub quantity: SpectrumQuantity,
    pub binning: Axis,
    #[serde(default)]
    pub background: BackgroundSettings,
}

fn unit_scale() -> f64 {
    1.0
}

/// Beam-current monitor integration used to normalise spectra.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChargeConfig {
    pub channel: usize,
    #[serde(default)]
    pub polarity: Polarity,
    pub baseline_window: BaselineWindow,
    #[serde(default)]
    pub baseline_method: BaselineMethod,
    /// Integration window `[start, stop)` in samples.
    pub start: usize,
    pub stop: usize,
    #[serde(default = "unit_scale")]
    pub units_per_integral: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub channel: usize,
    #[serde(default)]
    pub model: CalibrationModel,
    pub points: Vec<CalibrationPoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PsdFilterConfig {
    pub channel: usize,
    pub polygon: PsdFilterPolygon,
    #[serde(default)]
    pub polarity: FilterPolarity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub workers: usize,
    pub scheme: PartitionScheme,
    /// Events between two progress messages of a worker.
    pub progress_interval: usize,
    /// Directory for transient per-rank partial results; kept in memory when absent.
    pub spill_dir: Option<PathBuf>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            workers: 4,
            scheme: PartitionScheme::Contiguous,
            progress_interval: 1000,
            spill_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Detector channel whose pulses are analysed.
    pub channel: usize,
    pub conditioning: ConditioningConfig,
    pub peak_finding: PeakFinderSettings,
    pub limits: LimitSettings,
    pub pileup: PileupSettings,
    pub spectrum: SpectrumConfig,
    #[serde(default)]
    pub psd: Option<PsdSettings>,
    #[serde(default)]
    pub charge: Option<ChargeConfig>,
    #[serde(default)]
    pub calibrations: Vec<CalibrationConfig>,
    #[serde(default)]
    pub psd_filters: Vec<PsdFilterConfig>,
    #[serde(default)]
    pub parallel: ParallelConfig,
    /// Only events in `[start, end)` are processed.
    #[serde(default)]
    pub waveform_range: Option<(usize, usize)>,
    /// Keep every integrated peak, with its flags, in the run result.
    #[serde(default)]
    pub retain_peaks: bool,
}

fn channel_in_range(channel: usize, metadata: &RunMetadata) -> Result<()> {
    if channel >= metadata.num_channels {
        return Err(PulseError::ChannelOutOfRange {
            channel,
            channels: metadata.num_channels,
        }
        .into());
    }
    Ok(())
}

impl ProcessingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ProcessingError::io(path, e))?;
        Self::from_json_str(&json)
    }

    /// Reports every configuration problem that can be detected before the run.
    pub fn validate(&self, metadata: &RunMetadata) -> Result<()> {
        channel_in_range(self.channel, metadata)?;
        self.conditioning.baseline_window.validate(metadata.record_length)?;
        if let Some(ceiling) = self.conditioning.zero_suppression {
            if !ceiling.is_finite() || ceiling < 0.0 {
                return Err(ProcessingError::Config(format!(
                    "zero suppression ceiling must be a non-negative number, got {}",
                    ceiling
                )));
            }
        }
        self.peak_finding.validate()?;
        self.limits.validate()?;
        self.spectrum.background.validate()?;

        if let Some(psd) = &self.psd {
            psd.validate()?;
            if psd.tail_offset >= metadata.record_length {
                return Err(ProcessingError::Config(format!(
                    "PSD tail offset {} must be shorter than the record length {}",
                    psd.tail_offset, metadata.record_length
                )));
            }
            if psd.tail_length.is_some_and(|length| length > metadata.record_length) {
                return Err(ProcessingError::Config(format!(
                    "PSD tail length {:?} exceeds the record length {}",
                    psd.tail_length, metadata.record_length
                )));
            }
        }

        if let Some(charge) = &self.charge {
            channel_in_range(charge.channel, metadata)?;
            charge.baseline_window.validate(metadata.record_length)?;
            if charge.start >= charge.stop || charge.stop > metadata.record_length {
                return Err(ProcessingError::Config(format!(
                    "charge window [{}, {}) is unusable for record length {}",
                    charge.start, charge.stop, metadata.record_length
                )));
            }
            if !charge.units_per_integral.is_finite() {
                return Err(ProcessingError::Config("units_per_integral must be finite".to_string()));
            }
        }

        for calibration in &self.calibrations {
            channel_in_range(calibration.channel, metadata)?;
            Calibration::build(&calibration.points, calibration.model)?;
        }

        if !self.psd_filters.is_empty() && self.psd.is_none() {
            return Err(ProcessingError::Config(
                "PSD filters are configured but the psd section is missing".to_string(),
            ));
        }
        for filter in &self.psd_filters {
            channel_in_range(filter.channel, metadata)?;
        }

        if self.parallel.workers == 0 {
            return Err(ProcessingError::Config("at least one worker is required".to_string()));
        }
        if self.parallel.progress_interval == 0 {
            return Err(ProcessingError::Config("progress_interval must be positive".to_string()));
        }
        if let Some((start, end)) = self.waveform_range {
            if start > end {
                return Err(ProcessingError::Config(format!(
                    "waveform range [{}, {}) is reversed",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const MINIMAL: &str = r#"{
        "channel": 0,
        "conditioning": {
            "polarity": "negative",
            "baseline_window": { "start": 0, "stop": 40 }
        },
        "peak_finding": { "threshold": 30.0, "min_separation": 8 },
        "limits": { "floor_fraction": 0.2, "max_search_width": 300 },
        "pileup": { "clearance": 2, "policy": "reject" },
        "spectrum": { "binning": { "bins": 256, "lower": 0.0, "upper": 40000.0 } }
    }"#;

    pub(crate) fn metadata() -> RunMetadata {
        RunMetadata {
            record_length: 400,
            num_channels: 2,
            max_bit: 14,
        }
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
        config.validate(&metadata()).unwrap();
        assert_eq!(config.conditioning.baseline_method, BaselineMethod::Mean);
        assert_eq!(config.spectrum.quantity, SpectrumQuantity::Integral);
        assert_eq!(config.parallel, ParallelConfig::default());
        assert!(config.psd.is_none() && config.charge.is_none());
        assert!(!config.retain_peaks);
    }

    #[test]
    fn test_full_config_from_file() {
        let json = r#"{
            "channel": 1,
            "conditioning": {
                "polarity": "positive",
                "baseline_window": { "start": 0, "stop": 30 },
                "baseline_method": "median",
                "zero_suppression": 4.0
            },
            "peak_finding": { "threshold": 25.0, "min_separation": 5, "max_peaks": 3 },
            "limits": { "floor_fraction": 0.1, "max_search_width": 200 },
            "pileup": { "clearance": 4, "policy": "flag" },
            "spectrum": {
                "quantity": "height",
                "binning": { "bins": 100, "lower": 0.0, "upper": 2000.0 },
                "background": { "iterations": 8, "direction": "decreasing" }
            },
            "psd": {
                "tail_offset": 10,
                "y_quantity": "tail_total_ratio",
                "total_binning": { "bins": 50, "lower": 0.0, "upper": 50000.0 },
                "y_binning": { "bins": 50, "lower": 0.0, "upper": 1.0 }
            },
            "charge": {
                "channel": 0,
                "baseline_window": { "start": 0, "stop": 20 },
                "start": 50,
                "stop": 300,
                "units_per_integral": 0.001
            },
            "calibrations": [
                { "channel": 1, "points": [ { "raw": 10.0, "energy": 100.0 }, { "raw": 20.0, "energy": 200.0 } ] }
            ],
            "psd_filters": [
                { "channel": 1, "polygon": [[0, 0], [50000, 0], [50000, 0.2], [0, 0.2]], "polarity": "keep_outside" }
            ],
            "parallel": { "workers": 3, "scheme": "round_robin", "spill_dir": "/tmp/partials" },
            "waveform_range": [10, 90],
            "retain_peaks": true
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = ProcessingConfig::from_json_file(file.path()).unwrap();
        config.validate(&metadata()).unwrap();
        assert_eq!(config.parallel.scheme, PartitionScheme::RoundRobin);
        assert_eq!(config.parallel.progress_interval, 1000);
        assert_eq!(config.psd_filters[0].polarity, FilterPolarity::KeepOutside);
        assert_eq!(config.waveform_range, Some((10, 90)));
        assert_eq!(config.charge.as_ref().unwrap().polarity, Polarity::Negative);
    }

    #[test]
    fn test_required_fields() {
        let without_clearance = MINIMAL.replace(r#""clearance": 2, "#, "");
        assert!(matches!(
            ProcessingConfig::from_json_str(&without_clearance),
            Err(ProcessingError::Json(_))
        ));
        let psd_without_offset = MINIMAL.replace(
            r#""channel": 0,"#,
            r#""channel": 0, "psd": { "total_binning": { "bins": 5, "lower": 0.0, "upper": 1.0 }, "y_binning": { "bins": 5, "lower": 0.0, "upper": 1.0 } },"#,
        );
        assert!(ProcessingConfig::from_json_str(&psd_without_offset).is_err());
        let empty_binning = MINIMAL.replace(r#""bins": 256"#, r#""bins": 0"#);
        assert!(matches!(
            ProcessingConfig::from_json_str(&empty_binning),
            Err(ProcessingError::Json(_))
        ));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
        config.channel = 2;
        assert!(matches!(
            config.validate(&metadata()),
            Err(ProcessingError::Pulse(PulseError::ChannelOutOfRange { .. }))
        ));

        let mut config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
        config.conditioning.baseline_window = BaselineWindow::new(390, 420);
        assert!(config.validate(&metadata()).is_err());

        let mut config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
        config.calibrations.push(CalibrationConfig {
            channel: 0,
            model: CalibrationModel::PiecewiseLinear,
            points: vec![CalibrationPoint::new(1.0, 1.0)],
        });
        assert!(matches!(
            config.validate(&metadata()),
            Err(ProcessingError::Pulse(PulseError::InvalidCalibration(_)))
        ));

        let mut config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
        config.psd_filters.push(PsdFilterConfig {
            channel: 0,
            polygon: PsdFilterPolygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]).unwrap(),
            polarity: FilterPolarity::KeepInside,
        });
        assert!(matches!(config.validate(&metadata()), Err(ProcessingError::Config(_))));

        let mut config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
        config.parallel.workers = 0;
        assert!(config.validate(&metadata()).is_err());
    }

    #[test]
    fn test_psd_tail_window_bounded_by_record() {
        let with_psd = |tail_offset: usize, tail_length: Option<usize>| {
            let mut config = ProcessingConfig::from_json_str(MINIMAL).unwrap();
            config.psd = Some(PsdSettings {
                tail_offset,
                tail_length,
                y_quantity: Default::default(),
                minimum_total: 0.0,
                total_binning: Axis::new(10, 0.0, 100.0).unwrap(),
                y_binning: Axis::new(10, 0.0, 100.0).unwrap(),
            });
            config
        };
        assert!(with_psd(8, Some(400)).validate(&metadata()).is_ok());
        assert!(matches!(
            with_psd(400, None).validate(&metadata()),
            Err(ProcessingError::Config(_))
        ));
        assert!(matches!(
            with_psd(8, Some(usize::MAX)).validate(&metadata()),
            Err(ProcessingError::Config(_))
        ));
    }
}
