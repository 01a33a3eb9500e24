//! Error types for the waveform processing core.
//!
//! Everything here is a configuration-class error: the caller supplied a
//! parameter, point set or polygon that cannot be used. Per-event anomalies
//! (no peaks, pileup, unresolved limits) are never errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PulseError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("baseline window [{start}, {stop}) is unusable for record length {record_length}")]
    BaselineWindow {
        start: usize,
        stop: usize,
        record_length: usize,
    },

    #[error("channel {channel} out of range, {channels} channels configured")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("invalid PSD filter polygon: {0}")]
    InvalidPolygon(String),

    #[error("histogram binning mismatch: {0}")]
    BinningMismatch(String),

    #[error("invalid histogram definition: {0}")]
    InvalidHistogram(String),

    #[error("spectrum is finalized and no longer accepts entries")]
    SpectrumFinalized,

    #[error("fit failed: {0}")]
    FitFailed(String),
}

pub type Result<T> = std::result::Result<T, PulseError>;

impl PulseError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        PulseError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Bounds check for channel-keyed state.
pub(crate) fn check_channel(channel: usize, channels: usize) -> Result<()> {
    if channel < channels {
        Ok(())
    } else {
        Err(PulseError::ChannelOutOfRange { channel, channels })
    }
}
