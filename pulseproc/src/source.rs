use pulsecore::{PulseError, Waveform};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, Result};

/// Acquisition properties that stay fixed for a whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Samples per waveform.
    pub record_length: usize,
    pub num_channels: usize,
    /// ADC resolution in bits.
    pub max_bit: u32,
}

impl RunMetadata {
    pub fn max_sample(&self) -> i32 {
        ((1i64 << self.max_bit.min(31)) - 1) as i32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementParameters {
    /// Hardware trigger count over the measurement, used for normalisation.
    pub total_trigger_count: u64,
    /// Wall-clock length of the acquisition in seconds, when the source knows it.
    #[serde(default)]
    pub acquisition_time: Option<f64>,
}

/// Random access to the waveforms of a run, shared read-only by all workers.
pub trait WaveformSource: Sync {
    fn metadata(&self) -> RunMetadata;

    fn num_events(&self) -> usize;

    /// Waveform of one channel in one event.
    fn waveform(&self, event: usize, channel: usize) -> Result<Waveform>;

    fn measurement_parameters(&self) -> MeasurementParameters {
        MeasurementParameters::default()
    }
}

/// Bounds check shared by source implementations.
pub(crate) fn check_address(metadata: &RunMetadata, events: usize, event: usize, channel: usize) -> Result<()> {
    if event >= events {
        return Err(ProcessingError::EventOutOfRange { event, events });
    }
    if channel >= metadata.num_channels {
        return Err(PulseError::ChannelOutOfRange {
            channel,
            channels: metadata.num_channels,
        }
        .into());
    }
    Ok(())
}

/// Waveforms held in memory, one `Vec` of channels per event.
#[derive(Clone, Debug)]
pub struct InMemorySource {
    metadata: RunMetadata,
    parameters: MeasurementParameters,
    events: Vec<Vec<Waveform>>,
}

impl InMemorySource {
    pub fn new(metadata: RunMetadata) -> Self {
        InMemorySource {
            metadata,
            parameters: MeasurementParameters::default(),
            events: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: MeasurementParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Appends an event; it must carry one waveform per channel.
    pub fn push_event(&mut self, channels: Vec<Waveform>) -> Result<()> {
        if channels.len() != self.metadata.num_channels {
            return Err(ProcessingError::Config(format!(
                "event has {} channels, run has {}",
                channels.len(),
                self.metadata.num_channels
            )));
        }
        self.events.push(channels);
        Ok(())
    }
}

impl WaveformSource for InMemorySource {
    fn metadata(&self) -> RunMetadata {
        self.metadata
    }

    fn num_events(&self) -> usize {
        self.events.len()
    }

    fn waveform(&self, event: usize, channel: usize) -> Result<Waveform> {
        check_address(&self.metadata, self.events.len(), event, channel)?;
        Ok(self.events[event][channel].clone())
    }

    fn measurement_parameters(&self) -> MeasurementParameters {
        self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RunMetadata {
        RunMetadata {
            record_length: 4,
            num_channels: 2,
            max_bit: 14,
        }
    }

    #[test]
    fn test_in_memory_addressing() {
        let mut source = InMemorySource::new(metadata());
        source
            .push_event(vec![Waveform::new(vec![1, 2, 3, 4]), Waveform::new(vec![5, 6, 7, 8])])
            .unwrap();
        assert_eq!(source.num_events(), 1);
        assert_eq!(source.waveform(0, 1).unwrap().samples(), &[5, 6, 7, 8]);
        assert!(matches!(
            source.waveform(1, 0),
            Err(ProcessingError::EventOutOfRange { event: 1, events: 1 })
        ));
        assert!(matches!(
            source.waveform(0, 2),
            Err(ProcessingError::Pulse(PulseError::ChannelOutOfRange { .. }))
        ));
        assert!(source.push_event(vec![Waveform::new(vec![0; 4])]).is_err());
    }

    #[test]
    fn test_max_sample() {
        assert_eq!(metadata().max_sample(), 16383);
    }
}
