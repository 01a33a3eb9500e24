//! Seeded pulse generator standing in for a digitizer file.
//!
//! Every `(event, channel)` pair draws from its own generator seeded from the
//! run seed, so any partition of the events regenerates identical data.

use pulsecore::{Polarity, Waveform};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::error::{ProcessingError, Result};
use crate::source::{check_address, MeasurementParameters, RunMetadata, WaveformSource};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSettings {
    /// Pedestal in ADC counts.
    pub baseline: f64,
    /// Standard deviation of the Gaussian noise, 0 disables it.
    pub noise_sigma: f64,
    pub polarity: Polarity,
    /// Sample where the first pulse starts.
    pub trigger_position: usize,
    pub amplitude_range: (f64, f64),
    pub rise_time: f64,
    pub fast_decay: f64,
    pub slow_decay: f64,
    /// Probability of a pulse with a strong slow component.
    pub slow_probability: f64,
    /// Fast-component weight for ordinary and slow pulses.
    pub fast_weights: (f64, f64),
    /// Probability of a second pulse in the same record.
    pub pileup_probability: f64,
    /// Delay range of the second pulse after the first, in samples.
    pub pileup_delay: (usize, usize),
    /// Events per second; sets the reported acquisition time.
    pub trigger_rate: f64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        SyntheticSettings {
            baseline: 2000.0,
            noise_sigma: 2.0,
            polarity: Polarity::Negative,
            trigger_position: 60,
            amplitude_range: (50.0, 1500.0),
            rise_time: 2.0,
            fast_decay: 6.0,
            slow_decay: 60.0,
            slow_probability: 0.3,
            fast_weights: (0.95, 0.7),
            pileup_probability: 0.0,
            pileup_delay: (20, 200),
            trigger_rate: 1000.0,
        }
    }
}

impl SyntheticSettings {
    fn validate(&self, metadata: &RunMetadata) -> Result<()> {
        let (lo, hi) = self.amplitude_range;
        if !(lo > 0.0 && lo < hi) {
            return Err(ProcessingError::Config(format!("invalid amplitude range ({}, {})", lo, hi)));
        }
        if self.trigger_position >= metadata.record_length {
            return Err(ProcessingError::Config(format!(
                "trigger position {} outside record length {}",
                self.trigger_position, metadata.record_length
            )));
        }
        if !(self.rise_time > 0.0 && self.fast_decay > 0.0 && self.slow_decay > 0.0) {
            return Err(ProcessingError::Config("pulse time constants must be positive".to_string()));
        }
        for (name, p) in [("slow_probability", self.slow_probability), ("pileup_probability", self.pileup_probability)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ProcessingError::Config(format!("{} must lie in [0, 1], got {}", name, p)));
            }
        }
        if !(self.trigger_rate.is_finite() && self.trigger_rate > 0.0) {
            return Err(ProcessingError::Config(format!("trigger rate must be positive, got {}", self.trigger_rate)));
        }
        if self.pileup_delay.0 > self.pileup_delay.1 {
            return Err(ProcessingError::Config("pileup delay range is reversed".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticSource {
    metadata: RunMetadata,
    num_events: usize,
    seed: u64,
    settings: SyntheticSettings,
    noise: Option<Normal>,
}

impl SyntheticSource {
    pub fn new(metadata: RunMetadata, num_events: usize, seed: u64, settings: SyntheticSettings) -> Result<Self> {
        settings.validate(&metadata)?;
        let noise = if settings.noise_sigma > 0.0 {
            Some(
                Normal::new(0.0, settings.noise_sigma)
                    .map_err(|e| ProcessingError::Config(format!("noise distribution: {}", e)))?,
            )
        } else {
            None
        };
        Ok(SyntheticSource {
            metadata,
            num_events,
            seed,
            settings,
            noise,
        })
    }

    pub fn settings(&self) -> &SyntheticSettings {
        &self.settings
    }

    fn rng(&self, event: usize, channel: usize) -> StdRng {
        let address = (event as u64) * self.metadata.num_channels as u64 + channel as u64;
        StdRng::seed_from_u64(self.seed ^ address.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn add_pulse(&self, trace: &mut [f64], start: usize, amplitude: f64, fast_weight: f64) {
        let s = &self.settings;
        for (k, v) in trace.iter_mut().skip(start).enumerate() {
            let t = k as f64;
            let decay = fast_weight * (-t / s.fast_decay).exp() + (1.0 - fast_weight) * (-t / s.slow_decay).exp();
            *v += amplitude * (1.0 - (-t / s.rise_time).exp()) * decay;
        }
    }

    fn draw_pulse(&self, rng: &mut StdRng, trace: &mut [f64], start: usize) {
        let s = &self.settings;
        let amplitude = Uniform::new(s.amplitude_range.0, s.amplitude_range.1).sample(rng);
        let fast_weight = if rng.gen_bool(s.slow_probability) {
            s.fast_weights.1
        } else {
            s.fast_weights.0
        };
        self.add_pulse(trace, start, amplitude, fast_weight);
    }
}

impl WaveformSource for SyntheticSource {
    fn metadata(&self) -> RunMetadata {
        self.metadata
    }

    fn num_events(&self) -> usize {
        self.num_events
    }

    fn waveform(&self, event: usize, channel: usize) -> Result<Waveform> {
        check_address(&self.metadata, self.num_events, event, channel)?;
        let s = &self.settings;
        let mut rng = self.rng(event, channel);

        let mut trace = vec![0.0; self.metadata.record_length];
        self.draw_pulse(&mut rng, &mut trace, s.trigger_position);
        if rng.gen_bool(s.pileup_probability) {
            let delay = rng.gen_range(s.pileup_delay.0..=s.pileup_delay.1);
            let start = s.trigger_position + delay;
            if start < trace.len() {
                self.draw_pulse(&mut rng, &mut trace, start);
            }
        }

        let max_sample = self.metadata.max_sample() as f64;
        let samples = trace
            .iter()
            .map(|&v| {
                let noise = self.noise.map_or(0.0, |n| n.sample(&mut rng));
                let value = s.baseline + s.polarity.sign() * v + noise;
                value.round().clamp(0.0, max_sample) as i32
            })
            .collect();
        Ok(Waveform::new(samples))
    }

    fn measurement_parameters(&self) -> MeasurementParameters {
        MeasurementParameters {
            total_trigger_count: (self.num_events * self.metadata.num_channels) as u64,
            acquisition_time: Some(self.num_events as f64 / self.settings.trigger_rate),
        }
    }
}
