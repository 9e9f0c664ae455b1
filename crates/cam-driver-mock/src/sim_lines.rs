//! Simulated synchronization-line sampler.

use std::time::Duration;

use cam_core::sync::{LineInfo, LineSample, LineSampler};
use cam_core::{CamError, CamResult};

use crate::sim::SimMode;

/// Deterministic line sampler: digital channels toggle as square waves at
/// channel-dependent periods, analog channels ramp. Values depend only on
/// the sample counter, so recordings are exactly reproducible.
pub struct SimLineSampler {
    name: String,
    sample_rate_hz: f64,
    channels: Vec<String>,
    mode: SimMode,
    limit: Option<u64>,
    produced: u64,
    open: bool,
    running: bool,
}

impl SimLineSampler {
    pub fn builder(name: impl Into<String>) -> SimLineSamplerBuilder {
        SimLineSamplerBuilder {
            name: name.into(),
            sample_rate_hz: 1000.0,
            channels: vec!["di0".to_string()],
            mode: SimMode::Instant,
            limit: None,
        }
    }

    fn value_for(&self, channel_index: usize) -> f64 {
        let period = 2u64 << channel_index;
        if self.channels[channel_index].starts_with("di") {
            // Square wave: period doubles per channel.
            ((self.produced / period) % 2) as f64
        } else {
            // Sawtooth ramp in [0, 1).
            (self.produced % period) as f64 / period as f64
        }
    }
}

impl LineSampler for SimLineSampler {
    fn open(&mut self) -> CamResult<LineInfo> {
        self.open = true;
        Ok(LineInfo {
            name: self.name.clone(),
            sample_rate_hz: self.sample_rate_hz,
            channels: self.channels.clone(),
        })
    }

    fn start(&mut self) -> CamResult<()> {
        if !self.open {
            return Err(CamError::device(&self.name, "start called before open"));
        }
        self.running = true;
        Ok(())
    }

    fn sample(&mut self, timeout: Duration) -> CamResult<Option<LineSample>> {
        if !self.running {
            return Ok(None);
        }
        if self.limit.is_some_and(|n| self.produced >= n) {
            // Exhausted source behaves like a stalled device.
            std::thread::sleep(timeout);
            return Ok(None);
        }
        if self.mode == SimMode::Realistic {
            let interval = Duration::from_secs_f64(1.0 / self.sample_rate_hz);
            std::thread::sleep(interval.min(timeout));
        }
        self.produced += 1;
        let values = (0..self.channels.len()).map(|i| self.value_for(i)).collect();
        Ok(Some(LineSample {
            sample_number: self.produced,
            timestamp: self.produced as f64 / self.sample_rate_hz,
            values,
        }))
    }

    fn stop(&mut self) -> CamResult<()> {
        self.running = false;
        Ok(())
    }

    fn close(&mut self) -> CamResult<()> {
        self.running = false;
        self.open = false;
        Ok(())
    }
}

pub struct SimLineSamplerBuilder {
    name: String,
    sample_rate_hz: f64,
    channels: Vec<String>,
    mode: SimMode,
    limit: Option<u64>,
}

impl SimLineSamplerBuilder {
    pub fn sample_rate_hz(mut self, rate: f64) -> Self {
        self.sample_rate_hz = rate;
        self
    }

    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn mode(mut self, mode: SimMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn sample_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(self) -> SimLineSampler {
        SimLineSampler {
            name: self.name,
            sample_rate_hz: self.sample_rate_hz,
            channels: self.channels,
            mode: self.mode,
            limit: self.limit,
            produced: 0,
            open: false,
            running: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_deterministic_and_counted() {
        let mut sampler = SimLineSampler::builder("sync")
            .sample_rate_hz(100.0)
            .channels(vec!["di0".into(), "ai0".into()])
            .sample_limit(4)
            .build();
        let info = sampler.open().unwrap();
        assert_eq!(info.channels.len(), 2);
        sampler.start().unwrap();

        let mut numbers = Vec::new();
        while let Some(sample) = sampler.sample(Duration::from_millis(1)).unwrap() {
            assert_eq!(sample.values.len(), 2);
            assert!((sample.timestamp - sample.sample_number as f64 / 100.0).abs() < 1e-12);
            numbers.push(sample.sample_number);
        }
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn digital_channel_is_a_square_wave() {
        let mut sampler = SimLineSampler::builder("sync")
            .channels(vec!["di0".into()])
            .sample_limit(8)
            .build();
        sampler.open().unwrap();
        sampler.start().unwrap();
        let mut values = Vec::new();
        while let Some(sample) = sampler.sample(Duration::from_millis(1)).unwrap() {
            values.push(sample.values[0]);
        }
        // Period 2: toggles every other sample.
        assert_eq!(values, vec![0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn start_before_open_is_rejected() {
        let mut sampler = SimLineSampler::builder("sync").build();
        assert!(sampler.start().is_err());
    }
}
