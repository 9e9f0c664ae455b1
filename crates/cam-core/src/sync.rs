//! Synchronization channel capability.
//!
//! A [`LineSampler`] samples digital/analog lines at a fixed rate so camera
//! frames can be aligned to external events (stimulus triggers, encoder
//! pulses). It follows the same save/trigger protocol as a camera: the
//! orchestrator broadcasts the same start trigger, and the sync worker
//! writes one CSV row per sample while saving is enabled.
//!
//! NI-DAQmx hardware stays an external collaborator behind this trait; the
//! workspace ships a simulated sampler.

use std::time::Duration;

use crate::error::CamResult;

/// Channel layout and rate reported by [`LineSampler::open`].
#[derive(Debug, Clone)]
pub struct LineInfo {
    /// Sampler identity used in logs and file names.
    pub name: String,
    /// Nominal sample rate in Hz.
    pub sample_rate_hz: f64,
    /// Channel labels, one per value in each sample.
    pub channels: Vec<String>,
}

/// One multi-channel sample.
#[derive(Debug, Clone)]
pub struct LineSample {
    /// Monotonic sample counter.
    pub sample_number: u64,
    /// Timestamp in seconds.
    pub timestamp: f64,
    /// One value per declared channel.
    pub values: Vec<f64>,
}

/// Capability trait over a fixed-rate line sampler.
///
/// The contract mirrors [`FrameSource`](crate::source::FrameSource):
/// `sample` blocks until the next sample or the timeout (`Ok(None)`), and
/// faults are reported as [`CamError::Fault`](crate::error::CamError).
pub trait LineSampler: Send {
    fn open(&mut self) -> CamResult<LineInfo>;

    fn start(&mut self) -> CamResult<()>;

    fn sample(&mut self, timeout: Duration) -> CamResult<Option<LineSample>>;

    fn stop(&mut self) -> CamResult<()>;

    fn close(&mut self) -> CamResult<()>;
}
