//! Simulated camera implementing the `FrameSource` contract.

use std::sync::mpsc;
use std::time::Duration;

use serde::Deserialize;

use cam_core::control::{ControlSpec, ControlValue};
use cam_core::source::{FrameSource, SourceFactory, SourceInfo, SourceState};
use cam_core::{CamError, CamResult, Frame};

use crate::pattern::{test_pattern_u16, test_pattern_u8};
use crate::sim::{FaultPlan, IdPlan, SimMode, SimRng};

/// One scripted delivery for an externally fed camera.
#[derive(Debug)]
pub enum SimEvent {
    /// Deliver a frame with this hardware counter value.
    Frame(u64),
    /// Report a capture fault instead of a frame.
    Fault(String),
}

/// Test-side handle feeding a scripted [`SimCamera`].
pub type SimFeed = mpsc::Sender<SimEvent>;

enum Feed {
    /// Self-running generator following an [`IdPlan`].
    Generated {
        produced: u64,
        counter: u64,
        limit: Option<u64>,
    },
    /// Externally scripted deliveries; `poll` times out when the script
    /// has nothing queued.
    Scripted(mpsc::Receiver<SimEvent>),
}

/// Simulated camera.
///
/// In `Generated` mode it produces a moving test pattern at a configurable
/// interval, advancing its hardware frame counter per the configured
/// [`IdPlan`] so duplicate and drop handling can be exercised. In scripted
/// mode ([`SimCamera::scripted`]) a test decides exactly which counter
/// values and faults `poll` delivers, and when.
pub struct SimCamera {
    name: String,
    width: u32,
    height: u32,
    bit_depth: u32,
    mode: SimMode,
    interval: Duration,
    plan: IdPlan,
    fault_plan: FaultPlan,
    rng: SimRng,
    timestamp_divisor: Option<f64>,
    /// Device-clock ticks per counter increment (raw timestamp units).
    ticks_per_frame: f64,
    exposure_s: f64,
    gain: f64,
    state: SourceState,
    feed: Feed,
}

impl SimCamera {
    pub fn builder(name: impl Into<String>) -> SimCameraBuilder {
        SimCameraBuilder::new(name)
    }

    /// Create a camera whose deliveries are scripted by the returned feed.
    ///
    /// The simulated device clock runs at 10 kHz (100 raw ticks per
    /// counter value, declared divisor 10000), so frame `n` carries the
    /// timestamp `n / 100.0` seconds after scaling — convenient for exact
    /// log assertions.
    pub fn scripted(name: impl Into<String>, width: u32, height: u32) -> (Self, SimFeed) {
        let (tx, rx) = mpsc::channel();
        let camera = Self {
            name: name.into(),
            width,
            height,
            bit_depth: 16,
            mode: SimMode::Instant,
            interval: Duration::ZERO,
            plan: IdPlan::Sequential,
            fault_plan: FaultPlan::none(),
            rng: SimRng::new(Some(0)),
            timestamp_divisor: Some(10_000.0),
            ticks_per_frame: 100.0,
            exposure_s: 0.033,
            gain: 0.0,
            state: SourceState::Closed,
            feed: Feed::Scripted(rx),
        };
        (camera, tx)
    }

    fn make_frame(&self, counter: u64) -> Frame {
        let raw_timestamp = counter as f64 * self.ticks_per_frame;
        match self.bit_depth {
            8 => Frame::from_u8(
                self.width,
                self.height,
                counter,
                raw_timestamp,
                test_pattern_u8(self.width, self.height, counter),
            ),
            _ => Frame::from_u16(
                self.width,
                self.height,
                counter,
                raw_timestamp,
                &test_pattern_u16(self.width, self.height, counter),
            ),
        }
    }
}

impl FrameSource for SimCamera {
    fn open(&mut self) -> CamResult<SourceInfo> {
        self.fault_plan.check_open(&self.name)?;
        self.state = SourceState::Opened;
        tracing::debug!(camera = %self.name, "simulated device opened");
        Ok(SourceInfo {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            channels: 1,
            bit_depth: self.bit_depth,
            timestamp_divisor: self.timestamp_divisor,
        })
    }

    fn arm(&mut self) -> CamResult<()> {
        match self.state {
            SourceState::Opened | SourceState::Armed => {
                self.state = SourceState::Armed;
                Ok(())
            }
            other => Err(CamError::device(
                &self.name,
                format!("arm called in state '{other}'"),
            )),
        }
    }

    fn start(&mut self) -> CamResult<()> {
        match self.state {
            SourceState::Running => Ok(()),
            SourceState::Armed => {
                self.state = SourceState::Running;
                Ok(())
            }
            other => Err(CamError::device(
                &self.name,
                format!("start called in state '{other}'"),
            )),
        }
    }

    fn poll(&mut self, timeout: Duration) -> CamResult<Option<Frame>> {
        if self.state != SourceState::Running {
            return Ok(None);
        }
        let mode = self.mode;
        let interval = self.interval;
        // Resolve the next delivery while borrowing only the feed, then
        // materialize the frame afterwards.
        let counter = match &mut self.feed {
            Feed::Scripted(rx) => match rx.recv_timeout(timeout) {
                Ok(SimEvent::Frame(counter)) => counter,
                Ok(SimEvent::Fault(message)) => {
                    return Err(CamError::fault(&self.name, message));
                }
                Err(_) => return Ok(None),
            },
            Feed::Generated {
                produced,
                counter,
                limit,
            } => {
                if limit.is_some_and(|n| *produced >= n) {
                    // Exhausted source behaves like a stalled device: the
                    // poll blocks for its full timeout.
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                if mode == SimMode::Realistic && !interval.is_zero() {
                    std::thread::sleep(interval.min(timeout));
                }
                *produced += 1;
                let produced_now = *produced;
                self.plan.advance(counter, produced_now);
                self.fault_plan
                    .check_delivery(&self.name, produced_now, &self.rng)?;
                *counter
            }
        };
        Ok(Some(self.make_frame(counter)))
    }

    fn stop(&mut self) -> CamResult<()> {
        if self.state == SourceState::Closed {
            return Ok(());
        }
        // Nothing in flight to drain in the simulation.
        self.state = SourceState::Stopping;
        self.state = SourceState::Opened;
        Ok(())
    }

    fn close(&mut self) -> CamResult<()> {
        self.state = SourceState::Closed;
        Ok(())
    }

    fn state(&self) -> SourceState {
        self.state
    }

    fn control_specs(&self) -> Vec<ControlSpec> {
        vec![
            ControlSpec::float("exposure_s", 1e-5, 10.0),
            ControlSpec::float("gain", 0.0, 48.0),
        ]
    }

    fn set_control(&mut self, name: &str, value: &ControlValue) -> CamResult<()> {
        match (name, value) {
            ("exposure_s", ControlValue::Float(v)) => {
                self.exposure_s = *v;
                Ok(())
            }
            ("gain", ControlValue::Float(v)) => {
                self.gain = *v;
                Ok(())
            }
            _ => Err(CamError::Control {
                name: name.to_string(),
                message: "unknown control for simulated camera".to_string(),
            }),
        }
    }
}

/// Builder for self-running simulated cameras.
pub struct SimCameraBuilder {
    name: String,
    width: u32,
    height: u32,
    bit_depth: u32,
    mode: SimMode,
    interval: Duration,
    plan: IdPlan,
    limit: Option<u64>,
    fault_plan: FaultPlan,
    seed: Option<u64>,
    timestamp_divisor: Option<f64>,
    ticks_per_frame: f64,
}

impl SimCameraBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: 640,
            height: 480,
            bit_depth: 16,
            mode: SimMode::Instant,
            interval: Duration::from_millis(33),
            plan: IdPlan::Sequential,
            limit: None,
            fault_plan: FaultPlan::none(),
            seed: Some(0),
            timestamp_divisor: None,
            ticks_per_frame: 0.033,
        }
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn bit_depth(mut self, bit_depth: u32) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    pub fn mode(mut self, mode: SimMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.interval = Duration::from_millis(ms);
        self
    }

    pub fn id_plan(mut self, plan: IdPlan) -> Self {
        self.plan = plan;
        self
    }

    /// Stop delivering after this many frames; later polls time out.
    pub fn frame_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fault_plan(mut self, plan: FaultPlan) -> Self {
        self.fault_plan = plan;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn timestamp_divisor(mut self, divisor: f64) -> Self {
        self.timestamp_divisor = Some(divisor);
        self
    }

    pub fn ticks_per_frame(mut self, ticks: f64) -> Self {
        self.ticks_per_frame = ticks;
        self
    }

    pub fn build(self) -> SimCamera {
        SimCamera {
            name: self.name,
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            mode: self.mode,
            interval: self.interval,
            plan: self.plan,
            rng: SimRng::new(self.seed),
            fault_plan: self.fault_plan,
            timestamp_divisor: self.timestamp_divisor,
            ticks_per_frame: self.ticks_per_frame,
            exposure_s: 0.033,
            gain: 0.0,
            state: SourceState::Closed,
            feed: Feed::Generated {
                produced: 0,
                counter: 0,
                limit: self.limit,
            },
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Config table accepted by the `sim` driver.
#[derive(Debug, Clone, Deserialize)]
struct SimCameraConfig {
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default = "default_bit_depth")]
    bit_depth: u32,
    /// Run with hardware-like frame pacing instead of as fast as polled.
    #[serde(default)]
    realistic: bool,
    #[serde(default = "default_interval_ms")]
    frame_interval_ms: u64,
    frame_limit: Option<u64>,
    timestamp_divisor: Option<f64>,
    /// Repeat the hardware counter every nth frame.
    duplicate_every: Option<u64>,
    /// Skip counter values every nth frame.
    gap_every: Option<u64>,
    #[serde(default = "default_gap_width")]
    gap_width: u64,
    /// Fail `open()`, simulating unreachable hardware.
    #[serde(default)]
    fail_open: bool,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_bit_depth() -> u32 {
    16
}
fn default_interval_ms() -> u64 {
    33
}
fn default_gap_width() -> u64 {
    1
}

/// Factory for the `sim` driver type.
pub struct SimCameraFactory;

impl SourceFactory for SimCameraFactory {
    fn driver_type(&self) -> &'static str {
        "sim"
    }

    fn validate(&self, config: &toml::Value) -> CamResult<()> {
        let cfg: SimCameraConfig = config
            .clone()
            .try_into()
            .map_err(|e| CamError::Config(format!("sim driver: {e}")))?;
        if cfg.width == 0 || cfg.height == 0 {
            return Err(CamError::Config("sim driver: resolution must be non-zero".into()));
        }
        if !matches!(cfg.bit_depth, 8 | 16) {
            return Err(CamError::Config(format!(
                "sim driver: unsupported bit depth {}",
                cfg.bit_depth
            )));
        }
        Ok(())
    }

    fn build(&self, camera: &str, config: toml::Value) -> CamResult<Box<dyn FrameSource>> {
        self.validate(&config)?;
        let cfg: SimCameraConfig = config
            .try_into()
            .map_err(|e| CamError::Config(format!("sim driver: {e}")))?;

        let plan = if let Some(n) = cfg.duplicate_every {
            IdPlan::DuplicateEvery(n)
        } else if let Some(n) = cfg.gap_every {
            IdPlan::GapEvery {
                every: n,
                width: cfg.gap_width,
            }
        } else {
            IdPlan::Sequential
        };

        let mut builder = SimCamera::builder(camera)
            .resolution(cfg.width, cfg.height)
            .bit_depth(cfg.bit_depth)
            .interval_ms(cfg.frame_interval_ms)
            .id_plan(plan)
            .mode(if cfg.realistic {
                SimMode::Realistic
            } else {
                SimMode::Instant
            });
        if let Some(limit) = cfg.frame_limit {
            builder = builder.frame_limit(limit);
        }
        if let Some(divisor) = cfg.timestamp_divisor {
            builder = builder.timestamp_divisor(divisor);
        }
        if cfg.fail_open {
            builder = builder.fault_plan(FaultPlan {
                fail_open: true,
                ..FaultPlan::none()
            });
        }
        Ok(Box::new(builder.build()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_lifecycle(camera: &mut SimCamera) {
        camera.open().unwrap();
        camera.arm().unwrap();
        camera.start().unwrap();
    }

    #[test]
    fn lifecycle_follows_state_machine() {
        let mut camera = SimCamera::builder("c").frame_limit(1).build();
        assert_eq!(camera.state(), SourceState::Closed);
        camera.open().unwrap();
        assert_eq!(camera.state(), SourceState::Opened);
        camera.arm().unwrap();
        assert_eq!(camera.state(), SourceState::Armed);
        camera.start().unwrap();
        assert_eq!(camera.state(), SourceState::Running);
        camera.stop().unwrap();
        assert_eq!(camera.state(), SourceState::Opened);
        // Re-arm cycle without reopening.
        camera.arm().unwrap();
        camera.close().unwrap();
        camera.close().unwrap();
        assert_eq!(camera.state(), SourceState::Closed);
    }

    #[test]
    fn arm_without_open_is_a_device_error() {
        let mut camera = SimCamera::builder("c").build();
        assert!(matches!(camera.arm(), Err(CamError::Device { .. })));
    }

    #[test]
    fn poll_before_start_times_out() {
        let (mut camera, feed) = SimCamera::scripted("c", 8, 8);
        camera.open().unwrap();
        camera.arm().unwrap();
        feed.send(SimEvent::Frame(1)).unwrap();
        // Not started: the queued delivery must not surface yet.
        let polled = camera.poll(Duration::from_millis(1)).unwrap();
        assert!(polled.is_none());
        camera.start().unwrap();
        let frame = camera.poll(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(frame.frame_number, 1);
    }

    #[test]
    fn scripted_feed_delivers_exact_ids_and_timestamps() {
        let (mut camera, feed) = SimCamera::scripted("c", 8, 8);
        run_lifecycle(&mut camera);
        for id in [3u64, 4, 9] {
            feed.send(SimEvent::Frame(id)).unwrap();
        }
        let info = SourceInfo {
            name: "c".into(),
            width: 8,
            height: 8,
            channels: 1,
            bit_depth: 16,
            timestamp_divisor: Some(10_000.0),
        };
        for id in [3u64, 4, 9] {
            let frame = camera.poll(Duration::from_millis(100)).unwrap().unwrap();
            assert_eq!(frame.frame_number, id);
            let seconds = info.scale_timestamp(frame.timestamp);
            assert!((seconds - id as f64 / 100.0).abs() < 1e-9);
        }
        assert!(camera.poll(Duration::from_millis(1)).unwrap().is_none());
    }

    #[test]
    fn scripted_fault_is_reported_as_fault() {
        let (mut camera, feed) = SimCamera::scripted("c", 8, 8);
        run_lifecycle(&mut camera);
        feed.send(SimEvent::Fault("bus reset".into())).unwrap();
        let err = camera.poll(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, CamError::Fault { .. }));
    }

    #[test]
    fn generated_feed_honors_frame_limit() {
        let mut camera = SimCamera::builder("c")
            .resolution(8, 8)
            .frame_limit(3)
            .build();
        run_lifecycle(&mut camera);
        let mut ids = Vec::new();
        while let Some(frame) = camera.poll(Duration::from_millis(1)).unwrap() {
            ids.push(frame.frame_number);
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn open_failure_plan_yields_device_error() {
        let mut camera = SimCamera::builder("c")
            .fault_plan(FaultPlan {
                fail_open: true,
                ..FaultPlan::none()
            })
            .build();
        assert!(matches!(camera.open(), Err(CamError::Device { .. })));
    }

    #[test]
    fn controls_are_declared_and_settable() {
        let mut camera = SimCamera::builder("c").build();
        let names: Vec<String> = camera
            .control_specs()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert!(names.contains(&"exposure_s".to_string()));

        camera
            .set_control("exposure_s", &ControlValue::Float(0.05))
            .unwrap();
        assert!((camera.exposure_s - 0.05).abs() < f64::EPSILON);

        assert!(camera
            .set_control("voltage", &ControlValue::Float(1.0))
            .is_err());
    }

    #[test]
    fn factory_builds_from_toml_table() {
        let factory = SimCameraFactory;
        assert_eq!(factory.driver_type(), "sim");
        let config: toml::Value = toml::from_str("width = 32\nheight = 24\ngap_every = 10").unwrap();
        factory.validate(&config).unwrap();
        let mut source = factory.build("cam0", config).unwrap();
        let info = source.open().unwrap();
        assert_eq!((info.width, info.height), (32, 24));
    }

    #[test]
    fn factory_rejects_bad_geometry() {
        let factory = SimCameraFactory;
        let config: toml::Value = toml::from_str("width = 0").unwrap();
        assert!(factory.validate(&config).is_err());
    }
}
