//! The `FrameSource` capability trait and its factory plumbing.
//!
//! One [`FrameSource`] abstracts one physical camera. Vendor SDKs are not
//! safely shareable across threads, so every source is owned exclusively by
//! its camera's acquisition worker and driven from a single dedicated
//! blocking thread; the trait is therefore synchronous (`poll` blocks on
//! the hardware) and only requires `Send` for the initial handoff into
//! that thread.
//!
//! # Lifecycle
//!
//! ```text
//! Closed → Opened → Armed → Running → Stopping → Opened   (re-arm loop)
//!    ▲                                              │
//!    └──────────────── close() ◄────────────────────┘
//! ```
//!
//! Between `Armed` and `Running` sits the software-trigger wait: the
//! acquisition worker holds the source armed and only calls [`start`]
//! once the start trigger arrives, polling its control channel at
//! millisecond resolution. Hardware-triggered sources start immediately;
//! the electrical gate lives in the camera.
//!
//! [`start`]: FrameSource::start

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::{ControlSpec, ControlValue};
use crate::data::Frame;
use crate::error::{CamError, CamResult};

/// What starts exposure on a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Capture runs as soon as the source is started.
    FreeRun,
    /// Capture waits for the orchestrator's software trigger broadcast.
    #[default]
    Software,
    /// Capture is gated by an external electrical signal; the pipeline
    /// starts the source immediately and the camera waits on the wire.
    Hardware,
}

/// Lifecycle state of a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Closed,
    Opened,
    Armed,
    Running,
    Stopping,
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SourceState::Closed => "closed",
            SourceState::Opened => "opened",
            SourceState::Armed => "armed",
            SourceState::Running => "running",
            SourceState::Stopping => "stopping",
        };
        write!(f, "{label}")
    }
}

/// Frame geometry and clock properties reported by [`FrameSource::open`].
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Camera identity used in logs and file names.
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bit_depth: u32,

    /// Fixed-point scale of the device clock, if any. Some device families
    /// report timestamps in ticks that must be divided (observed: by 10000)
    /// to obtain seconds. This is a collaborator-declared property; the
    /// acquisition worker applies it before frames leave the camera thread.
    pub timestamp_divisor: Option<f64>,
}

impl SourceInfo {
    /// Convert a raw device timestamp to seconds.
    pub fn scale_timestamp(&self, raw: f64) -> f64 {
        match self.timestamp_divisor {
            Some(divisor) if divisor != 0.0 => raw / divisor,
            _ => raw,
        }
    }
}

/// Capability trait over one physical camera.
///
/// # Contract
///
/// - [`open`] configures binning/exposure/gain/ROI/trigger mode and reports
///   the frame geometry. Fails with [`CamError::Device`] when the hardware
///   is unreachable or a parameter is rejected.
/// - [`arm`] allocates capture buffers and readies the device for
///   triggered or free-run acquisition.
/// - [`start`] begins capture; a no-op when already running.
/// - [`poll`] blocks until the next frame or the timeout. `Ok(None)` is a
///   timeout — expected and retryable. [`CamError::Fault`] is a driver
///   fault and must be distinguishable from a timeout.
/// - [`stop`] halts capture and drains in-flight buffers. Backends that
///   must wait for outstanding buffer completions do so here, before
///   `close` releases the handle.
/// - [`close`] releases the driver handle; idempotent.
///
/// A source may deliver the same `frame_number` twice when its capture
/// buffer has not refreshed between polls; consumers treat the repeat as
/// already seen.
///
/// [`open`]: FrameSource::open
/// [`arm`]: FrameSource::arm
/// [`start`]: FrameSource::start
/// [`poll`]: FrameSource::poll
/// [`stop`]: FrameSource::stop
/// [`close`]: FrameSource::close
pub trait FrameSource: Send {
    fn open(&mut self) -> CamResult<SourceInfo>;

    fn arm(&mut self) -> CamResult<()>;

    fn start(&mut self) -> CamResult<()>;

    fn poll(&mut self, timeout: Duration) -> CamResult<Option<Frame>>;

    fn stop(&mut self) -> CamResult<()>;

    fn close(&mut self) -> CamResult<()>;

    fn state(&self) -> SourceState;

    /// Controls this source declares for generic remote parameter updates.
    ///
    /// The returned specs carry dtype and min/max bounds; values are
    /// validated against them before [`set_control`] is ever called.
    ///
    /// [`set_control`]: FrameSource::set_control
    fn control_specs(&self) -> Vec<ControlSpec> {
        Vec::new()
    }

    /// Apply an already-validated control value.
    fn set_control(&mut self, name: &str, _value: &ControlValue) -> CamResult<()> {
        Err(CamError::Control {
            name: name.to_string(),
            message: "source declares no controls".to_string(),
        })
    }
}

/// Factory for one driver type.
///
/// Factories are registered with a [`SourceRegistry`] at the composition
/// root; the orchestrator never names a concrete driver. Each factory
/// validates and consumes its own driver-specific `toml::Value` table.
pub trait SourceFactory: Send + Sync {
    /// Driver type string matched against `driver = "..."` in the config.
    fn driver_type(&self) -> &'static str;

    /// Validate a driver config table without building the source.
    fn validate(&self, config: &toml::Value) -> CamResult<()>;

    /// Build a source for the named camera.
    fn build(&self, camera: &str, config: toml::Value) -> CamResult<Box<dyn FrameSource>>;
}

/// Registry mapping driver type strings to factories.
///
/// Resolved once at startup into explicit per-camera sources; there is no
/// global mutable plugin list.
#[derive(Default)]
pub struct SourceRegistry {
    factories: HashMap<&'static str, Box<dyn SourceFactory>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration for the same driver type
    /// replaces the earlier one.
    pub fn register(&mut self, factory: Box<dyn SourceFactory>) {
        let driver_type = factory.driver_type();
        if self.factories.insert(driver_type, factory).is_some() {
            tracing::warn!(driver = driver_type, "replacing previously registered driver factory");
        }
    }

    pub fn driver_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Validate a camera's driver table against its factory.
    pub fn validate(&self, driver: &str, config: &toml::Value) -> CamResult<()> {
        self.factories
            .get(driver)
            .ok_or_else(|| CamError::UnknownDriver(driver.to_string()))?
            .validate(config)
    }

    /// Build a source for the named camera.
    pub fn build(
        &self,
        driver: &str,
        camera: &str,
        config: toml::Value,
    ) -> CamResult<Box<dyn FrameSource>> {
        self.factories
            .get(driver)
            .ok_or_else(|| CamError::UnknownDriver(driver.to_string()))?
            .build(camera, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_scaling_applies_declared_divisor() {
        let info = SourceInfo {
            name: "cam0".into(),
            width: 640,
            height: 480,
            channels: 1,
            bit_depth: 16,
            timestamp_divisor: Some(10000.0),
        };
        assert!((info.scale_timestamp(25000.0) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn timestamp_scaling_is_identity_without_divisor() {
        let info = SourceInfo {
            name: "cam0".into(),
            width: 640,
            height: 480,
            channels: 1,
            bit_depth: 8,
            timestamp_divisor: None,
        };
        assert!((info.scale_timestamp(1.5) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn registry_rejects_unknown_driver() {
        let registry = SourceRegistry::new();
        let err = registry
            .build("no_such_driver", "cam0", toml::Value::Table(Default::default()))
            .err()
            .unwrap();
        assert!(matches!(err, CamError::UnknownDriver(_)));
    }
}
