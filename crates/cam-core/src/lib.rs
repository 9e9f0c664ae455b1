//! Core types and traits for the camrig multi-camera acquisition pipeline.
//!
//! This crate defines the hardware-agnostic contracts the rest of the
//! workspace is built around:
//!
//! - [`data::Frame`] — one image frame plus its hardware frame counter and
//!   device timestamp.
//! - [`source::FrameSource`] — capability trait over one physical camera.
//!   Vendor SDKs (Vimba, Pylon, PVCAM, Spinnaker, xiAPI, ...) live behind
//!   this trait in driver crates; this workspace ships a simulated driver.
//! - [`source::SourceFactory`] / [`source::SourceRegistry`] — composition
//!   root plumbing that turns a `driver = "..."` config table into a boxed
//!   source.
//! - [`control::ControlSet`] — declared, typed, range-checked camera
//!   controls for generic remote parameter updates.
//! - [`queue::QueueItem`] — the frame/sentinel protocol between each
//!   camera's acquisition worker and its writer worker.
//! - [`sync::LineSampler`] — capability trait over a synchronization DAQ
//!   channel sampling digital/analog lines at a fixed rate.
//! - [`config::RigConfig`] — the explicit configuration object passed to
//!   the orchestrator at construction.
//! - [`error::CamError`] — the error taxonomy shared by every crate.

pub mod config;
pub mod control;
pub mod data;
pub mod error;
pub mod queue;
pub mod source;
pub mod sync;

pub use config::{CameraConfig, RigConfig};
pub use control::{ControlKind, ControlSet, ControlSpec, ControlValue};
pub use data::Frame;
pub use error::{CamError, CamResult};
pub use queue::QueueItem;
pub use source::{FrameSource, SourceFactory, SourceInfo, SourceRegistry, SourceState, TriggerMode};
pub use sync::{LineInfo, LineSample, LineSampler};
