//! Simulated hardware drivers for the camrig pipeline.
//!
//! These stand in for vendor camera SDKs and the NI-DAQ sync hardware so
//! the whole acquisition pipeline can run and be tested without physical
//! devices:
//!
//! - [`SimCamera`] — a [`FrameSource`](cam_core::FrameSource) with
//!   configurable resolution and frame pacing, deterministic duplicate/gap
//!   injection on the hardware frame counter, seeded fault injection, and
//!   an optional externally scripted feed for exact-sequence tests.
//! - [`SimLineSampler`] — a [`LineSampler`](cam_core::LineSampler)
//!   producing deterministic ramps on its declared channels.
//!
//! # Example
//!
//! ```rust,ignore
//! let camera = SimCamera::builder("widefield")
//!     .resolution(512, 512)
//!     .mode(SimMode::Realistic)
//!     .id_plan(IdPlan::GapEvery { every: 100, width: 2 })
//!     .build();
//! ```

mod pattern;
mod sim;
mod sim_camera;
mod sim_lines;

pub use pattern::{test_pattern_u16, test_pattern_u8};
pub use sim::{FaultPlan, IdPlan, SimMode, SimRng};
pub use sim_camera::{SimCamera, SimCameraBuilder, SimCameraFactory, SimEvent, SimFeed};
pub use sim_lines::{SimLineSampler, SimLineSamplerBuilder};
