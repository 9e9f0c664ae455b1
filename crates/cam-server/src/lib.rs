//! Acquisition workers, orchestration and remote control.
//!
//! Each camera gets a pair of dedicated blocking threads: an
//! [`AcquisitionWorker`] driving the vendor SDK through its lifecycle and a
//! [`WriterWorker`](cam_storage::WriterWorker) draining the bounded frame
//! queue to disk. The [`Orchestrator`] owns the per-camera handles,
//! sequences arm → wait-ready → software-trigger across all cameras, and
//! serves runtime reconfiguration through each camera's command channel.
//! The [`remote`] module exposes the JSON request/reply control endpoint.

pub mod acquisition;
pub mod command;
pub mod orchestrator;
pub mod remote;
pub mod status;
pub mod sync_worker;

pub use acquisition::{AcquisitionConfig, AcquisitionWorker};
pub use command::CameraCommand;
pub use orchestrator::{CameraHandle, Orchestrator};
pub use status::CameraStatus;
pub use sync_worker::{SyncWorker, SyncWorkerConfig};
