//! Error taxonomy for the acquisition pipeline.
//!
//! Errors are classified by how the pipeline must react to them:
//!
//! - [`CamError::Device`] — open/configure failure. Fatal for that camera at
//!   startup; other cameras are unaffected.
//! - capture timeouts are *not* errors: [`FrameSource::poll`] returns
//!   `Ok(None)`. A timeout is expected, retryable, and counted as a dropped
//!   frame by the acquisition worker.
//! - [`CamError::Fault`] — driver-reported hardware fault during capture.
//!   Logged and treated as a dropped frame; repeated faults trigger a
//!   bounded stop/close/reopen recovery cycle before escalating to fatal.
//! - [`CamError::Storage`] — filesystem or encoder failure. Fatal for that
//!   camera's writer; acquisition keeps running and drops frames with a
//!   logged warning. No automatic retry: silent partial writes are worse
//!   than stopping.
//!
//! Camera-local errors never cross a worker boundary silently: every fatal
//! exit is logged with a camera-identified message and leaves the camera's
//! `ready`/`running` status cleared so the orchestrator can detect the
//! stall.
//!
//! [`FrameSource::poll`]: crate::source::FrameSource::poll

use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type CamResult<T> = std::result::Result<T, CamError>;

/// Primary error type for the acquisition pipeline.
#[derive(Error, Debug)]
pub enum CamError {
    /// Device open/configure failure (hardware unreachable, parameter
    /// rejected). Fatal for this camera at startup.
    #[error("camera '{camera}' device error: {message}")]
    Device { camera: String, message: String },

    /// Driver-reported hardware fault during capture. Distinguished from a
    /// timeout (`poll() -> Ok(None)`): faults may be fatal after bounded
    /// recovery attempts, timeouts never are.
    #[error("camera '{camera}' capture fault: {message}")]
    Fault { camera: String, message: String },

    /// Filesystem or encoder failure in a writer. Fatal for that writer.
    #[error("storage error for '{camera}': {message}")]
    Storage { camera: String, message: String },

    /// Configuration parsing or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Control update rejected before dispatch (unknown name, type
    /// mismatch, or out of declared range).
    #[error("control '{name}' rejected: {message}")]
    Control { name: String, message: String },

    /// No factory registered for the requested driver type.
    #[error("unknown driver type '{0}'")]
    UnknownDriver(String),

    /// A bounded wait on camera state expired; names the cameras that
    /// failed to get there so a stalled camera is a diagnostic, not a hang.
    #[error("timed out after {waited_ms} ms waiting on cameras: {cameras:?}")]
    WaitTimeout { waited_ms: u64, cameras: Vec<String> },

    /// Shutdown completed but one or more workers reported errors.
    #[error("shutdown failed with {} error(s)", .0.len())]
    Shutdown(Vec<CamError>),

    /// Standard I/O failure outside a writer context.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CamError {
    /// Device open/configure failure for the named camera.
    pub fn device(camera: impl Into<String>, message: impl ToString) -> Self {
        Self::Device {
            camera: camera.into(),
            message: message.to_string(),
        }
    }

    /// Capture fault for the named camera.
    pub fn fault(camera: impl Into<String>, message: impl ToString) -> Self {
        Self::Fault {
            camera: camera.into(),
            message: message.to_string(),
        }
    }

    /// Storage failure for the named camera's writer.
    pub fn storage(camera: impl Into<String>, message: impl ToString) -> Self {
        Self::Storage {
            camera: camera.into(),
            message: message.to_string(),
        }
    }

    /// True for error classes that end the owning worker's loop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Fault { .. })
    }
}
