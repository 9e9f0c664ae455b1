//! Per-camera control commands.
//!
//! Workers are controlled through an explicit message channel, not shared
//! boolean soup: every lifecycle transition and runtime reconfiguration is
//! a command, drained by the worker between hardware polls (at millisecond
//! resolution while waiting for a trigger, once per poll while capturing).

/// A command on one camera's control channel.
#[derive(Debug, Clone)]
pub enum CameraCommand {
    /// Software trigger: leave the wait-trigger state and start capture.
    Start,

    /// Halt the current capture cycle. The worker stops and closes the
    /// device, emits the save-stop sentinel if a save was in progress,
    /// then re-arms and waits for the next trigger.
    Stop,

    /// Enable or disable saving. The true→false transition emits exactly
    /// one `Stop` sentinel to the writer.
    SetSaving(bool),

    /// Redirect future writes to a new experiment name. An in-progress
    /// save is stopped first so the change applies cleanly between runs.
    SetExperiment(String),

    /// Route a comment line into the current run log.
    Comment(String),

    /// Generic control update, validated against the camera's declared
    /// control specs before dispatch.
    SetControl {
        name: String,
        value: serde_json::Value,
    },

    /// Terminate the worker after tearing down the current cycle.
    Close,
}
