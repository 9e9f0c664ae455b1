//! Per-camera acquisition worker.
//!
//! Runs one [`FrameSource`] through its lifecycle on a dedicated blocking
//! thread, repeatedly:
//!
//! 1. open + arm; report ready.
//! 2. wait for the start trigger, draining the command channel at
//!    millisecond resolution (free-run and hardware-triggered sources
//!    start immediately; the electrical gate lives in the camera).
//! 3. start capture and poll. Each frame is timestamp-scaled,
//!    de-duplicated on its hardware counter, gap-checked, published to the
//!    preview slot, and — while saving — copied into the bounded frame
//!    queue.
//! 4. on stop: halt the device, emit the save-stop sentinel exactly once
//!    if a save was in progress, close, clear trigger state and re-arm.
//!    On close: terminate instead.
//!
//! Capture faults are dropped frames, not crashes: after a configured run
//! of consecutive faults the worker cycles stop/close/reopen a bounded
//! number of times before escalating to a fatal camera error. Fatal exits
//! always leave `ready`/`running` cleared so the orchestrator sees the
//! stall.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};

use cam_core::control::ControlSet;
use cam_core::queue::QueueItem;
use cam_core::source::{FrameSource, SourceInfo, TriggerMode};
use cam_core::{CamError, CamResult, Frame};

use crate::command::CameraCommand;
use crate::status::CameraStatus;

/// Static configuration of one acquisition worker.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub camera: String,
    pub trigger: TriggerMode,
    /// Hardware poll timeout; bounds cancellation latency.
    pub poll_timeout: Duration,
    /// Tick of the software-trigger wait loop.
    pub trigger_poll: Duration,
    /// Consecutive faults tolerated before a recovery cycle.
    pub max_consecutive_faults: u32,
    /// Recovery cycles attempted per arm cycle before fatal escalation.
    pub max_recovery_attempts: u32,
    /// Whether saving starts enabled.
    pub save_on_start: bool,
}

impl AcquisitionConfig {
    pub fn new(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            trigger: TriggerMode::Software,
            poll_timeout: Duration::from_millis(100),
            trigger_poll: Duration::from_millis(1),
            max_consecutive_faults: 5,
            max_recovery_attempts: 2,
            save_on_start: false,
        }
    }
}

/// The acquisition worker. Construct with [`AcquisitionWorker::new`], then
/// hand [`AcquisitionWorker::run`] to `tokio::task::spawn_blocking`.
pub struct AcquisitionWorker {
    cfg: AcquisitionConfig,
    source: Box<dyn FrameSource>,
    commands: mpsc::Receiver<CameraCommand>,
    sink_tx: mpsc::Sender<QueueItem>,
    status: Arc<CameraStatus>,
    preview: watch::Sender<Option<Arc<Frame>>>,
    controls: ControlSet,
    info: Option<SourceInfo>,
    saving: bool,
    start_requested: bool,
    stop_requested: bool,
    close_requested: bool,
    last_forwarded: Option<u64>,
    consecutive_faults: u32,
    recovery_attempts: u32,
    writer_lost: bool,
}

impl AcquisitionWorker {
    pub fn new(
        cfg: AcquisitionConfig,
        source: Box<dyn FrameSource>,
        commands: mpsc::Receiver<CameraCommand>,
        sink_tx: mpsc::Sender<QueueItem>,
        status: Arc<CameraStatus>,
        preview: watch::Sender<Option<Arc<Frame>>>,
    ) -> Self {
        let controls = ControlSet::new(source.control_specs());
        let save_on_start = cfg.save_on_start;
        Self {
            cfg,
            source,
            commands,
            sink_tx,
            status,
            preview,
            controls,
            info: None,
            saving: save_on_start,
            start_requested: false,
            stop_requested: false,
            close_requested: false,
            last_forwarded: None,
            consecutive_faults: 0,
            recovery_attempts: 0,
            writer_lost: false,
        }
    }

    /// Drive the source until close. Never exits silently: fatal errors are
    /// logged with the camera identity and returned, with `ready`/`running`
    /// cleared so the orchestrator can detect the stall.
    pub fn run(mut self) -> CamResult<()> {
        self.status.set_saving(self.saving);
        let result = self.run_cycles();
        self.status.set_running(false);
        self.status.set_ready(false);
        match &result {
            Ok(()) => tracing::info!(camera = %self.cfg.camera, "acquisition worker closed"),
            Err(e) => {
                tracing::error!(camera = %self.cfg.camera, error = %e, "acquisition worker failed")
            }
        }
        result
    }

    fn run_cycles(&mut self) -> CamResult<()> {
        loop {
            self.drain_commands();
            if self.close_requested {
                return Ok(());
            }
            self.stop_requested = false;

            let info = self.source.open().map_err(|e| {
                tracing::error!(camera = %self.cfg.camera, error = %e, "device open failed");
                e
            })?;
            self.source.arm()?;
            tracing::info!(
                camera = %self.cfg.camera,
                width = info.width,
                height = info.height,
                bit_depth = info.bit_depth,
                "camera armed"
            );
            self.info = Some(info);
            self.last_forwarded = None;
            self.consecutive_faults = 0;
            self.recovery_attempts = 0;
            self.status.set_ready(true);

            let capture_result = if self.wait_for_trigger() {
                self.source.start().and_then(|_| {
                    self.status.set_running(true);
                    tracing::info!(camera = %self.cfg.camera, "capture started");
                    self.capture_loop()
                })
            } else {
                Ok(())
            };
            let teardown_result = self.teardown_cycle();
            capture_result?;
            teardown_result?;

            if self.close_requested {
                return Ok(());
            }
        }
    }

    /// Software-trigger wait between Armed and Running, polled at
    /// millisecond resolution. Returns false when the cycle should tear
    /// down instead of starting.
    fn wait_for_trigger(&mut self) -> bool {
        if matches!(self.cfg.trigger, TriggerMode::FreeRun | TriggerMode::Hardware) {
            return true;
        }
        tracing::debug!(camera = %self.cfg.camera, "waiting for software trigger");
        loop {
            self.drain_commands();
            if self.close_requested || self.stop_requested {
                return false;
            }
            if self.start_requested {
                self.start_requested = false;
                return true;
            }
            std::thread::sleep(self.cfg.trigger_poll);
        }
    }

    fn capture_loop(&mut self) -> CamResult<()> {
        loop {
            self.drain_commands();
            if self.stop_requested || self.close_requested {
                return Ok(());
            }
            match self.source.poll(self.cfg.poll_timeout) {
                Ok(Some(frame)) => {
                    self.consecutive_faults = 0;
                    self.handle_frame(frame);
                }
                // Timeout: expected and retryable, counts as a dropped frame.
                Ok(None) => {}
                Err(err) => self.handle_fault(err)?,
            }
        }
    }

    fn handle_frame(&mut self, mut frame: Frame) {
        if let Some(info) = &self.info {
            frame.timestamp = info.scale_timestamp(frame.timestamp);
        }
        match self.last_forwarded {
            // Capture buffer not refreshed between polls: already seen,
            // never forwarded twice, not a skip.
            Some(last) if frame.frame_number == last => {
                tracing::trace!(
                    camera = %self.cfg.camera,
                    frame = frame.frame_number,
                    "duplicate frame counter; frame already seen"
                );
                return;
            }
            Some(last) if frame.frame_number < last => {
                tracing::warn!(
                    camera = %self.cfg.camera,
                    frame = frame.frame_number,
                    last,
                    "frame counter went backwards; frame dropped"
                );
                return;
            }
            Some(last) if frame.frame_number > last + 1 => {
                let missing = frame.frame_number - last - 1;
                tracing::warn!(
                    camera = %self.cfg.camera,
                    "skipped frame: expected {} got {}",
                    last + 1,
                    frame.frame_number
                );
                self.status.add_skipped(missing);
            }
            _ => {}
        }
        self.last_forwarded = Some(frame.frame_number);

        let frame = Arc::new(frame);
        let _ = self.preview.send_replace(Some(Arc::clone(&frame)));

        if self.saving {
            // The queue owns its own copy; the preview slot keeps the Arc.
            self.send_queue(QueueItem::Frame((*frame).clone()));
        }
        // Counted only once fully forwarded, so observers of the counter
        // see frames that have already reached the queue.
        self.status.record_frame(frame.frame_number);
    }

    fn handle_fault(&mut self, err: CamError) -> CamResult<()> {
        self.status.add_fault();
        self.consecutive_faults += 1;
        tracing::warn!(
            camera = %self.cfg.camera,
            error = %err,
            consecutive = self.consecutive_faults,
            "capture fault; frame dropped"
        );
        if self.consecutive_faults < self.cfg.max_consecutive_faults {
            return Ok(());
        }
        if self.recovery_attempts >= self.cfg.max_recovery_attempts {
            tracing::error!(
                camera = %self.cfg.camera,
                "fault threshold exceeded after {} recovery attempt(s)",
                self.recovery_attempts
            );
            return Err(err);
        }
        self.recovery_attempts += 1;
        tracing::info!(
            camera = %self.cfg.camera,
            attempt = self.recovery_attempts,
            "recovering camera: stop/close/reopen"
        );
        // Cleanup of a faulted device is known-recoverable: log and go on.
        if let Err(e) = self.source.stop() {
            tracing::warn!(camera = %self.cfg.camera, error = %e, "stop during recovery failed");
        }
        if let Err(e) = self.source.close() {
            tracing::warn!(camera = %self.cfg.camera, error = %e, "close during recovery failed");
        }
        let info = self.source.open()?;
        self.info = Some(info);
        self.source.arm()?;
        self.source.start()?;
        self.consecutive_faults = 0;
        Ok(())
    }

    fn teardown_cycle(&mut self) -> CamResult<()> {
        if let Err(e) = self.source.stop() {
            tracing::warn!(camera = %self.cfg.camera, error = %e, "stop during teardown failed");
        }
        self.end_save_if_active();
        if let Err(e) = self.source.close() {
            tracing::warn!(camera = %self.cfg.camera, error = %e, "close during teardown failed");
        }
        self.status.set_running(false);
        self.status.set_ready(false);
        self.start_requested = false;
        self.stop_requested = false;
        Ok(())
    }

    /// Emit the save-stop sentinel exactly once per save cycle.
    fn end_save_if_active(&mut self) {
        if self.saving {
            self.saving = false;
            self.status.set_saving(false);
            self.send_queue(QueueItem::Stop);
            tracing::info!(camera = %self.cfg.camera, "save stopped");
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.apply_command(cmd),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.close_requested = true;
                    return;
                }
            }
        }
    }

    fn apply_command(&mut self, cmd: CameraCommand) {
        match cmd {
            CameraCommand::Start => self.start_requested = true,
            CameraCommand::Stop => self.stop_requested = true,
            CameraCommand::Close => self.close_requested = true,
            CameraCommand::SetSaving(enable) => self.set_saving(enable),
            CameraCommand::SetExperiment(name) => {
                // Applies between runs: stop an in-progress save first.
                self.end_save_if_active();
                self.send_queue(QueueItem::SetExperiment(name));
            }
            CameraCommand::Comment(text) => self.send_queue(QueueItem::Comment(text)),
            CameraCommand::SetControl { name, value } => self.apply_control(&name, &value),
        }
    }

    fn set_saving(&mut self, enable: bool) {
        if enable {
            if !self.saving {
                self.saving = true;
                self.status.set_saving(true);
                tracing::info!(camera = %self.cfg.camera, "save enabled");
            }
        } else {
            self.end_save_if_active();
        }
    }

    fn apply_control(&mut self, name: &str, value: &serde_json::Value) {
        let coerced = match self.controls.coerce(name, value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(camera = %self.cfg.camera, error = %e, "control update rejected");
                return;
            }
        };
        match self.source.set_control(name, &coerced) {
            Ok(()) => {
                tracing::info!(camera = %self.cfg.camera, control = name, value = ?coerced, "control updated")
            }
            Err(e) => {
                tracing::warn!(camera = %self.cfg.camera, error = %e, "control update failed")
            }
        }
    }

    fn send_queue(&mut self, item: QueueItem) {
        // Bounded queue: block on backpressure rather than grow memory.
        // A closed receiver means the writer died of a storage error;
        // acquisition keeps running and frames are dropped with a warning.
        if self.sink_tx.blocking_send(item).is_err() {
            if !self.writer_lost {
                self.writer_lost = true;
                tracing::warn!(
                    camera = %self.cfg.camera,
                    "writer unavailable; frames will be dropped until restart"
                );
            } else {
                tracing::trace!(camera = %self.cfg.camera, "frame dropped; writer unavailable");
            }
        }
    }
}
