//! Synchronization-channel worker.
//!
//! Drives a [`LineSampler`] through the same trigger/save protocol as the
//! cameras: armed on open, started by the same software trigger broadcast,
//! and writing one CSV row per sample while saving is enabled. Runs close
//! on save-stop and rotate the run index exactly like camera runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use cam_core::sync::{LineInfo, LineSampler};
use cam_core::{CamError, CamResult};
use cam_storage::line_log::LineLog;

use crate::command::CameraCommand;
use crate::status::CameraStatus;

/// Static configuration of the sync worker.
#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    pub id: String,
    pub data_dir: PathBuf,
    pub experiment: String,
    pub poll_timeout: Duration,
    pub trigger_poll: Duration,
}

/// The sync-channel worker. Construct, then hand [`SyncWorker::run`] to
/// `tokio::task::spawn_blocking`.
pub struct SyncWorker {
    cfg: SyncWorkerConfig,
    sampler: Box<dyn LineSampler>,
    commands: mpsc::Receiver<CameraCommand>,
    status: Arc<CameraStatus>,
    info: Option<LineInfo>,
    log: Option<LineLog>,
    run_index: u64,
    saving: bool,
    pending_experiment: Option<String>,
    start_requested: bool,
    stop_requested: bool,
    close_requested: bool,
}

impl SyncWorker {
    pub fn new(
        cfg: SyncWorkerConfig,
        sampler: Box<dyn LineSampler>,
        commands: mpsc::Receiver<CameraCommand>,
        status: Arc<CameraStatus>,
    ) -> Self {
        Self {
            cfg,
            sampler,
            commands,
            status,
            info: None,
            log: None,
            run_index: 0,
            saving: false,
            pending_experiment: None,
            start_requested: false,
            stop_requested: false,
            close_requested: false,
        }
    }

    pub fn run(mut self) -> CamResult<()> {
        let result = self.run_cycles();
        self.status.set_running(false);
        self.status.set_ready(false);
        match &result {
            Ok(()) => tracing::info!(sync = %self.cfg.id, "sync worker closed"),
            Err(e) => tracing::error!(sync = %self.cfg.id, error = %e, "sync worker failed"),
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

            let info = self.sampler.open()?;
            tracing::info!(
                sync = %self.cfg.id,
                rate_hz = info.sample_rate_hz,
                channels = info.channels.len(),
                "sync channel armed"
            );
            self.info = Some(info);
            self.status.set_ready(true);

            let capture_result = if self.wait_for_trigger() {
                self.sampler.start().and_then(|_| {
                    self.status.set_running(true);
                    self.sample_loop()
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

    fn wait_for_trigger(&mut self) -> bool {
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

    fn sample_loop(&mut self) -> CamResult<()> {
        loop {
            self.drain_commands();
            if self.stop_requested || self.close_requested {
                return Ok(());
            }
            match self.sampler.sample(self.cfg.poll_timeout) {
                Ok(Some(sample)) => {
                    self.status.record_frame(sample.sample_number);
                    if self.saving {
                        self.write_sample(&sample)?;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Sync samples are advisory alignment data; a fault is
                    // logged and the sample dropped.
                    self.status.add_fault();
                    tracing::warn!(sync = %self.cfg.id, error = %e, "sample fault; sample dropped");
                }
            }
        }
    }

    fn write_sample(&mut self, sample: &cam_core::sync::LineSample) -> CamResult<()> {
        if self.log.is_none() {
            self.open_run()?;
        }
        if let Some(log) = self.log.as_mut() {
            log.append(sample)
                .map_err(|e| CamError::storage(&self.cfg.id, format!("{e:#}")))?;
        }
        Ok(())
    }

    fn open_run(&mut self) -> CamResult<()> {
        if let Some(name) = self.pending_experiment.take() {
            self.cfg.experiment = name;
        }
        let Some(info) = self.info.clone() else {
            return Err(CamError::device(&self.cfg.id, "run opened before open()"));
        };
        let run_dir = self.cfg.data_dir.join(&self.cfg.experiment).join(&self.cfg.id);
        std::fs::create_dir_all(&run_dir).map_err(|e| {
            CamError::storage(&self.cfg.id, format!("failed to create {run_dir:?}: {e}"))
        })?;
        let path = run_dir.join(format!("{}_run{:03}.csv", self.cfg.id, self.run_index));
        let log = LineLog::create(&path, &info, self.run_index)
            .map_err(|e| CamError::storage(&self.cfg.id, format!("{e:#}")))?;
        tracing::info!(sync = %self.cfg.id, run = self.run_index, "opened sync run");
        self.log = Some(log);
        Ok(())
    }

    fn close_run(&mut self) -> CamResult<()> {
        let Some(log) = self.log.take() else {
            return Ok(());
        };
        let rows = log.rows();
        log.close()
            .map_err(|e| CamError::storage(&self.cfg.id, format!("{e:#}")))?;
        tracing::info!(sync = %self.cfg.id, run = self.run_index, rows, "closed sync run");
        self.run_index += 1;
        Ok(())
    }

    fn end_save_if_active(&mut self) -> CamResult<()> {
        if self.saving {
            self.saving = false;
            self.status.set_saving(false);
            self.close_run()?;
        }
        Ok(())
    }

    fn teardown_cycle(&mut self) -> CamResult<()> {
        if let Err(e) = self.sampler.stop() {
            tracing::warn!(sync = %self.cfg.id, error = %e, "stop during teardown failed");
        }
        let save_result = self.end_save_if_active();
        if let Err(e) = self.sampler.close() {
            tracing::warn!(sync = %self.cfg.id, error = %e, "close during teardown failed");
        }
        self.status.set_running(false);
        self.status.set_ready(false);
        self.start_requested = false;
        self.stop_requested = false;
        save_result
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
            CameraCommand::SetSaving(enable) => {
                if enable {
                    if !self.saving {
                        self.saving = true;
                        self.status.set_saving(true);
                    }
                } else if let Err(e) = self.end_save_if_active() {
                    tracing::error!(sync = %self.cfg.id, error = %e, "failed to close sync run");
                }
            }
            CameraCommand::SetExperiment(name) => {
                if let Err(e) = self.end_save_if_active() {
                    tracing::error!(sync = %self.cfg.id, error = %e, "failed to close sync run");
                }
                self.pending_experiment = Some(name);
            }
            // Comments and controls have no meaning for the sync channel.
            CameraCommand::Comment(_) | CameraCommand::SetControl { .. } => {}
        }
    }
}
