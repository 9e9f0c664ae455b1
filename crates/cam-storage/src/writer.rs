//! Per-camera writer worker.
//!
//! Drains one camera's frame queue on a dedicated blocking thread. A run
//! opens lazily on the first frame after a save starts and closes on the
//! `Stop` sentinel; within a run, output files rotate every
//! `frames_per_file` frames. The worker stays alive across runs and exits
//! when the queue's sender side is dropped, draining whatever is still
//! buffered first.
//!
//! Filesystem and encoder errors are fatal for this writer: they are
//! returned to the orchestrator, never retried. Acquisition is unaffected;
//! frames simply stop being persisted.

use std::path::PathBuf;

use tokio::sync::mpsc;

use cam_core::queue::QueueItem;
use cam_core::{CamError, CamResult, Frame};

use crate::run_log::RunLog;
use crate::sink::{FrameSink, SinkFormat};

/// Static configuration of one camera's writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub camera: String,
    pub data_dir: PathBuf,
    pub experiment: String,
    pub frames_per_file: u64,
    pub format: SinkFormat,
}

/// Counters reported when a writer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub runs_completed: u64,
    pub frames_written: u64,
    pub files_written: u64,
}

/// The writer worker. Construct with [`WriterWorker::new`], then hand
/// [`WriterWorker::run`] to `tokio::task::spawn_blocking`.
pub struct WriterWorker {
    cfg: WriterConfig,
    rx: mpsc::Receiver<QueueItem>,
    run_index: u64,
    frames_in_run: u64,
    files_in_run: u64,
    frames_in_file: u64,
    sink: Option<Box<dyn FrameSink>>,
    log: Option<RunLog>,
    pending_experiment: Option<String>,
    report: WriterReport,
}

impl WriterWorker {
    pub fn new(cfg: WriterConfig, rx: mpsc::Receiver<QueueItem>) -> Self {
        Self {
            cfg,
            rx,
            run_index: 0,
            frames_in_run: 0,
            files_in_run: 0,
            frames_in_file: 0,
            sink: None,
            log: None,
            pending_experiment: None,
            report: WriterReport::default(),
        }
    }

    /// Drain the queue until the sender side closes.
    pub fn run(mut self) -> CamResult<WriterReport> {
        while let Some(item) = self.rx.blocking_recv() {
            match item {
                QueueItem::Frame(frame) => self.handle_frame(frame)?,
                QueueItem::Stop => self.close_run()?,
                QueueItem::Comment(text) => self.handle_comment(&text)?,
                QueueItem::SetExperiment(name) => self.handle_experiment(name),
            }
        }
        // Sender dropped: final close intent. Buffered items were drained
        // by the loop above; close any run still open.
        self.close_run()?;
        tracing::info!(
            camera = %self.cfg.camera,
            runs = self.report.runs_completed,
            frames = self.report.frames_written,
            "writer finished"
        );
        Ok(self.report)
    }

    fn handle_frame(&mut self, frame: Frame) -> CamResult<()> {
        if !frame.geometry_is_consistent() {
            tracing::warn!(
                camera = %self.cfg.camera,
                frame = frame.frame_number,
                "dropping frame with inconsistent geometry"
            );
            return Ok(());
        }
        if self.log.is_none() {
            self.open_run()?;
        }
        if self.sink.is_none() || self.frames_in_file >= self.cfg.frames_per_file {
            self.open_next_file(&frame)?;
        }
        if let (Some(sink), Some(log)) = (self.sink.as_mut(), self.log.as_mut()) {
            sink.write(&frame)
                .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}")))?;
            log.append(frame.frame_number, frame.timestamp)
                .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}")))?;
            self.frames_in_file += 1;
            self.frames_in_run += 1;
            self.report.frames_written += 1;
        }
        Ok(())
    }

    /// Open the run directory and log. The log header must be on disk
    /// before the first frame is written.
    fn open_run(&mut self) -> CamResult<()> {
        if let Some(name) = self.pending_experiment.take() {
            self.cfg.experiment = name;
        }
        let run_dir = self
            .cfg
            .data_dir
            .join(&self.cfg.experiment)
            .join(&self.cfg.camera);
        std::fs::create_dir_all(&run_dir).map_err(|e| {
            CamError::storage(
                &self.cfg.camera,
                format!("failed to create {run_dir:?}: {e}"),
            )
        })?;
        let log_path = run_dir.join(format!(
            "{}_run{:03}.camlog",
            self.cfg.camera, self.run_index
        ));
        let log = RunLog::create(&log_path, &self.cfg.camera, self.run_index)
            .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}")))?;
        tracing::info!(
            camera = %self.cfg.camera,
            run = self.run_index,
            dir = %run_dir.display(),
            "opened writer run"
        );
        self.log = Some(log);
        self.files_in_run = 0;
        self.frames_in_run = 0;
        self.frames_in_file = 0;
        Ok(())
    }

    fn open_next_file(&mut self, first: &Frame) -> CamResult<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.close()
                .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}")))?;
        }
        let run_dir = self
            .cfg
            .data_dir
            .join(&self.cfg.experiment)
            .join(&self.cfg.camera);
        let name = self
            .cfg
            .format
            .file_name(&self.cfg.camera, self.run_index, self.files_in_run, first);
        let path = run_dir.join(name);
        let sink = self
            .cfg
            .format
            .open(&path, first)
            .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}")))?;
        tracing::debug!(camera = %self.cfg.camera, file = %path.display(), "opened sink file");
        self.sink = Some(sink);
        self.files_in_run += 1;
        self.report.files_written += 1;
        self.frames_in_file = 0;
        Ok(())
    }

    /// Close the current run: flush + close the sink and log, bump the run
    /// counter, reset per-run counters. A `Stop` with no open run is a
    /// no-op — the save cycle never delivered a frame.
    fn close_run(&mut self) -> CamResult<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.close()
                .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}")))?;
        }
        let Some(log) = self.log.take() else {
            tracing::debug!(camera = %self.cfg.camera, "stop without an open run");
            return Ok(());
        };
        log.close(self.frames_in_run, self.files_in_run)
            .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}")))?;
        tracing::info!(
            camera = %self.cfg.camera,
            run = self.run_index,
            frames = self.frames_in_run,
            files = self.files_in_run,
            "closed writer run"
        );
        self.run_index += 1;
        self.report.runs_completed += 1;
        self.frames_in_run = 0;
        self.files_in_run = 0;
        self.frames_in_file = 0;
        Ok(())
    }

    fn handle_comment(&mut self, text: &str) -> CamResult<()> {
        match self.log.as_mut() {
            Some(log) => log
                .comment(text)
                .map_err(|e| CamError::storage(&self.cfg.camera, format!("{e:#}"))),
            None => {
                tracing::debug!(camera = %self.cfg.camera, "comment with no open run dropped");
                Ok(())
            }
        }
    }

    fn handle_experiment(&mut self, name: String) {
        if self.log.is_some() {
            // The orchestrator stops an in-progress save before redirecting;
            // arriving here means the redirect raced a frame. It still only
            // applies to the next run.
            tracing::warn!(
                camera = %self.cfg.camera,
                experiment = %name,
                "experiment redirect during open run; applies to next run"
            );
        }
        self.pending_experiment = Some(name);
    }
}
