//! Orchestrator: owns every camera's worker pair and sequences the rig.
//!
//! Startup is "arm all → wait ready → software-trigger all": each camera
//! is spawned, the orchestrator blocks (bounded, with a per-camera
//! diagnostic on expiry) until every camera reports ready, then broadcasts
//! the start trigger. Re-triggering stops everything, re-enables saving
//! and runs the same sequence again — the stop → clear → restart order is
//! enforced by awaiting quiescence between the steps, so a restart can
//! never race a not-yet-closed device handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use cam_core::config::RigConfig;
use cam_core::control::ControlSet;
use cam_core::queue::frame_channel;
use cam_core::source::{FrameSource, SourceRegistry};
use cam_core::sync::LineSampler;
use cam_core::{CamError, CamResult, Frame};
use cam_storage::sink::SinkFormat;
use cam_storage::writer::{WriterConfig, WriterReport, WriterWorker};

use crate::acquisition::{AcquisitionConfig, AcquisitionWorker};
use crate::command::CameraCommand;
use crate::status::CameraStatus;
use crate::sync_worker::{SyncWorker, SyncWorkerConfig};

struct CameraTasks {
    acquisition: JoinHandle<CamResult<()>>,
    writer: JoinHandle<CamResult<WriterReport>>,
}

/// Handle to one camera's running worker pair.
pub struct CameraHandle {
    pub id: String,
    pub status: Arc<CameraStatus>,
    commands: mpsc::Sender<CameraCommand>,
    preview: watch::Receiver<Option<Arc<Frame>>>,
    controls: ControlSet,
    tasks: Mutex<Option<CameraTasks>>,
}

impl CameraHandle {
    /// Latest-frame preview tap (single writer, latest wins).
    pub fn preview(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.preview.clone()
    }

    /// Declared control specs for this camera.
    pub fn controls(&self) -> &ControlSet {
        &self.controls
    }

    pub async fn send(&self, cmd: CameraCommand) {
        if self.commands.send(cmd).await.is_err() {
            tracing::warn!(camera = %self.id, "command dropped; worker is gone");
        }
    }

    /// Close this camera's worker pair and collect both exit results.
    /// Returns `None` when the pair was already shut down.
    pub async fn shutdown(&self) -> Option<(CamResult<()>, CamResult<WriterReport>)> {
        self.send(CameraCommand::Close).await;
        let tasks = self.tasks.lock().await.take()?;
        let acquisition = match tasks.acquisition.await {
            Ok(result) => result,
            Err(e) => Err(CamError::fault(&self.id, format!("worker panicked: {e}"))),
        };
        let writer = match tasks.writer.await {
            Ok(result) => result,
            Err(e) => Err(CamError::fault(&self.id, format!("writer panicked: {e}"))),
        };
        Some((acquisition, writer))
    }
}

struct SyncHandle {
    id: String,
    status: Arc<CameraStatus>,
    commands: mpsc::Sender<CameraCommand>,
    task: Mutex<Option<JoinHandle<CamResult<()>>>>,
}

/// Spawn one camera's acquisition + writer pair. Must run inside a tokio
/// runtime (the workers are `spawn_blocking` threads).
pub fn spawn_camera(
    source: Box<dyn FrameSource>,
    acq_cfg: AcquisitionConfig,
    writer_cfg: WriterConfig,
    queue_capacity: usize,
) -> CameraHandle {
    let id = acq_cfg.camera.clone();
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (frame_tx, frame_rx) = frame_channel(queue_capacity);
    let (preview_tx, preview_rx) = watch::channel(None);
    let status = Arc::new(CameraStatus::new(&id));
    let controls = ControlSet::new(source.control_specs());

    let worker = AcquisitionWorker::new(
        acq_cfg,
        source,
        cmd_rx,
        frame_tx,
        Arc::clone(&status),
        preview_tx,
    );
    let writer = WriterWorker::new(writer_cfg, frame_rx);

    let acquisition = tokio::task::spawn_blocking(move || worker.run());
    let writer = tokio::task::spawn_blocking(move || writer.run());

    CameraHandle {
        id,
        status,
        commands: cmd_tx,
        preview: preview_rx,
        controls,
        tasks: Mutex::new(Some(CameraTasks {
            acquisition,
            writer,
        })),
    }
}

/// The rig orchestrator.
pub struct Orchestrator {
    cameras: Vec<CameraHandle>,
    sync: Option<SyncHandle>,
    ready_timeout: Duration,
    stop_timeout: Duration,
}

impl Orchestrator {
    /// Build and spawn workers for every enabled camera in the config,
    /// plus the sync channel when a sampler is supplied.
    pub fn start(
        cfg: &RigConfig,
        registry: &SourceRegistry,
        sampler: Option<Box<dyn LineSampler>>,
    ) -> CamResult<Self> {
        let mut cameras = Vec::new();
        for camera_cfg in cfg.enabled_cameras() {
            let format = SinkFormat::parse(&camera_cfg.format)
                .map_err(|e| CamError::Config(format!("camera '{}': {e}", camera_cfg.id)))?;
            let source =
                registry.build(&camera_cfg.driver, &camera_cfg.id, camera_cfg.config.clone())?;

            let acq_cfg = AcquisitionConfig {
                camera: camera_cfg.id.clone(),
                trigger: camera_cfg.trigger,
                poll_timeout: Duration::from_millis(camera_cfg.poll_timeout_ms),
                trigger_poll: Duration::from_millis(1),
                max_consecutive_faults: camera_cfg.max_consecutive_faults,
                max_recovery_attempts: camera_cfg.max_recovery_attempts,
                save_on_start: camera_cfg.save,
            };
            let writer_cfg = WriterConfig {
                camera: camera_cfg.id.clone(),
                data_dir: cfg.storage.data_dir.clone(),
                experiment: cfg.storage.experiment.clone(),
                frames_per_file: camera_cfg.frames_per_file,
                format,
            };
            tracing::info!(camera = %camera_cfg.id, driver = %camera_cfg.driver, "starting camera");
            cameras.push(spawn_camera(
                source,
                acq_cfg,
                writer_cfg,
                camera_cfg.queue_capacity,
            ));
        }

        let sync = match (&cfg.sync, sampler) {
            (Some(sync_cfg), Some(sampler)) if sync_cfg.enabled => {
                let (cmd_tx, cmd_rx) = mpsc::channel(32);
                let status = Arc::new(CameraStatus::new(&sync_cfg.id));
                let worker = SyncWorker::new(
                    SyncWorkerConfig {
                        id: sync_cfg.id.clone(),
                        data_dir: cfg.storage.data_dir.clone(),
                        experiment: cfg.storage.experiment.clone(),
                        poll_timeout: Duration::from_millis(100),
                        trigger_poll: Duration::from_millis(1),
                    },
                    sampler,
                    cmd_rx,
                    Arc::clone(&status),
                );
                tracing::info!(sync = %sync_cfg.id, "starting sync channel");
                let task = tokio::task::spawn_blocking(move || worker.run());
                Some(SyncHandle {
                    id: sync_cfg.id.clone(),
                    status,
                    commands: cmd_tx,
                    task: Mutex::new(Some(task)),
                })
            }
            _ => None,
        };

        Ok(Self {
            cameras,
            sync,
            ready_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
        })
    }

    pub fn cameras(&self) -> &[CameraHandle] {
        &self.cameras
    }

    pub fn camera(&self, id: &str) -> Option<&CameraHandle> {
        self.cameras.iter().find(|c| c.id == id)
    }

    /// Status of the sync channel, when one is configured.
    pub fn sync_status(&self) -> Option<&Arc<CameraStatus>> {
        self.sync.as_ref().map(|s| &s.status)
    }

    pub fn set_ready_timeout(&mut self, timeout: Duration) {
        self.ready_timeout = timeout;
    }

    async fn broadcast(&self, cmd: CameraCommand) {
        for camera in &self.cameras {
            camera.send(cmd.clone()).await;
        }
        if let Some(sync) = &self.sync {
            if sync.commands.send(cmd).await.is_err() {
                tracing::warn!(sync = %sync.id, "command dropped; sync worker is gone");
            }
        }
    }

    fn statuses(&self) -> Vec<&Arc<CameraStatus>> {
        let mut all: Vec<&Arc<CameraStatus>> = self.cameras.iter().map(|c| &c.status).collect();
        if let Some(sync) = &self.sync {
            all.push(&sync.status);
        }
        all
    }

    async fn wait_for(
        &self,
        timeout: Duration,
        pred: impl Fn(&CameraStatus) -> bool,
    ) -> Result<(), Vec<String>> {
        let started = tokio::time::Instant::now();
        loop {
            let pending: Vec<String> = self
                .statuses()
                .into_iter()
                .filter(|s| !pred(s.as_ref()))
                .map(|s| s.id().to_string())
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(pending);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Block until every camera (and the sync channel) reports ready.
    ///
    /// Bounded: a camera that failed before reaching ready turns into a
    /// diagnostic naming it, never an indefinite hang.
    pub async fn wait_ready(&self, timeout: Duration) -> CamResult<()> {
        self.wait_for(timeout, CameraStatus::is_ready)
            .await
            .map_err(|cameras| CamError::WaitTimeout {
                waited_ms: timeout.as_millis() as u64,
                cameras,
            })
    }

    /// Broadcast the software start trigger to all cameras at once.
    pub async fn trigger_all(&self) {
        tracing::info!("software trigger broadcast");
        self.broadcast(CameraCommand::Start).await;
    }

    /// Stop all cameras and wait (bounded) until none is capturing.
    pub async fn stop_all(&self) -> CamResult<()> {
        self.broadcast(CameraCommand::Stop).await;
        self.wait_for(self.stop_timeout, |s| !s.is_running())
            .await
            .map_err(|cameras| CamError::WaitTimeout {
                waited_ms: self.stop_timeout.as_millis() as u64,
                cameras,
            })
    }

    pub async fn set_saving_all(&self, enable: bool) {
        self.broadcast(CameraCommand::SetSaving(enable)).await;
    }

    /// The remote `trigger` action: stop everything (closing any open runs
    /// cleanly), re-enable saving, wait for re-arm, trigger.
    pub async fn retrigger(&self) -> CamResult<()> {
        tracing::info!("retrigger requested");
        self.stop_all().await?;
        self.set_saving_all(true).await;
        self.wait_ready(self.ready_timeout).await?;
        self.trigger_all().await;
        Ok(())
    }

    /// Redirect future recordings to a new experiment name. Each worker
    /// stops an in-progress save first, so the change lands between runs.
    pub async fn set_experiment(&self, name: &str) {
        tracing::info!(experiment = %name, "experiment name change");
        self.broadcast(CameraCommand::SetExperiment(name.to_string()))
            .await;
    }

    /// Route a comment line into every open run log.
    pub async fn comment(&self, text: &str) {
        self.broadcast(CameraCommand::Comment(text.to_string())).await;
    }

    /// Generic control update, validated against the camera's declared
    /// specs before it is dispatched to the worker.
    pub async fn set_control(
        &self,
        camera: &str,
        name: &str,
        value: serde_json::Value,
    ) -> CamResult<()> {
        let handle = self
            .camera(camera)
            .ok_or_else(|| CamError::Config(format!("unknown camera '{camera}'")))?;
        handle.controls.coerce(name, &value)?;
        handle
            .send(CameraCommand::SetControl {
                name: name.to_string(),
                value,
            })
            .await;
        Ok(())
    }

    /// Close every worker and collect their exit results.
    pub async fn close(&self) -> CamResult<()> {
        let mut errors = Vec::new();

        for camera in &self.cameras {
            let Some((acquisition, writer)) = camera.shutdown().await else {
                continue;
            };
            if let Err(e) = acquisition {
                errors.push(e);
            }
            match writer {
                Ok(report) => tracing::info!(
                    camera = %camera.id,
                    runs = report.runs_completed,
                    frames = report.frames_written,
                    "writer closed"
                ),
                Err(e) => errors.push(e),
            }
        }

        if let Some(sync) = &self.sync {
            if sync.commands.send(CameraCommand::Close).await.is_err() {
                tracing::warn!(sync = %sync.id, "close command dropped; sync worker is gone");
            }
            if let Some(task) = sync.task.lock().await.take() {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => errors.push(e),
                    Err(e) => {
                        errors.push(CamError::fault(&sync.id, format!("worker panicked: {e}")))
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CamError::Shutdown(errors))
        }
    }
}
