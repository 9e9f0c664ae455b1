//! End-to-end pipeline tests: scripted cameras drive real acquisition and
//! writer workers, and assertions land on the files they leave behind.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use cam_core::config::RigConfig;
use cam_core::source::{SourceRegistry, TriggerMode};
use cam_core::CamError;
use cam_driver_mock::{SimCamera, SimCameraFactory, SimEvent, SimLineSampler, SimMode};
use cam_server::acquisition::AcquisitionConfig;
use cam_server::command::CameraCommand;
use cam_server::orchestrator::{spawn_camera, CameraHandle, Orchestrator};
use cam_server::remote;
use cam_storage::sink::SinkFormat;
use cam_storage::writer::WriterConfig;

const WAIT_MS: u64 = 5000;

async fn wait_until(what: &str, f: impl Fn() -> bool) {
    let started = tokio::time::Instant::now();
    while !f() {
        assert!(
            started.elapsed() < Duration::from_millis(WAIT_MS),
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

fn acq_cfg(camera: &str, save_on_start: bool) -> AcquisitionConfig {
    AcquisitionConfig {
        camera: camera.to_string(),
        trigger: TriggerMode::Software,
        poll_timeout: Duration::from_millis(20),
        trigger_poll: Duration::from_millis(1),
        max_consecutive_faults: 5,
        max_recovery_attempts: 2,
        save_on_start,
    }
}

fn writer_cfg(dir: &TempDir, camera: &str, frames_per_file: u64) -> WriterConfig {
    WriterConfig {
        camera: camera.to_string(),
        data_dir: dir.path().to_path_buf(),
        experiment: "exp".to_string(),
        frames_per_file,
        format: SinkFormat::Raw,
    }
}

fn spawn_scripted(
    dir: &TempDir,
    camera: &str,
    save_on_start: bool,
    frames_per_file: u64,
) -> (CameraHandle, cam_driver_mock::SimFeed) {
    let (source, feed) = SimCamera::scripted(camera, 8, 8);
    let handle = spawn_camera(
        Box::new(source),
        acq_cfg(camera, save_on_start),
        writer_cfg(dir, camera, frames_per_file),
        64,
    );
    (handle, feed)
}

fn camlog_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forwards_every_frame_once_in_order() {
    let dir = TempDir::new().unwrap();
    let (handle, feed) = spawn_scripted(&dir, "cam0", true, 100);
    handle.send(CameraCommand::Start).await;

    for id in 1..=20u64 {
        feed.send(SimEvent::Frame(id)).unwrap();
    }
    wait_until("20 frames acquired", || handle.status.frames_acquired() == 20).await;

    let (acq, writer) = handle.shutdown().await.unwrap();
    acq.unwrap();
    let report = writer.unwrap();
    assert_eq!(report.frames_written, 20);
    assert_eq!(report.runs_completed, 1);
    assert_eq!(handle.status.frames_skipped(), 0);

    let lines = camlog_lines(&dir.path().join("exp/cam0/cam0_run000.camlog"));
    let ids: Vec<u64> = lines
        .iter()
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    let expected: Vec<u64> = (1..=20).collect();
    assert_eq!(ids, expected, "no duplicates, no reordering");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_frame_counter_is_forwarded_once() {
    let dir = TempDir::new().unwrap();
    let (handle, feed) = spawn_scripted(&dir, "cam0", true, 100);
    handle.send(CameraCommand::Start).await;

    for id in [1u64, 2, 2, 3] {
        feed.send(SimEvent::Frame(id)).unwrap();
    }
    wait_until("3 distinct frames", || handle.status.frames_acquired() == 3).await;

    let (acq, writer) = handle.shutdown().await.unwrap();
    acq.unwrap();
    let report = writer.unwrap();
    assert_eq!(report.frames_written, 3);
    // A stale buffer repeat is not a skip.
    assert_eq!(handle.status.frames_skipped(), 0);

    let lines = camlog_lines(&dir.path().join("exp/cam0/cam0_run000.camlog"));
    assert_eq!(lines, vec!["1,0.01", "2,0.02", "3,0.03"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn frame_gap_is_counted_not_backfilled() {
    let dir = TempDir::new().unwrap();
    let (handle, feed) = spawn_scripted(&dir, "cam0", true, 100);
    handle.send(CameraCommand::Start).await;

    for id in [1u64, 2, 3, 4, 5, 8, 9] {
        feed.send(SimEvent::Frame(id)).unwrap();
    }
    wait_until("7 frames acquired", || handle.status.frames_acquired() == 7).await;

    let (acq, writer) = handle.shutdown().await.unwrap();
    acq.unwrap();
    let report = writer.unwrap();
    // Frames 6 and 7 were dropped by the hardware: diagnosed, not invented.
    assert_eq!(handle.status.frames_skipped(), 2);
    assert_eq!(report.frames_written, 7);

    let lines = camlog_lines(&dir.path().join("exp/cam0/cam0_run000.camlog"));
    let ids: Vec<u64> = lines
        .iter()
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 8, 9]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn save_toggle_opens_one_run_and_emits_one_stop() {
    let dir = TempDir::new().unwrap();
    // frames_per_file=2 so the 5 saved frames also exercise rotation.
    let (handle, feed) = spawn_scripted(&dir, "cam0", false, 2);
    handle.send(CameraCommand::Start).await;

    // Saving disabled: frames flow but nothing is written.
    for id in 1..=3u64 {
        feed.send(SimEvent::Frame(id)).unwrap();
    }
    wait_until("3 unsaved frames", || handle.status.frames_acquired() == 3).await;

    handle.send(CameraCommand::SetSaving(true)).await;
    wait_until("saving enabled", || handle.status.is_saving()).await;
    for id in 4..=8u64 {
        feed.send(SimEvent::Frame(id)).unwrap();
    }
    wait_until("8 frames acquired", || handle.status.frames_acquired() == 8).await;

    handle.send(CameraCommand::SetSaving(false)).await;
    wait_until("saving disabled", || !handle.status.is_saving()).await;
    for id in 9..=10u64 {
        feed.send(SimEvent::Frame(id)).unwrap();
    }
    wait_until("10 frames acquired", || handle.status.frames_acquired() == 10).await;

    let (acq, writer) = handle.shutdown().await.unwrap();
    acq.unwrap();
    let report = writer.unwrap();
    assert_eq!(report.runs_completed, 1, "exactly one run opened");
    assert_eq!(report.frames_written, 5, "only frames delivered while saving");
    assert_eq!(report.files_written, 3, "rotation at 2 frames per file");

    let run_dir = dir.path().join("exp/cam0");
    let log = std::fs::read_to_string(run_dir.join("cam0_run000.camlog")).unwrap();
    assert!(log.contains("# Closed run after 5 frame(s) in 3 file(s)."));
    assert_eq!(
        camlog_lines(&run_dir.join("cam0_run000.camlog")),
        vec!["4,0.04", "5,0.05", "6,0.06", "7,0.07", "8,0.08"]
    );
    assert!(!run_dir.join("cam0_run001.camlog").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_faults_recover_then_escalate() {
    let dir = TempDir::new().unwrap();
    let (source, feed) = SimCamera::scripted("cam0", 8, 8);
    let mut cfg = acq_cfg("cam0", false);
    cfg.max_consecutive_faults = 2;
    cfg.max_recovery_attempts = 1;
    let handle = spawn_camera(Box::new(source), cfg, writer_cfg(&dir, "cam0", 10), 64);
    handle.send(CameraCommand::Start).await;

    // One fault, then a good frame: the consecutive counter resets.
    feed.send(SimEvent::Fault("bus glitch".into())).unwrap();
    wait_until("first fault", || handle.status.faults() == 1).await;
    feed.send(SimEvent::Frame(1)).unwrap();
    wait_until("frame after fault", || handle.status.frames_acquired() == 1).await;

    // Two consecutive faults: the worker recovers by stop/close/reopen.
    feed.send(SimEvent::Fault("bus glitch".into())).unwrap();
    feed.send(SimEvent::Fault("bus glitch".into())).unwrap();
    wait_until("recovery faults", || handle.status.faults() == 3).await;
    feed.send(SimEvent::Frame(2)).unwrap();
    wait_until("frame after recovery", || {
        handle.status.frames_acquired() == 2
    })
    .await;

    // Two more consecutive faults: recovery budget spent, fatal exit.
    feed.send(SimEvent::Fault("bus glitch".into())).unwrap();
    feed.send(SimEvent::Fault("bus glitch".into())).unwrap();
    wait_until("fatal exit clears ready", || !handle.status.is_ready()).await;

    let (acq, writer) = handle.shutdown().await.unwrap();
    let err = acq.unwrap_err();
    assert!(matches!(err, CamError::Fault { .. }));
    assert!(!handle.status.is_running());
    writer.unwrap();
}

fn sim_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(SimCameraFactory));
    registry
}

fn rig_toml(dir: &TempDir, body: &str) -> RigConfig {
    let text = format!(
        "[storage]\ndata_dir = '{}'\nexperiment = \"exp\"\n{body}",
        dir.path().display()
    );
    RigConfig::from_toml(&text).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_ready_names_the_camera_that_failed() {
    let dir = TempDir::new().unwrap();
    let cfg = rig_toml(
        &dir,
        r#"
        [[cameras]]
        id = "good"
        driver = "sim"
        poll_timeout_ms = 20
        [cameras.config]
        width = 8
        height = 8

        [[cameras]]
        id = "bad"
        driver = "sim"
        poll_timeout_ms = 20
        [cameras.config]
        fail_open = true
        "#,
    );
    let registry = sim_registry();
    let orchestrator = Orchestrator::start(&cfg, &registry, None).unwrap();

    let err = orchestrator
        .wait_ready(Duration::from_millis(300))
        .await
        .unwrap_err();
    match err {
        CamError::WaitTimeout { cameras, .. } => assert_eq!(cameras, vec!["bad".to_string()]),
        other => panic!("expected WaitTimeout, got {other}"),
    }

    // The failed camera surfaces its device error at shutdown.
    let err = orchestrator.close().await.unwrap_err();
    match err {
        CamError::Shutdown(errors) => {
            assert!(errors.iter().any(|e| matches!(e, CamError::Device { .. })))
        }
        other => panic!("expected Shutdown, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_trigger_closes_current_run_before_starting_next() {
    let dir = TempDir::new().unwrap();
    let cfg = rig_toml(
        &dir,
        r#"
        [[cameras]]
        id = "cam0"
        driver = "sim"
        save = true
        poll_timeout_ms = 20
        frames_per_file = 1000
        format = "raw"
        [cameras.config]
        width = 16
        height = 16
        realistic = true
        frame_interval_ms = 1
        "#,
    );
    let registry = sim_registry();
    let orchestrator = Arc::new(Orchestrator::start(&cfg, &registry, None).unwrap());
    orchestrator.wait_ready(Duration::from_secs(5)).await.unwrap();
    orchestrator.trigger_all().await;

    let status = Arc::clone(&orchestrator.camera("cam0").unwrap().status);
    wait_until("first run frames", || status.frames_acquired() >= 5).await;

    // Remote trigger over the JSON endpoint.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(remote::serve(listener, Arc::clone(&orchestrator)));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"{\"action\": \"trigger\"}\n")
        .await
        .unwrap();
    let (reader, _) = stream.split();
    let mut lines = BufReader::new(reader).lines();
    let reply = lines.next_line().await.unwrap().unwrap();
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["action"], "handshake");
    assert_eq!(reply["ok"], true);

    let after_trigger = status.frames_acquired();
    wait_until("second run frames", || {
        status.frames_acquired() >= after_trigger + 5
    })
    .await;
    orchestrator.close().await.unwrap();

    let run_dir = dir.path().join("exp/cam0");
    let run0 = std::fs::read_to_string(run_dir.join("cam0_run000.camlog")).unwrap();
    assert!(
        run0.contains("# Closed run after"),
        "previous run closed cleanly before the next started"
    );
    let run1_lines = camlog_lines(&run_dir.join("cam0_run001.camlog"));
    assert!(!run1_lines.is_empty(), "new run recorded frames");

    // Fresh file for the new run, no truncated leftovers from run 0.
    let run0_frames: u64 = camlog_lines(&run_dir.join("cam0_run000.camlog")).len() as u64;
    let frame_bytes = 16 * 16 * 2;
    let run0_bytes: u64 = std::fs::read_dir(&run_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("cam0_run000_"))
        .map(|e| e.metadata().unwrap().len())
        .sum();
    assert_eq!(run0_bytes, run0_frames * frame_bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_protocol_acknowledges_every_request() {
    let dir = TempDir::new().unwrap();
    let cfg = rig_toml(&dir, "");
    let registry = sim_registry();
    let orchestrator = Arc::new(Orchestrator::start(&cfg, &registry, None).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(remote::serve(listener, Arc::clone(&orchestrator)));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let reply = roundtrip(&mut writer, &mut lines, "{\"action\": \"ping\"}").await;
    assert_eq!(reply["ok"], true);

    let reply = roundtrip(
        &mut writer,
        &mut lines,
        "{\"action\": \"expName\", \"value\": \"mouse12\"}",
    )
    .await;
    assert_eq!(reply["ok"], true);

    let reply = roundtrip(&mut writer, &mut lines, "{\"action\": \"expName\"}").await;
    assert_eq!(reply["ok"], false);

    let reply = roundtrip(&mut writer, &mut lines, "{\"action\": \"warp\"}").await;
    assert_eq!(reply["ok"], false);
    assert!(reply["error"].as_str().unwrap().contains("unknown action"));

    let reply = roundtrip(&mut writer, &mut lines, "this is not json").await;
    assert_eq!(reply["ok"], false);
}

async fn roundtrip(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    request: &str,
) -> serde_json::Value {
    writer
        .write_all(format!("{request}\n").as_bytes())
        .await
        .unwrap();
    let reply = lines.next_line().await.unwrap().unwrap();
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_channel_records_samples_with_the_same_protocol() {
    let dir = TempDir::new().unwrap();
    let cfg = rig_toml(
        &dir,
        r#"
        [sync]
        id = "nidaq"
        sample_rate_hz = 1000.0
        channels = ["di0", "ai0"]
        "#,
    );
    let registry = sim_registry();
    let sampler = SimLineSampler::builder("nidaq")
        .sample_rate_hz(1000.0)
        .channels(vec!["di0".into(), "ai0".into()])
        .mode(SimMode::Instant)
        .sample_limit(50)
        .build();
    let orchestrator = Orchestrator::start(&cfg, &registry, Some(Box::new(sampler))).unwrap();

    orchestrator.wait_ready(Duration::from_secs(5)).await.unwrap();
    orchestrator.set_saving_all(true).await;
    orchestrator.trigger_all().await;

    let status = Arc::clone(orchestrator.sync_status().unwrap());
    wait_until("50 samples", || status.frames_acquired() >= 50).await;
    orchestrator.stop_all().await.unwrap();
    orchestrator.close().await.unwrap();

    let text = std::fs::read_to_string(dir.path().join("exp/nidaq/nidaq_run000.csv")).unwrap();
    let data_rows: Vec<&str> = text
        .lines()
        .filter(|l| !l.starts_with('#'))
        .skip(1) // column header
        .collect();
    assert_eq!(data_rows.len(), 50);
    assert!(data_rows[0].starts_with("1,0.001,"));
}
