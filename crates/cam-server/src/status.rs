//! Observable per-camera status.
//!
//! Written by the camera's acquisition worker, read by the orchestrator
//! (liveness checks, diagnostics) and the remote endpoint. Each field has
//! a single writer; readers tolerate momentary staleness.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const NO_FRAME: u64 = u64::MAX;

/// Live status of one camera (or the sync channel).
#[derive(Debug)]
pub struct CameraStatus {
    id: String,
    ready: AtomicBool,
    running: AtomicBool,
    saving: AtomicBool,
    frames_acquired: AtomicU64,
    frames_skipped: AtomicU64,
    faults: AtomicU64,
    last_frame_number: AtomicU64,
}

impl CameraStatus {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ready: AtomicBool::new(false),
            running: AtomicBool::new(false),
            saving: AtomicBool::new(false),
            frames_acquired: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            last_frame_number: AtomicU64::new(NO_FRAME),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_saving(&self, saving: bool) {
        self.saving.store(saving, Ordering::SeqCst);
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    pub fn record_frame(&self, frame_number: u64) {
        self.frames_acquired.fetch_add(1, Ordering::SeqCst);
        self.last_frame_number.store(frame_number, Ordering::SeqCst);
    }

    pub fn frames_acquired(&self) -> u64 {
        self.frames_acquired.load(Ordering::SeqCst)
    }

    pub fn add_skipped(&self, missing: u64) {
        self.frames_skipped.fetch_add(missing, Ordering::SeqCst);
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::SeqCst)
    }

    pub fn add_fault(&self) {
        self.faults.fetch_add(1, Ordering::SeqCst);
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::SeqCst)
    }

    /// Last hardware frame counter seen, if any frame arrived yet.
    pub fn last_frame_number(&self) -> Option<u64> {
        match self.last_frame_number.load(Ordering::SeqCst) {
            NO_FRAME => None,
            n => Some(n),
        }
    }
}
