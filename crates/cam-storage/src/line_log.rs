//! CSV writer for the synchronization channel.
//!
//! Same `#`-header convention as the camera run logs, followed by a CSV
//! body with one row per sample: `sample,timestamp,<channel...>`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use cam_core::sync::{LineInfo, LineSample};

/// An open sync-channel sample log.
pub struct LineLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl LineLog {
    pub fn create(path: &Path, info: &LineInfo, run_index: u64) -> Result<Self> {
        let mut file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
        writeln!(file, "# Sync: {}", info.name)
            .and_then(|_| writeln!(file, "# Date: {}", chrono::Local::now().to_rfc3339()))
            .and_then(|_| writeln!(file, "# Run: {run_index}"))
            .and_then(|_| writeln!(file, "# Sample rate (Hz): {}", info.sample_rate_hz))
            .with_context(|| format!("failed to write header to {path:?}"))?;

        let mut writer = csv::Writer::from_writer(file);
        let mut header = vec!["sample".to_string(), "timestamp".to_string()];
        header.extend(info.channels.iter().cloned());
        writer
            .write_record(&header)
            .with_context(|| format!("failed to write column header to {path:?}"))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn append(&mut self, sample: &LineSample) -> Result<()> {
        let mut record = vec![
            sample.sample_number.to_string(),
            sample.timestamp.to_string(),
        ];
        record.extend(sample.values.iter().map(f64::to_string));
        self.writer
            .write_record(&record)
            .with_context(|| format!("failed to append to {:?}", self.path))?;
        self.rows += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {:?}", self.path))?;
        Ok(())
    }
}
