//! Companion run log.
//!
//! One plaintext log per run per camera. Header lines begin with `#`; the
//! body is `frame_id,timestamp` CSV. The trailer records how the run
//! closed, so a log without one marks an interrupted recording.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// An open run log.
pub struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: u64,
}

impl RunLog {
    /// Create the log and write its header. The header must exist on disk
    /// before any frame of the run is written.
    pub fn create(path: &Path, camera: &str, run_index: u64) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# Camera: {camera}")
            .and_then(|_| writeln!(writer, "# Date: {}", chrono::Local::now().to_rfc3339()))
            .and_then(|_| writeln!(writer, "# Run: {run_index}"))
            .and_then(|_| writeln!(writer, "# Log header: frame_id,timestamp"))
            .with_context(|| format!("failed to write header to {path:?}"))?;
        writer
            .flush()
            .with_context(|| format!("failed to flush header to {path:?}"))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Append one frame record.
    pub fn append(&mut self, frame_id: u64, timestamp: f64) -> Result<()> {
        writeln!(self.writer, "{frame_id},{timestamp}")
            .with_context(|| format!("failed to append to {:?}", self.path))?;
        self.lines += 1;
        Ok(())
    }

    /// Route a comment into the log as a `#`-prefixed line.
    pub fn comment(&mut self, text: &str) -> Result<()> {
        let text = text.trim_end();
        if text.starts_with('#') {
            writeln!(self.writer, "{text}")
        } else {
            writeln!(self.writer, "# {text}")
        }
        .with_context(|| format!("failed to append comment to {:?}", self.path))?;
        Ok(())
    }

    /// Write the trailer and flush.
    pub fn close(mut self, frames: u64, files: u64) -> Result<()> {
        writeln!(
            self.writer,
            "# Closed run after {frames} frame(s) in {files} file(s)."
        )
        .and_then(|_| self.writer.flush())
        .with_context(|| format!("failed to close {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn header_body_trailer_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cam0_run000.camlog");
        let mut log = RunLog::create(&path, "cam0", 0).unwrap();
        log.append(1, 0.01).unwrap();
        log.comment("stimulus on").unwrap();
        log.append(2, 0.02).unwrap();
        assert_eq!(log.lines(), 2);
        log.close(2, 1).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# Camera: cam0");
        assert!(lines[1].starts_with("# Date: "));
        assert_eq!(lines[2], "# Run: 0");
        assert_eq!(lines[3], "# Log header: frame_id,timestamp");
        assert_eq!(lines[4], "1,0.01");
        assert_eq!(lines[5], "# stimulus on");
        assert_eq!(lines[6], "2,0.02");
        assert!(lines[7].starts_with("# Closed run after 2 frame(s)"));
    }

    #[test]
    fn comments_keep_existing_hash_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let mut log = RunLog::create(&path, "c", 0).unwrap();
        log.comment("# already prefixed").unwrap();
        log.close(0, 0).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n# already prefixed\n"));
        assert!(!text.contains("# # already"));
    }
}
