//! Pluggable frame sinks.
//!
//! A [`FrameSink`] is one open output file. The writer worker opens a new
//! sink at every rotation boundary and appends frames until the next one.
//! Two formats ship here: multi-page TIFF stacks and raw append-only
//! binary. Video-container streaming is an external backend implementing
//! the same trait.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tiff::encoder::{colortype, TiffEncoder};

use cam_core::Frame;

/// One open output file accepting frames.
pub trait FrameSink: Send {
    /// Append one frame.
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and finalize the file. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// On-disk format of a camera's writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkFormat {
    /// Multi-page grayscale TIFF stack, one page per frame.
    #[default]
    Tiff,
    /// Raw append-only little-endian pixel data; the frame geometry is
    /// carried in the file name.
    Raw,
}

impl SinkFormat {
    /// Parse a config string.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "tiff" | "tif" => Ok(Self::Tiff),
            "raw" | "binary" => Ok(Self::Raw),
            other => bail!("unknown sink format '{other}' (expected 'tiff' or 'raw')"),
        }
    }

    /// File name for one rotation chunk.
    ///
    /// Raw files carry the `{width}_{height}` suffix so readers can
    /// reshape the stream without side metadata.
    pub fn file_name(&self, camera: &str, run: u64, file_index: u64, first: &Frame) -> String {
        match self {
            SinkFormat::Tiff => format!("{camera}_run{run:03}_{file_index:05}.tif"),
            SinkFormat::Raw => format!(
                "{camera}_run{run:03}_{file_index:05}_{}_{}.dat",
                first.width, first.height
            ),
        }
    }

    /// Open a sink file at `path`, sized for frames shaped like `first`.
    pub fn open(&self, path: &Path, first: &Frame) -> Result<Box<dyn FrameSink>> {
        match self {
            SinkFormat::Tiff => Ok(Box::new(TiffSink::create(path, first)?)),
            SinkFormat::Raw => Ok(Box::new(RawSink::create(path, first)?)),
        }
    }
}

// =============================================================================
// TIFF
// =============================================================================

/// Multi-page grayscale TIFF stack.
pub struct TiffSink {
    path: PathBuf,
    encoder: Option<TiffEncoder<BufWriter<File>>>,
}

impl TiffSink {
    pub fn create(path: &Path, first: &Frame) -> Result<Self> {
        if !matches!(first.bit_depth, 8 | 16) {
            bail!("TIFF sink supports 8/16-bit frames, got {}-bit", first.bit_depth);
        }
        let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
        let encoder = TiffEncoder::new(BufWriter::new(file))
            .with_context(|| format!("failed to start TIFF encoder for {path:?}"))?;
        Ok(Self {
            path: path.to_path_buf(),
            encoder: Some(encoder),
        })
    }
}

impl FrameSink for TiffSink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| anyhow!("TIFF sink {:?} already closed", self.path))?;
        match frame.bit_depth {
            16 => {
                let pixels = frame.to_u16_vec();
                encoder
                    .write_image::<colortype::Gray16>(frame.width, frame.height, &pixels)
                    .with_context(|| format!("failed to encode page into {:?}", self.path))?;
            }
            8 => {
                encoder
                    .write_image::<colortype::Gray8>(frame.width, frame.height, &frame.data)
                    .with_context(|| format!("failed to encode page into {:?}", self.path))?;
            }
            other => bail!("TIFF sink cannot encode {other}-bit frames"),
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the encoder finalizes the last IFD and flushes.
        self.encoder.take();
        Ok(())
    }
}

// =============================================================================
// Raw binary
// =============================================================================

/// Raw append-only pixel data.
pub struct RawSink {
    path: PathBuf,
    expected_len: usize,
    file: Option<BufWriter<File>>,
}

impl RawSink {
    pub fn create(path: &Path, first: &Frame) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("failed to create {path:?}"))?;
        Ok(Self {
            path: path.to_path_buf(),
            expected_len: first.expected_len(),
            file: Some(BufWriter::new(file)),
        })
    }
}

impl FrameSink for RawSink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.data.len() != self.expected_len {
            bail!(
                "frame size mismatch in {:?}: expected {} bytes, got {}",
                self.path,
                self.expected_len,
                frame.data.len()
            );
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("raw sink {:?} already closed", self.path))?;
        file.write_all(&frame.data)
            .with_context(|| format!("failed to append frame to {:?}", self.path))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .with_context(|| format!("failed to flush {:?}", self.path))?;
        }
        Ok(())
    }
}
