//! Storage layer: frame sinks, run logs and the per-camera writer worker.
//!
//! One [`WriterWorker`] drains one camera's frame queue, batching frames
//! into sequential files rotated by frame count, with a companion plaintext
//! run log recording `frame_id,timestamp` per frame. The sync channel's
//! sample writer ([`line_log::LineLog`]) shares the same `#`-header
//! convention in CSV form.

pub mod line_log;
pub mod run_log;
pub mod sink;
pub mod writer;

pub use line_log::LineLog;
pub use run_log::RunLog;
pub use sink::{FrameSink, RawSink, SinkFormat, TiffSink};
pub use writer::{WriterConfig, WriterReport, WriterWorker};
