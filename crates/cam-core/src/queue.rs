//! Frame queue protocol between acquisition and writer workers.
//!
//! Each camera gets one bounded channel: one producer (the acquisition
//! worker's camera thread) and one consumer (the writer worker). Besides
//! frames, the channel carries control sentinels as explicit enum variants
//! rather than magic string payloads.
//!
//! The channel is bounded: when the writer falls behind (slow disk), the
//! acquisition side blocks on `blocking_send` instead of growing memory
//! without bound. The capacity is per-camera configuration.

use tokio::sync::mpsc;

use crate::data::Frame;

/// Default per-camera queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// One element of a camera's frame queue.
#[derive(Debug)]
pub enum QueueItem {
    /// A frame to persist.
    Frame(Frame),

    /// Close the current writer run: flush and close the open file and run
    /// log, increment the run counter. The writer stays alive and waits
    /// for the next save cycle.
    Stop,

    /// A comment routed into the run log as a `#`-prefixed line.
    Comment(String),

    /// Redirect future writes to a new experiment name. Applies from the
    /// next run; the orchestrator stops any in-progress save first.
    SetExperiment(String),
}

/// Create a camera's bounded frame channel.
pub fn frame_channel(capacity: usize) -> (mpsc::Sender<QueueItem>, mpsc::Receiver<QueueItem>) {
    mpsc::channel(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_bounded_and_ordered() {
        let (tx, mut rx) = frame_channel(4);
        tx.blocking_send(QueueItem::Comment("first".into())).unwrap();
        tx.blocking_send(QueueItem::Stop).unwrap();
        drop(tx);

        assert!(matches!(rx.blocking_recv(), Some(QueueItem::Comment(_))));
        assert!(matches!(rx.blocking_recv(), Some(QueueItem::Stop)));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (tx, _rx) = frame_channel(0);
        assert!(tx.capacity() >= 1);
    }
}
