//! Bounded, lossy progress reporting from download workers to a UI consumer.
//!
//! Grounded in spec.md §4.8: high-frequency per-chunk byte counters must
//! never block a download worker on a slow consumer, so the channel is a
//! small fixed-capacity `tokio::sync::mpsc` and a full channel means the
//! update is dropped rather than awaited.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

use crate::download::hls::indeterminate_progress_percent;

/// Default channel capacity. Small: a consumer that can't keep up with this
/// many in-flight updates should be dropping updates, not backpressuring
/// the network I/O that produced them.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A single progress update for one download task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub task_id: u64,
    pub bytes_downloaded: u64,
    pub content_length: Option<u64>,
    pub percent: Option<f32>,
}

impl ProgressEvent {
    #[must_use]
    fn new(task_id: u64, bytes_downloaded: u64, content_length: Option<u64>) -> Self {
        let percent = match content_length {
            Some(total) if total > 0 => {
                #[allow(clippy::cast_precision_loss)]
                Some((bytes_downloaded as f64 / total as f64 * 100.0) as f32)
            }
            Some(_) => Some(100.0),
            None => {
                let megabytes = bytes_downloaded as f64 / 1_048_576.0;
                Some(indeterminate_progress_percent(megabytes))
            }
        };

        Self {
            task_id,
            bytes_downloaded,
            content_length,
            percent,
        }
    }
}

/// Producer handle held by download workers.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    inner: Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Reports progress for `task_id`. Never blocks; drops the update and
    /// logs at `trace` if the channel is full.
    pub fn report(&self, task_id: u64, bytes_downloaded: u64, content_length: Option<u64>) {
        let event = ProgressEvent::new(task_id, bytes_downloaded, content_length);
        match self.inner.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!(task_id, "progress channel full, dropping update");
            }
            Err(TrySendError::Closed(_)) => {
                trace!(task_id, "progress channel closed, dropping update");
            }
        }
    }
}

/// Creates a bounded progress channel.
#[must_use]
pub fn channel(capacity: usize) -> (ProgressSender, Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ProgressSender { inner: tx }, rx)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_exact_percent() {
        let event = ProgressEvent::new(1, 50, Some(200));
        assert!((event.percent.unwrap() - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_progress_event_indeterminate_percent() {
        let event = ProgressEvent::new(1, 10 * 1_048_576, None);
        assert!((event.percent.unwrap() - 20.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_sender_drops_update_when_channel_full() {
        let (tx, mut rx) = channel(1);
        tx.report(1, 10, None);
        tx.report(1, 20, None);
        tx.report(1, 30, None);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.bytes_downloaded, 10);
        // The second and third reports raced for the one remaining slot;
        // at most one more event should be queued.
        assert!(rx.try_recv().is_ok() || rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sender_delivers_when_channel_has_room() {
        let (tx, mut rx) = channel(DEFAULT_CHANNEL_CAPACITY);
        tx.report(7, 100, Some(1000));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, 7);
        assert_eq!(event.bytes_downloaded, 100);
    }
}
