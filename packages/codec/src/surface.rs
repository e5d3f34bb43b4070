//! Producer endpoint feeding raw frames into a video session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use crate::VideoFrame;

/// Handle a frame producer uses to push frames into an encoder.
///
/// Submitting never blocks: when the encoder is behind, the frame is dropped
/// and counted, the way a compositor drops frames for a slow consumer.
#[derive(Debug, Clone)]
pub struct InputSurface {
    tx: SyncSender<VideoFrame>,
    dropped: Arc<AtomicU64>,
}

impl InputSurface {
    /// Create a surface and the receiving end the encoder reads from.
    ///
    /// `depth` is the number of frames that may wait for the encoder.
    pub fn channel(depth: usize) -> (Self, Receiver<VideoFrame>) {
        let (tx, rx) = mpsc::sync_channel(depth.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queue a frame for encoding.
    ///
    /// Returns `false` once the encoder side has gone away.
    pub fn submit(&self, frame: VideoFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Frames dropped because the encoder was not keeping up.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_drops_when_full() {
        let (surface, rx) = InputSurface::channel(1);
        assert!(surface.submit(VideoFrame::from_rgb(1, 1, vec![0; 3], 1)));
        assert!(surface.submit(VideoFrame::from_rgb(1, 1, vec![0; 3], 2)));
        assert_eq!(surface.dropped_frames(), 1);
        assert_eq!(rx.recv().unwrap().pts_us, 1);

        drop(rx);
        assert!(!surface.submit(VideoFrame::from_rgb(1, 1, vec![0; 3], 3)));
    }
}
