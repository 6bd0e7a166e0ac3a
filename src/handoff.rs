//! Single-ownership frame transfer from decode workers to the rendering thread.
//!
//! Workers move each decoded [`Frame`] into the channel and keep nothing; the
//! rendering thread drains the inbox between paint ticks and becomes the sole
//! owner. No pixel buffer is ever shared.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::debug;

use crate::error::Error;
use crate::frame::{DisplayId, Frame};

/// A decoded frame addressed to one display.
#[derive(Debug)]
pub struct FrameDelivery {
    pub display: DisplayId,
    pub frame: Frame,
}

/// Worker-side handle. Cheap to clone, `Send`.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: Sender<FrameDelivery>,
}

/// Rendering-thread side of the handoff.
#[derive(Debug)]
pub struct FrameInbox {
    rx: Receiver<FrameDelivery>,
}

/// Creates a bounded handoff channel. A capacity of zero is raised to one.
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameInbox) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (FrameSender { tx }, FrameInbox { rx })
}

impl FrameSender {
    /// Blocks until the inbox has room.
    ///
    /// # Errors
    /// Returns [`Error::HandoffClosed`] once the inbox has been dropped.
    pub fn send(&self, display: DisplayId, frame: Frame) -> Result<(), Error> {
        self.tx
            .send(FrameDelivery { display, frame })
            .map_err(|_| Error::HandoffClosed)
    }

    /// Non-blocking send. A full inbox hands the frame back to the caller.
    pub fn try_send(&self, display: DisplayId, frame: Frame) -> Result<(), Frame> {
        match self.tx.try_send(FrameDelivery { display, frame }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(delivery) | TrySendError::Disconnected(delivery)) => {
                Err(delivery.frame)
            }
        }
    }
}

impl FrameInbox {
    /// Takes the next delivery without blocking.
    pub fn try_take(&self) -> Option<FrameDelivery> {
        match self.rx.try_recv() {
            Ok(delivery) => Some(delivery),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Takes everything queued right now. Never blocks.
    pub fn drain(&self) -> Vec<FrameDelivery> {
        let deliveries: Vec<_> = self.rx.try_iter().collect();
        if !deliveries.is_empty() {
            debug!(count = deliveries.len(), "frame_handoff_drained");
        }
        deliveries
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameSize, PixelFormat};

    #[test]
    fn worker_thread_hands_frames_to_inbox() {
        let (tx, inbox) = frame_channel(4);
        let worker = std::thread::spawn(move || {
            for shade in [10u8, 20, 30] {
                let frame =
                    Frame::solid(FrameSize::new(2, 2), PixelFormat::Rgba8, [shade, 0, 0, 255]);
                tx.send(DisplayId(1), frame).unwrap();
            }
        });
        worker.join().unwrap();

        let delivered = inbox.drain();
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[2].frame.pixels()[0], 30);
        assert!(delivered.iter().all(|d| d.display == DisplayId(1)));
        assert_eq!(inbox.pending(), 0);
    }

    #[test]
    fn full_inbox_returns_frame_to_worker() {
        let (tx, _inbox) = frame_channel(1);
        let frame = Frame::solid(FrameSize::new(1, 1), PixelFormat::Rgba8, [1, 1, 1, 1]);
        tx.try_send(DisplayId(0), frame.clone()).unwrap();
        let back = tx.try_send(DisplayId(0), frame).unwrap_err();
        assert_eq!(back.pixels(), &[1, 1, 1, 1]);
    }

    #[test]
    fn send_after_inbox_dropped_reports_closed() {
        let (tx, inbox) = frame_channel(1);
        drop(inbox);
        let frame = Frame::solid(FrameSize::new(1, 1), PixelFormat::Rgba8, [0; 4]);
        assert!(matches!(tx.send(DisplayId(0), frame), Err(Error::HandoffClosed)));
    }
}
