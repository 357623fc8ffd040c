use std::sync::{Mutex, MutexGuard};

use camstream_common::frame::EncodedFrame;

/// Single-slot holder for the most recently encoded frame.
///
/// The capture loop overwrites the slot, HTTP readers take cheap clones of
/// whatever is current. A publish stamps the frame with the next sequence
/// number so readers can tell whether they have already seen it.
#[derive(Debug, Default)]
pub struct FrameCell {
    slot: Mutex<Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<EncodedFrame>,
    next_seq: u64,
}

impl FrameCell {
    pub fn new() -> Self {
        Self::default()
    }

    // The slot only ever holds a fully built value, so a panic while the lock
    // was held cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current frame, returning the sequence number assigned.
    pub fn publish(&self, mut frame: EncodedFrame) -> u64 {
        let mut slot = self.lock();
        slot.next_seq += 1;
        frame.seq = slot.next_seq;
        slot.current = Some(frame);
        slot.next_seq
    }

    pub fn read(&self) -> Option<EncodedFrame> {
        self.lock().current.clone()
    }

    pub fn clear(&self) {
        self.lock().current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_until_published() {
        let cell = FrameCell::new();
        assert!(cell.read().is_none());
    }

    #[test]
    fn read_returns_published_frame() {
        let cell = FrameCell::new();
        let seq = cell.publish(EncodedFrame::new(vec![1, 2, 3], 1000));
        let frame = cell.read().unwrap();
        assert_eq!(frame.jpeg.as_ref(), &[1, 2, 3]);
        assert_eq!(frame.captured_at_ms, 1000);
        assert_eq!(frame.seq, seq);
    }

    #[test]
    fn publish_overwrites() {
        let cell = FrameCell::new();
        cell.publish(EncodedFrame::new(vec![1], 1));
        let first = cell.read().unwrap();
        cell.publish(EncodedFrame::new(vec![2], 2));
        let second = cell.read().unwrap();
        assert_eq!(second.jpeg.as_ref(), &[2]);
        assert!(second.seq > first.seq);
        // Earlier copies stay valid.
        assert_eq!(first.jpeg.as_ref(), &[1]);
    }

    #[test]
    fn clear_empties_until_next_publish() {
        let cell = FrameCell::new();
        let before = cell.publish(EncodedFrame::new(vec![1], 1));
        cell.clear();
        assert!(cell.read().is_none());
        assert!(cell.read().is_none());
        let after = cell.publish(EncodedFrame::new(vec![2], 2));
        assert_eq!(cell.read().unwrap().jpeg.as_ref(), &[2]);
        assert!(after > before);
    }

    #[test]
    fn concurrent_readers_never_see_partial_frames() {
        let cell = Arc::new(FrameCell::new());
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 0..500u32 {
                    let byte = (i % 251) as u8;
                    cell.publish(EncodedFrame::new(vec![byte; 64], i as i64));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    let mut last_seq = 0;
                    for _ in 0..500 {
                        if let Some(frame) = cell.read() {
                            let first = frame.jpeg[0];
                            assert!(frame.jpeg.iter().all(|&b| b == first));
                            assert!(frame.seq >= last_seq);
                            last_seq = frame.seq;
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cell.read().unwrap().seq, 500);
    }
}
