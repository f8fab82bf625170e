//! Playback drain
//!
//! FIFO of smoothed output samples between frame-sized production and
//! block-sized consumption. Owned by the audio thread.
//!
//! Policy:
//! - Underrun (fewer than N buffered): emit what is there, fill the rest of the
//!   block from the raw input of the same tick. Never silence.
//! - Overrun (a frame does not fit under the cap): drop the oldest unread
//!   samples so latency stays bounded.

use ringbuf::{traits::*, HeapRb};

/// Bounded FIFO with drop-oldest overrun and raw-fill underrun handling
pub struct PlaybackDrain {
    fifo: HeapRb<f32>,
}

impl PlaybackDrain {
    /// `capacity` is the cap in samples (at least one engine frame)
    pub fn new(capacity: usize) -> Self {
        Self {
            fifo: HeapRb::new(capacity.max(1)),
        }
    }

    /// Queue a processed frame
    ///
    /// Returns the number of samples dropped to make room (0 = no overrun).
    pub fn push_frame(&mut self, frame: &[f32]) -> usize {
        let capacity = self.capacity();

        // A frame larger than the whole FIFO keeps only its newest samples
        if frame.len() > capacity {
            let excess = frame.len() - capacity;
            let dropped = excess + self.fifo.clear();
            self.fifo.push_slice(&frame[excess..]);
            return dropped;
        }

        let vacant = self.fifo.vacant_len();
        let dropped = if frame.len() > vacant {
            self.fifo.skip(frame.len() - vacant)
        } else {
            0
        };
        self.fifo.push_slice(frame);
        dropped
    }

    /// Fill `out` with the next `out.len()` samples
    ///
    /// `raw_input` is the unprocessed input block of this tick and must be at
    /// least as long as `out`. Returns true on underrun.
    pub fn drain_into(&mut self, out: &mut [f32], raw_input: &[f32]) -> bool {
        let got = self.fifo.pop_slice(out);
        if got == out.len() {
            return false;
        }
        let end = out.len().min(raw_input.len());
        if got < end {
            out[got..end].copy_from_slice(&raw_input[got..end]);
        }
        for sample in out[end.max(got)..].iter_mut() {
            *sample = 0.0;
        }
        true
    }

    /// Samples currently buffered
    pub fn buffered(&self) -> usize {
        self.fifo.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.fifo.capacity().get()
    }

    pub fn clear(&mut self) {
        self.fifo.clear();
    }
}
