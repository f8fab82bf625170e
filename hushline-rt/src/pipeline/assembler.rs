//! Frame assembler
//!
//! Turns host blocks of arbitrary length into engine frames of exactly
//! `frame_length` samples. Samples accumulate in a pre-sized buffer; each full
//! frame is copied out and the remainder shifted to the front.
//!
//! The buffer is sized for `frame_length + max_block` up front. It only grows
//! when a single block overflows the remaining space, so once warmed up for the
//! host's block size the audio thread never allocates here.

/// Accumulates samples and emits fixed-length frames
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<f32>,
    filled: usize,
    frame_length: usize,
    /// Number of times the accumulation buffer had to grow
    growths: u32,
}

impl FrameAssembler {
    /// # Arguments
    /// * `frame_length` - Engine frame length (samples)
    /// * `max_block` - Largest host block expected between two drains
    pub fn new(frame_length: usize, max_block: usize) -> Self {
        Self {
            buffer: vec![0.0; frame_length + max_block],
            filled: 0,
            frame_length,
            growths: 0,
        }
    }

    /// Append a host block
    pub fn push(&mut self, samples: &[f32]) {
        let needed = self.filled + samples.len();
        if needed > self.buffer.len() {
            let grown = (self.buffer.len() * 2).max(needed);
            self.buffer.resize(grown, 0.0);
            self.growths += 1;
        }
        self.buffer[self.filled..needed].copy_from_slice(samples);
        self.filled = needed;
    }

    /// Copy the next complete frame into `out`
    ///
    /// Returns false, leaving the buffer untouched, when fewer than
    /// `frame_length` samples are buffered or `out` has the wrong length.
    pub fn pop_frame(&mut self, out: &mut [f32]) -> bool {
        if out.len() != self.frame_length || self.filled < self.frame_length {
            return false;
        }
        out.copy_from_slice(&self.buffer[..self.frame_length]);
        self.buffer.copy_within(self.frame_length..self.filled, 0);
        self.filled -= self.frame_length;
        true
    }

    /// Samples waiting for a full frame
    pub fn buffered(&self) -> usize {
        self.filled
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn growths(&self) -> u32 {
        self.growths
    }

    /// Discard buffered samples (capacity is kept)
    pub fn clear(&mut self) {
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    fn drain_frames(assembler: &mut FrameAssembler, frames: &mut Vec<Vec<f32>>) {
        let mut frame = vec![0.0; assembler.frame_length()];
        while assembler.pop_frame(&mut frame) {
            frames.push(frame.clone());
        }
    }

    #[test]
    fn test_chunk_invariance() {
        let input = ramp(2000);

        let mut one_at_a_time = FrameAssembler::new(480, 1);
        let mut frames_a = Vec::new();
        for sample in &input {
            one_at_a_time.push(std::slice::from_ref(sample));
            drain_frames(&mut one_at_a_time, &mut frames_a);
        }

        let mut all_at_once = FrameAssembler::new(480, 2000);
        let mut frames_b = Vec::new();
        all_at_once.push(&input);
        drain_frames(&mut all_at_once, &mut frames_b);

        let mut blocks_of_128 = FrameAssembler::new(480, 128);
        let mut frames_c = Vec::new();
        for block in input.chunks(128) {
            blocks_of_128.push(block);
            drain_frames(&mut blocks_of_128, &mut frames_c);
        }

        assert_eq!(frames_a.len(), 4);
        assert_eq!(frames_a, frames_b);
        assert_eq!(frames_a, frames_c);
        assert_eq!(one_at_a_time.buffered(), 2000 - 4 * 480);
        assert_eq!(frames_a[1][0], 480.0);
    }

    #[test]
    fn test_never_emits_partial_frame() {
        let mut assembler = FrameAssembler::new(480, 128);
        let mut frame = vec![0.0; 480];

        for _ in 0..3 {
            assembler.push(&[0.5; 128]);
            assert!(!assembler.pop_frame(&mut frame));
        }
        assert_eq!(assembler.buffered(), 384);

        assembler.push(&[0.5; 128]);
        assert!(assembler.pop_frame(&mut frame));
        assert_eq!(assembler.buffered(), 32);
        assert!(!assembler.pop_frame(&mut frame));
    }

    #[test]
    fn test_no_growth_within_presized_block() {
        let mut assembler = FrameAssembler::new(480, 128);
        let mut frame = vec![0.0; 480];

        for _ in 0..100 {
            assembler.push(&[0.1; 128]);
            while assembler.pop_frame(&mut frame) {}
        }
        assert_eq!(assembler.growths(), 0);
    }

    #[test]
    fn test_oversized_block_grows_geometrically() {
        let mut assembler = FrameAssembler::new(4, 4);
        assembler.push(&ramp(20));
        assert_eq!(assembler.growths(), 1);
        assert_eq!(assembler.buffered(), 20);

        let mut frame = vec![0.0; 4];
        let mut count = 0;
        while assembler.pop_frame(&mut frame) {
            count += 1;
        }
        assert_eq!(count, 5);
        assert_eq!(frame, vec![16.0, 17.0, 18.0, 19.0]);
    }

    #[test]
    fn test_wrong_output_length_rejected() {
        let mut assembler = FrameAssembler::new(4, 4);
        assembler.push(&[1.0; 8]);
        let mut short = [0.0; 3];
        assert!(!assembler.pop_frame(&mut short));
        assert_eq!(assembler.buffered(), 8);
    }

    #[test]
    fn test_clear() {
        let mut assembler = FrameAssembler::new(4, 4);
        assembler.push(&[1.0; 3]);
        assembler.clear();
        assert_eq!(assembler.buffered(), 0);
    }
}
