//! Signal generators

/// `len` samples of a sine at `freq` Hz
pub fn sine(len: usize, freq: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

pub fn constant(len: usize, value: f32) -> Vec<f32> {
    vec![value; len]
}

/// Split a signal into host blocks
pub fn blocks(signal: &[f32], block_size: usize) -> Vec<Vec<f32>> {
    signal.chunks(block_size).map(|c| c.to_vec()).collect()
}
