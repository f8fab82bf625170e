//! Offline host: drive a pipeline from a WAV file
//!
//! Stands in for an audio device. Input is mixed to mono, fed to the
//! `RealtimeProcessor` in fixed-size blocks (optionally paced at the block
//! duration), and the processed signal is written back as a mono float WAV.

use crate::error::{Error, Result};
use crate::pipeline::RealtimeProcessor;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Mono audio clip
#[derive(Debug, Clone, PartialEq)]
pub struct MonoClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Read a WAV file, averaging channels to mono
pub fn read_wav_mono(path: &Path) -> Result<MonoClip> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect::<Vec<_>>();

    info!(
        "Read {}: {} Hz, {} channel(s), {} samples",
        path.display(),
        spec.sample_rate,
        spec.channels,
        samples.len()
    );

    Ok(MonoClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Write a mono 32-bit float WAV
pub fn write_wav_mono(path: &Path, clip: &MonoClip) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in &clip.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    info!("Wrote {} ({} samples)", path.display(), clip.samples.len());
    Ok(())
}

/// Run `input` through the processor block by block
///
/// With `realtime`, each block is released at its wall-clock deadline so the
/// worker sees host cadence; otherwise blocks are fed back to back.
pub fn render(
    processor: &mut RealtimeProcessor,
    input: &[f32],
    block_size: usize,
    sample_rate: u32,
    realtime: bool,
) -> Result<Vec<f32>> {
    if block_size == 0 {
        return Err(Error::Config("block_size must be > 0".to_string()));
    }
    if sample_rate == 0 {
        return Err(Error::Config("sample_rate must be > 0".to_string()));
    }

    let block_duration = Duration::from_secs_f64(block_size as f64 / sample_rate as f64);
    debug!(
        "Rendering {} samples in blocks of {} ({:?} per block, realtime={})",
        input.len(),
        block_size,
        block_duration,
        realtime
    );

    let mut output = vec![0.0f32; input.len()];
    let start = Instant::now();

    for (index, (block_in, block_out)) in input
        .chunks(block_size)
        .zip(output.chunks_mut(block_size))
        .enumerate()
    {
        if realtime {
            let deadline = start + block_duration * index as u32;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        processor.process(block_in, block_out);
    }

    Ok(output)
}
