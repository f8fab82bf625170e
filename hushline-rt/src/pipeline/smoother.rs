//! Output smoother: adaptive gain and frame-boundary cross-fade
//!
//! Runs on every frame leaving the engine, whichever thread ran the engine.
//! The only state carried between frames is the last emitted sample.

/// Declick and adaptive gain for engine output frames
#[derive(Debug, Clone)]
pub struct OutputSmoother {
    fade_length: usize,
    user_gain: f32,
    target_peak: f32,
    click_threshold: f32,
    previous_tail: f32,
}

impl OutputSmoother {
    /// # Arguments
    /// * `fade_length` - Samples cross-faded at the start of each frame
    /// * `user_gain` - Gain ceiling
    /// * `target_peak` - Peak the gain aims for (safety margin below full scale)
    /// * `click_threshold` - Boundary jump counted as a declick event
    pub fn new(fade_length: usize, user_gain: f32, target_peak: f32, click_threshold: f32) -> Self {
        Self {
            fade_length,
            user_gain,
            target_peak,
            click_threshold,
            previous_tail: 0.0,
        }
    }

    /// Gain for a frame with the given peak magnitude
    pub fn auto_gain(&self, peak: f32) -> f32 {
        if peak > 0.0 {
            (self.user_gain * self.target_peak / peak).min(self.user_gain)
        } else {
            self.user_gain
        }
    }

    /// Smooth one frame in place
    ///
    /// Returns true if the boundary jump exceeded the click threshold. The
    /// cross-fade runs regardless; the return value is diagnostic only.
    pub fn apply(&mut self, frame: &mut [f32]) -> bool {
        if frame.is_empty() {
            return false;
        }

        let peak = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let gain = self.auto_gain(peak);
        let click = (frame[0] * gain - self.previous_tail).abs() > self.click_threshold;

        let fade = self.fade_length.min(frame.len());
        let prev = self.previous_tail;
        for (i, sample) in frame.iter_mut().enumerate() {
            let gained = *sample * gain;
            *sample = if i < fade {
                let t = i as f32 / self.fade_length as f32;
                (1.0 - t) * prev + t * gained
            } else {
                gained
            };
        }

        self.previous_tail = frame[frame.len() - 1];
        click
    }

    pub fn previous_tail(&self) -> f32 {
        self.previous_tail
    }

    /// Seed the carried tail sample (e.g. with the last passthrough sample)
    pub fn set_previous_tail(&mut self, sample: f32) {
        self.previous_tail = sample;
    }

    pub fn reset(&mut self) {
        self.previous_tail = 0.0;
    }
}
