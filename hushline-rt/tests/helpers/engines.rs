//! Scripted engines and loaders

use hushline_rt::{DenoiseEngine, EngineError, EngineLoader};
use std::sync::{Arc, Mutex};

/// What a scripted engine does with each frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Copy input to output
    Passthrough,
    /// Multiply every sample by a constant
    Scale(f32),
    /// Fail every n-th frame (1-based), pass the rest through
    FailEvery(u64),
    /// Panic on the first frame
    PanicOnProcess,
}

/// What the engine has observed, shared with the test
#[derive(Debug, Default, Clone)]
pub struct EngineLog {
    pub loads: usize,
    pub frames: u64,
    pub attenuation_limit_db: Option<f32>,
    pub post_filter_beta: Option<f32>,
    pub dropped: bool,
}

pub struct ScriptedEngine {
    frame_length: usize,
    behavior: Behavior,
    log: Arc<Mutex<EngineLog>>,
}

impl DenoiseEngine for ScriptedEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineError> {
        let frame = {
            let mut log = self.log.lock().unwrap();
            log.frames += 1;
            log.frames
        };

        match self.behavior {
            Behavior::Passthrough => output.copy_from_slice(input),
            Behavior::Scale(factor) => {
                for (o, i) in output.iter_mut().zip(input) {
                    *o = i * factor;
                }
            }
            Behavior::FailEvery(n) => {
                if frame % n == 0 {
                    return Err(EngineError::ProcessFailed(format!("scripted failure on frame {}", frame)));
                }
                output.copy_from_slice(input);
            }
            Behavior::PanicOnProcess => panic!("scripted engine panic"),
        }
        Ok(())
    }

    fn set_attenuation_limit(&mut self, db: f32) {
        self.log.lock().unwrap().attenuation_limit_db = Some(db);
    }

    fn set_post_filter_beta(&mut self, beta: f32) {
        self.log.lock().unwrap().post_filter_beta = Some(beta);
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.dropped = true;
        }
    }
}

/// Loader producing `ScriptedEngine`s, or failing on demand
pub struct ScriptedLoader {
    pub frame_length: usize,
    pub behavior: Behavior,
    pub fail_load: bool,
    pub panic_on_load: bool,
    pub log: Arc<Mutex<EngineLog>>,
}

impl ScriptedLoader {
    pub fn new(frame_length: usize, behavior: Behavior) -> Self {
        Self {
            frame_length,
            behavior,
            fail_load: false,
            panic_on_load: false,
            log: Arc::new(Mutex::new(EngineLog::default())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_load: true,
            ..Self::new(480, Behavior::Passthrough)
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_load: true,
            ..Self::new(480, Behavior::Passthrough)
        }
    }

    pub fn log(&self) -> EngineLog {
        self.log.lock().unwrap().clone()
    }
}

impl EngineLoader for ScriptedLoader {
    fn load(&self, _model_bytes: &[u8], attenuation_limit_db: f32) -> Result<Box<dyn DenoiseEngine>, EngineError> {
        if self.panic_on_load {
            panic!("scripted loader panic");
        }
        if self.fail_load {
            return Err(EngineError::LoadFailed("scripted load failure".to_string()));
        }

        {
            let mut log = self.log.lock().unwrap();
            log.loads += 1;
            log.dropped = false;
            log.attenuation_limit_db = Some(attenuation_limit_db);
        }
        Ok(Box::new(ScriptedEngine {
            frame_length: self.frame_length,
            behavior: self.behavior,
            log: Arc::clone(&self.log),
        }))
    }
}
