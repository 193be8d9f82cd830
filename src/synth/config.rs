use super::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Minimum polyphony the engine will run with.
pub const MIN_VOICES: usize = 8;

/// Engine-wide tunables. Everything here is fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynthConfig {
    /// Size of the voice arena.
    pub max_voices: usize,
    /// Lookahead horizon in seconds.
    pub schedule_ahead: f64,
    /// Control-thread wake period in seconds; must stay below `schedule_ahead`.
    pub tick_interval: f64,
    /// Time constant of modulation glides.
    pub glide_seconds: f32,
    /// Modulation writes closer than this to the last write are skipped.
    pub deadband: f32,
    /// Capacity of the control -> render command queue.
    pub command_capacity: usize,
    /// Seed for the engine's `Random` modulation source.
    pub seed: u32,
    /// Preferred audio buffer size in frames.
    pub buffer_frames: u32,
}

impl SynthConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: SynthConfig = serde_json::from_str(text)
            .map_err(|e| EngineError::Initialization(format!("bad config: {}", e)))?;
        Ok(config.sanitized())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Initialization(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Clamps values the engine cannot run with.
    pub fn sanitized(mut self) -> Self {
        self.max_voices = self.max_voices.max(MIN_VOICES);
        self.schedule_ahead = self.schedule_ahead.max(0.01);
        if !(self.tick_interval > 0.0 && self.tick_interval < self.schedule_ahead) {
            log::warn!(
                "tick interval {}s is not below the {}s horizon, using half the horizon",
                self.tick_interval,
                self.schedule_ahead
            );
            self.tick_interval = self.schedule_ahead * 0.5;
        }
        self.glide_seconds = self.glide_seconds.max(0.001);
        self.deadband = self.deadband.max(0.0);
        self.command_capacity = self.command_capacity.max(64);
        self
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            max_voices: 16,
            schedule_ahead: 0.1,
            tick_interval: 0.025,
            glide_seconds: 0.05,
            deadband: 1e-3,
            command_capacity: 1024,
            seed: 1_234_567,
            buffer_frames: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SynthConfig::from_json(r#"{ "maxVoices": 24 }"#).unwrap();
        assert_eq!(config.max_voices, 24);
        assert_eq!(config.tick_interval, 0.025);
    }

    #[test]
    fn sanitizes_tick_interval_and_voice_floor() {
        let config = SynthConfig {
            max_voices: 2,
            tick_interval: 0.5,
            ..SynthConfig::default()
        }
        .sanitized();
        assert_eq!(config.max_voices, MIN_VOICES);
        assert!(config.tick_interval < config.schedule_ahead);
    }

    #[test]
    fn malformed_config_is_an_init_error() {
        assert!(matches!(
            SynthConfig::from_json("{"),
            Err(EngineError::Initialization(_))
        ));
    }
}
