pub mod config;
pub mod context;
pub mod core;
pub mod delayline;
pub mod drums;
pub mod effect;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod master;
pub mod modulation;
pub mod note;
pub mod operator;
pub mod patch;
pub mod pool;
pub mod prelude;
pub mod presets;
pub mod ramp;
pub mod reverb;
pub mod rng;
pub mod shaper;
pub mod voice;
pub mod voice_dsp;
pub mod wavetable;

pub use self::core::{RenderCommand, Synth};
pub use self::engine::SynthEngine;
