pub mod sequencer;
pub mod synth;

#[cfg(feature = "native")]
pub mod audio;
#[cfg(feature = "native")]
pub mod input;
#[cfg(feature = "native")]
pub mod runtime;

pub use synth::config::SynthConfig;
pub use synth::engine::SynthEngine;
pub use synth::error::{EngineError, Result};
pub use synth::patch::PatchState;
