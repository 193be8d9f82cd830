pub mod native;
pub use native::{init, NativeSynth};
