mod cpal_backend;
pub use self::cpal_backend::CpalBackend;

use crate::synth::error::Result;

/// An output device that pulls audio from the render path.
pub trait AudioBackend {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}
