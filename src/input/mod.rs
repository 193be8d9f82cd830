mod midi;

pub use self::midi::{MidiHandler, MidiMessage};
