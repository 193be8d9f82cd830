// Shared math helpers and constants for the synth modules.

pub use core::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI, TAU};
pub use std::collections::HashMap;

/// Reference pitch for MIDI note 69.
pub const A4_FREQUENCY: f32 = 440.0;

#[inline]
pub fn midi_to_freq(midi: f32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - 69.0) / 12.0)
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// `tanh(x * drive)`, the curve used by every soft clipper in the chain.
#[inline]
pub fn soft_clip(x: f32, drive: f32) -> f32 {
    (x * drive).tanh()
}

/// One-pole smoothing coefficient for a time constant in seconds.
#[inline]
pub fn one_pole_coeff(time_constant: f32, sample_rate: f32) -> f32 {
    if time_constant <= 0.0 || sample_rate <= 0.0 {
        return 1.0;
    }
    1.0 - (-1.0 / (time_constant * sample_rate)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn midi_to_freq_matches_concert_pitch() {
        assert_relative_eq!(midi_to_freq(69.0), 440.0);
        assert_relative_eq!(midi_to_freq(57.0), 220.0, epsilon = 1e-3);
        assert_relative_eq!(midi_to_freq(60.0), 261.6256, epsilon = 1e-3);
    }

    #[test]
    fn db_conversion() {
        assert_relative_eq!(db_to_gain(0.0), 1.0);
        assert_relative_eq!(db_to_gain(-6.0), 0.501187, epsilon = 1e-5);
    }
}
