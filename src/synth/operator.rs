use super::ramp::{Glide, Ramp};
use crate::synth::prelude::TAU;
use serde::{Deserialize, Serialize};

/// Fraction of the peak deviation the FM envelope settles at.
const DEVIATION_FLOOR: f32 = 0.01;
const MIN_DEVIATION: f32 = 1e-4;

/// FM stage settings, stored in the patch as `fm`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FmSettings {
    pub ratio: f32,
    pub index: f32,
    pub velocity_to_index: f32,
    pub attack: f32,
    pub decay: f32,
}

impl Default for FmSettings {
    fn default() -> Self {
        Self {
            ratio: 2.0,
            index: 0.2,
            velocity_to_index: 0.1,
            attack: 0.01,
            decay: 0.18,
        }
    }
}

/// Sine modulator driving oscillator A's frequency.
///
/// The deviation envelope is normalized (0 -> 1 -> 0.01) and scaled every
/// sample by the gliding index, so index modulation reaches a held note.
#[derive(Debug, Clone)]
pub struct FmOperator {
    phase: f32,
    settings: FmSettings,
    shape: Ramp,
    index: Glide,
    velocity: f32,
}

impl FmOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&mut self, settings: FmSettings) {
        self.settings = settings;
        self.index.set_target(settings.index.clamp(0.0, 1.0));
    }

    pub fn set_glide(&mut self, seconds: f32, sample_rate: f32) {
        self.index.set_time_constant(seconds, sample_rate);
    }

    /// Glides the modulation index toward `index`.
    pub fn modulate_index(&mut self, index: f32) {
        self.index.set_target(index.clamp(0.0, 1.0));
    }

    pub fn index(&self) -> f32 {
        self.index.target()
    }

    pub fn trigger(&mut self, time: f64, velocity: f32) {
        let attack = self.settings.attack.max(0.001) as f64;
        let decay = self.settings.decay.max(0.01) as f64;
        self.velocity = velocity;
        self.shape.set_value_at(time, 0.0);
        self.shape.linear_ramp_to(1.0, time + attack);
        self.shape.exponential_ramp_to(DEVIATION_FLOOR, time + attack + decay);
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.shape = Ramp::new(0.0);
    }

    /// Peak deviation in Hz for a carrier at `carrier_hz`.
    pub fn peak_deviation(&self, carrier_hz: f32) -> f32 {
        let depth = self.index.value() + self.settings.velocity_to_index * self.velocity;
        (carrier_hz * depth).max(MIN_DEVIATION)
    }

    /// Advances one sample and returns the frequency offset in Hz to add to
    /// the carrier.
    #[inline]
    pub fn process(&mut self, time: f64, carrier_hz: f32, sample_rate: f32) -> f32 {
        self.index.next();
        let deviation = self.peak_deviation(carrier_hz) * self.shape.value_at(time);
        let out = (self.phase * TAU).sin() * deviation;
        self.phase += carrier_hz * self.settings.ratio / sample_rate;
        self.phase -= self.phase.floor();
        out
    }
}

impl Default for FmOperator {
    fn default() -> Self {
        let settings = FmSettings::default();
        Self {
            phase: 0.0,
            settings,
            shape: Ramp::new(0.0),
            index: Glide::new(settings.index),
            velocity: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn deviation_envelope_peaks_then_settles() {
        let mut op = FmOperator::new();
        op.configure(FmSettings {
            attack: 0.01,
            decay: 0.1,
            ..FmSettings::default()
        });
        op.trigger(1.0, 1.0);
        assert_relative_eq!(op.shape.value_at(1.0), 0.0);
        assert_relative_eq!(op.shape.value_at(1.01), 1.0, epsilon = 1e-4);
        assert_relative_eq!(op.shape.value_at(1.11), DEVIATION_FLOOR, epsilon = 1e-5);
        assert_relative_eq!(op.shape.value_at(9.0), DEVIATION_FLOOR, epsilon = 1e-6);
    }

    #[test]
    fn peak_includes_velocity_and_has_a_floor() {
        let mut op = FmOperator::new();
        op.trigger(0.0, 0.5);
        // index 0.2 + 0.1 * 0.5
        assert_relative_eq!(op.peak_deviation(100.0), 25.0, epsilon = 1e-4);
        assert_eq!(op.peak_deviation(0.0), MIN_DEVIATION);
    }

    #[test]
    fn index_modulation_is_clamped() {
        let mut op = FmOperator::new();
        op.modulate_index(4.0);
        assert_eq!(op.index(), 1.0);
        op.modulate_index(-1.0);
        assert_eq!(op.index(), 0.0);
    }
}
