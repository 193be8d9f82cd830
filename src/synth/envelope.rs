use serde::{Deserialize, Serialize};

const MIN_SEGMENT: f32 = 0.001;
const MIN_RELEASE: f32 = 0.01;

/// Attack/decay/sustain/release curve parameters.
///
/// Stateless: every method is a pure function of elapsed time, so the same
/// descriptor drives the amplitude, filter and mod envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeGenerator {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
    /// Exponent applied to `sustain`; values above 1 pull the sustain level down.
    pub curve: f32,
}

impl EnvelopeGenerator {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32, curve: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
            curve,
        }
    }

    pub fn attack_time(&self) -> f32 {
        self.attack.max(MIN_SEGMENT)
    }

    pub fn decay_time(&self) -> f32 {
        self.decay.max(MIN_SEGMENT)
    }

    pub fn release_time(&self) -> f32 {
        self.release.max(MIN_RELEASE)
    }

    /// Level held once the decay segment ends.
    pub fn sustain_level(&self, velocity: f32) -> f32 {
        velocity * self.sustain.max(0.0).powf(self.curve)
    }

    /// Level `t` seconds after a trigger from silence.
    pub fn value_at(&self, t: f32, velocity: f32) -> f32 {
        self.value_from(0.0, t, velocity)
    }

    /// Level `t` seconds after a trigger whose attack starts at `origin`
    /// (non-zero for legato retriggers).
    pub fn value_from(&self, origin: f32, t: f32, velocity: f32) -> f32 {
        if t <= 0.0 {
            return origin;
        }
        let attack = self.attack_time();
        if t < attack {
            return origin + (velocity - origin) * (t / attack);
        }
        let decay = self.decay_time();
        let sustain = self.sustain_level(velocity);
        if t < attack + decay {
            let progress = (t - attack) / decay;
            return velocity + (sustain - velocity) * progress;
        }
        sustain
    }

    /// Linear fall from `level` to silence over the release time.
    pub fn release_value_at(&self, t_since_release: f32, level: f32) -> f32 {
        let release = self.release_time();
        if t_since_release >= release {
            0.0
        } else if t_since_release <= 0.0 {
            level
        } else {
            level * (1.0 - t_since_release / release)
        }
    }

    /// Full envelope. `time_since_off` is `None` until the note is released.
    pub fn evaluate(&self, time_since_on: f32, time_since_off: Option<f32>, velocity: f32) -> f32 {
        match time_since_off {
            Some(off) => {
                let level = self.value_at(time_since_on - off, velocity);
                self.release_value_at(off, level)
            }
            None => self.value_at(time_since_on, velocity),
        }
    }

    pub fn is_finished(&self, time_since_off: f32) -> bool {
        time_since_off >= self.release_time()
    }
}

impl Default for EnvelopeGenerator {
    fn default() -> Self {
        Self::new(0.01, 0.2, 0.7, 0.4, 1.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn env() -> EnvelopeGenerator {
        EnvelopeGenerator::new(0.1, 0.2, 0.5, 0.4, 2.0)
    }

    #[test]
    fn attack_ramps_to_velocity() {
        let e = env();
        assert_relative_eq!(e.value_at(0.0, 0.8), 0.0);
        assert_relative_eq!(e.value_at(0.05, 0.8), 0.4, epsilon = 1e-6);
        assert_relative_eq!(e.value_at(0.1, 0.8), 0.8, epsilon = 1e-6);
    }

    #[test]
    fn decay_reaches_curved_sustain() {
        let e = env();
        // sustain^curve = 0.25
        assert_relative_eq!(e.value_at(0.2, 1.0), 0.625, epsilon = 1e-6);
        assert_relative_eq!(e.value_at(0.3, 1.0), 0.25, epsilon = 1e-6);
        assert_relative_eq!(e.value_at(10.0, 0.5), 0.125, epsilon = 1e-6);
    }

    #[test]
    fn release_is_linear_to_zero() {
        let e = env();
        assert_relative_eq!(e.release_value_at(0.0, 0.6), 0.6);
        assert_relative_eq!(e.release_value_at(0.2, 0.6), 0.3, epsilon = 1e-6);
        assert_eq!(e.release_value_at(0.4, 0.6), 0.0);
        assert!(e.is_finished(0.4));
        assert!(!e.is_finished(0.39));
    }

    #[test]
    fn evaluate_releases_from_level_reached() {
        let e = env();
        // released halfway through the attack: level 0.5 at velocity 1
        let v = e.evaluate(0.25, Some(0.2), 1.0);
        assert_relative_eq!(v, 0.25, epsilon = 1e-6);
    }

    #[test]
    fn legato_attack_starts_from_origin() {
        let e = env();
        assert_relative_eq!(e.value_from(0.4, 0.0, 1.0), 0.4);
        assert_relative_eq!(e.value_from(0.4, 0.05, 1.0), 0.7, epsilon = 1e-6);
    }

    #[test]
    fn zero_length_segments_are_floored() {
        let e = EnvelopeGenerator::new(0.0, 0.0, 1.0, 0.0, 1.0);
        assert!(e.value_at(0.01, 1.0).is_finite());
        assert_eq!(e.release_time(), MIN_RELEASE);
    }
}
