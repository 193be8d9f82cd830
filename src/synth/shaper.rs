use super::filter::OnePole;
use crate::synth::prelude::soft_clip;

/// Drive of the post-envelope clipper.
pub const POST_CLIP_DRIVE: f32 = 1.05;
/// Highest oversampling factor the clipper runs at.
pub const MAX_OVERSAMPLE: u32 = 4;
const TRANSIENT_FOLLOWER_HZ: f32 = 600.0;
const TRANSIENT_FOLLOWER_GAIN: f32 = 1.2;

/// Sub saturation: `tanh((1 + 2 * amount) * x)`.
#[inline]
pub fn saturate(x: f32, amount: f32) -> f32 {
    soft_clip(x, 1.0 + 2.0 * amount.max(0.0))
}

/// Envelope-following gain stage: `x * (attack + sustain + 1.2 * |lp600(x)|)`.
#[derive(Debug, Clone)]
pub struct TransientShaper {
    attack: f32,
    sustain: f32,
    follower: OnePole,
}

impl TransientShaper {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            attack: 1.1,
            sustain: 0.85,
            follower: OnePole::new(TRANSIENT_FOLLOWER_HZ, sample_rate),
        }
    }

    pub fn set_gains(&mut self, attack: f32, sustain: f32) {
        self.attack = attack;
        self.sustain = sustain;
    }

    pub fn reset(&mut self) {
        self.follower.reset();
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let envelope = self.follower.process(x).abs();
        x * (self.attack + self.sustain + TRANSIENT_FOLLOWER_GAIN * envelope)
    }
}

/// The post-envelope clipper, optionally run at `factor` times the sample
/// rate: linear interpolation up, box average down.
#[derive(Debug, Clone, Default)]
pub struct OversampledClip {
    previous: f32,
}

impl OversampledClip {
    pub fn reset(&mut self) {
        self.previous = 0.0;
    }

    #[inline]
    pub fn process(&mut self, x: f32, factor: u32) -> f32 {
        let factor = factor.clamp(1, MAX_OVERSAMPLE);
        let from = self.previous;
        self.previous = x;
        if factor == 1 {
            return soft_clip(x, POST_CLIP_DRIVE);
        }
        let step = (x - from) / factor as f32;
        let sum: f32 = (1..=factor)
            .map(|k| soft_clip(from + step * k as f32, POST_CLIP_DRIVE))
            .sum();
        sum / factor as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn saturation_is_bounded_and_odd() {
        assert!(saturate(10.0, 0.5) < 1.0);
        assert_relative_eq!(saturate(-0.3, 0.25), -saturate(0.3, 0.25));
        assert_relative_eq!(saturate(0.2, 0.0), 0.2f32.tanh());
    }

    #[test]
    fn silence_stays_silent() {
        let mut shaper = TransientShaper::new(48_000.0);
        for _ in 0..100 {
            assert_eq!(shaper.process(0.0), 0.0);
        }
    }

    #[test]
    fn gain_grows_with_sustained_level() {
        let mut shaper = TransientShaper::new(48_000.0);
        shaper.set_gains(1.0, 0.5);
        let first = shaper.process(0.5);
        let mut last = first;
        for _ in 0..2000 {
            last = shaper.process(0.5);
        }
        assert!(first >= 0.75);
        assert_relative_eq!(last, 0.5 * (1.5 + 1.2 * 0.5), epsilon = 1e-3);
    }

    #[test]
    fn single_rate_clip_is_plain_tanh() {
        let mut clip = OversampledClip::default();
        assert_relative_eq!(clip.process(0.6, 1), soft_clip(0.6, POST_CLIP_DRIVE));
        assert_relative_eq!(clip.process(-2.0, 0), soft_clip(-2.0, POST_CLIP_DRIVE));
    }

    #[test]
    fn oversampling_agrees_on_steady_input_and_smooths_edges() {
        let mut steady = OversampledClip::default();
        for _ in 0..4 {
            steady.process(0.5, 4);
        }
        assert_relative_eq!(steady.process(0.5, 4), soft_clip(0.5, POST_CLIP_DRIVE), epsilon = 1e-6);

        let mut single = OversampledClip::default();
        let mut quad = OversampledClip::default();
        let mut peaks = (0.0f32, 0.0f32);
        for i in 0..64 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            peaks.0 = peaks.0.max(single.process(x, 1).abs());
            peaks.1 = peaks.1.max(quad.process(x, 4).abs());
        }
        assert!(peaks.1 < peaks.0);
    }
}
