use super::delayline::{DelayLine, ModulatedDelayLine};
use super::filter::Biquad;
use super::ramp::Glide;
use super::reverb::Reverb;

const DRY_GAIN: f32 = 0.7;
const CHORUS_WET: f32 = 0.25;
const CHORUS_BASE_SECONDS: f32 = 0.018;
const CHORUS_DEPTH_SECONDS: f32 = 0.003;
const MAX_DELAY_SECONDS: f32 = 2.0;
const DELAY_HIGHPASS_HZ: f32 = 200.0;
const DELAY_LOWPASS_HZ: f32 = 8000.0;

/// FX settings derived from the patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FxParams {
    pub chorus_depth: f32,
    pub chorus_rate: f32,
    pub delay_time: f32,
    pub delay_feedback: f32,
    pub delay_mix: f32,
    pub ping_pong: bool,
    pub reverb_size: f32,
    pub reverb_mix: f32,
}

impl Default for FxParams {
    fn default() -> Self {
        Self {
            chorus_depth: 0.2,
            chorus_rate: 0.6,
            delay_time: 0.32,
            delay_feedback: 0.24,
            delay_mix: 0.2,
            ping_pong: false,
            reverb_size: 1.0,
            reverb_mix: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
struct Chorus {
    left: ModulatedDelayLine,
    right: ModulatedDelayLine,
    depth: Glide,
    sample_rate: f32,
}

impl Chorus {
    fn new(sample_rate: f32) -> Self {
        let base = CHORUS_BASE_SECONDS * sample_rate;
        let max = (CHORUS_BASE_SECONDS + CHORUS_DEPTH_SECONDS) * sample_rate + 4.0;
        // Right channel LFO runs a quarter cycle ahead
        Self {
            left: ModulatedDelayLine::new(base, max, 0.6, 0.0, 0.0, sample_rate),
            right: ModulatedDelayLine::new(base, max, 0.6, 0.25, 0.0, sample_rate),
            depth: Glide::new(0.2),
            sample_rate,
        }
    }

    fn set_rate(&mut self, rate: f32) {
        self.left.set_lfo_freq(rate);
        self.right.set_lfo_freq(rate);
    }

    #[inline]
    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let depth = self.depth.next().clamp(0.0, 1.0) * CHORUS_DEPTH_SECONDS * self.sample_rate;
        self.left.set_modulation_depth_samples(depth);
        self.right.set_modulation_depth_samples(depth);
        (self.left.process(left), self.right.process(right))
    }
}

#[derive(Debug, Clone)]
struct FeedbackDelay {
    left: DelayLine,
    right: DelayLine,
    filters: [(Biquad, Biquad); 2],
    time: Glide,
    feedback: f32,
    ping_pong: bool,
    sample_rate: f32,
}

impl FeedbackDelay {
    fn new(sample_rate: f32) -> Self {
        let max = (MAX_DELAY_SECONDS * sample_rate).ceil() as usize;
        let loop_filters = || {
            (
                Biquad::highpass(DELAY_HIGHPASS_HZ, sample_rate),
                Biquad::lowpass(DELAY_LOWPASS_HZ, sample_rate),
            )
        };
        Self {
            left: DelayLine::new(max),
            right: DelayLine::new(max),
            filters: [loop_filters(), loop_filters()],
            time: Glide::new(0.32 * sample_rate),
            feedback: 0.24,
            ping_pong: false,
            sample_rate,
        }
    }

    #[inline]
    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let delay = self.time.next();
        let out_l = self.left.read(delay);
        let out_r = self.right.read(delay);
        let (hp, lp) = &mut self.filters[0];
        let fb_l = lp.process(hp.process(out_l)) * self.feedback;
        let (hp, lp) = &mut self.filters[1];
        let fb_r = lp.process(hp.process(out_r)) * self.feedback;
        if self.ping_pong {
            // Mono input enters left, repeats alternate sides
            self.left.write((left + right) * 0.5 + fb_r);
            self.right.write(fb_l);
        } else {
            self.left.write(left + fb_l);
            self.right.write(right + fb_r);
        }
        (out_l, out_r)
    }
}

/// Parallel chorus, feedback delay and reverb over the master output.
#[derive(Debug, Clone)]
pub struct FxSection {
    chorus: Chorus,
    delay: FeedbackDelay,
    reverb: Reverb,
    delay_mix: Glide,
    reverb_mix: Glide,
    params: FxParams,
}

impl FxSection {
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        let mut fx = Self {
            chorus: Chorus::new(sample_rate),
            delay: FeedbackDelay::new(sample_rate),
            reverb: Reverb::new(sample_rate),
            delay_mix: Glide::new(0.0),
            reverb_mix: Glide::new(0.0),
            params: FxParams::default(),
        };
        fx.set_params(&FxParams::default(), true);
        fx
    }

    pub fn set_glide(&mut self, seconds: f32, sample_rate: f32) {
        self.chorus.depth.set_time_constant(seconds, sample_rate);
        self.delay.time.set_time_constant(seconds, sample_rate);
        self.delay_mix.set_time_constant(seconds, sample_rate);
        self.reverb_mix.set_time_constant(seconds, sample_rate);
    }

    /// Applies patch settings. `immediate` skips the glides.
    pub fn set_params(&mut self, params: &FxParams, immediate: bool) {
        let delay_samples = params.delay_time.clamp(0.0, MAX_DELAY_SECONDS) * self.delay.sample_rate;
        let targets = [
            (&mut self.chorus.depth, params.chorus_depth),
            (&mut self.delay.time, delay_samples),
            (&mut self.delay_mix, params.delay_mix),
            (&mut self.reverb_mix, params.reverb_mix),
        ];
        for (glide, value) in targets {
            if immediate {
                glide.jump(value);
            } else {
                glide.set_target(value);
            }
        }
        self.chorus.set_rate(params.chorus_rate.max(0.0));
        self.delay.feedback = params.delay_feedback.clamp(0.0, 0.95);
        self.delay.ping_pong = params.ping_pong;
        if (self.params.reverb_size - params.reverb_size).abs() > f32::EPSILON || immediate {
            self.reverb.set_size(params.reverb_size);
        }
        self.params = *params;
    }

    pub fn params(&self) -> &FxParams {
        &self.params
    }

    pub fn modulate_chorus_depth(&mut self, depth: f32) {
        self.chorus.depth.set_target(depth);
    }

    pub fn modulate_delay_mix(&mut self, mix: f32) {
        self.delay_mix.set_target(mix);
    }

    pub fn modulate_reverb_mix(&mut self, mix: f32) {
        self.reverb_mix.set_target(mix);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let (chorus_l, chorus_r) = self.chorus.process(left, right);
        let (delay_l, delay_r) = self.delay.process(left, right);
        let (reverb_l, reverb_r) = self.reverb.process(left, right);
        let delay_mix = self.delay_mix.next();
        let reverb_mix = self.reverb_mix.next();
        (
            left * DRY_GAIN + chorus_l * CHORUS_WET + delay_l * delay_mix + reverb_l * reverb_mix,
            right * DRY_GAIN + chorus_r * CHORUS_WET + delay_r * delay_mix + reverb_r * reverb_mix,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dry_only() -> FxParams {
        FxParams {
            delay_mix: 0.0,
            reverb_mix: 0.0,
            ..FxParams::default()
        }
    }

    #[test]
    fn dry_path_is_attenuated() {
        let mut fx = FxSection::new(48_000.0);
        fx.set_params(&dry_only(), true);
        let (l, r) = fx.process(1.0, -1.0);
        assert_relative_eq!(l, DRY_GAIN);
        assert_relative_eq!(r, -DRY_GAIN);
    }

    #[test]
    fn delay_repeats_after_its_time() {
        let sr = 1000.0;
        let mut fx = FxSection::new(sr);
        fx.set_params(
            &FxParams {
                delay_time: 0.1,
                delay_mix: 1.0,
                reverb_mix: 0.0,
                chorus_depth: 0.0,
                ..FxParams::default()
            },
            true,
        );
        let mut out = Vec::new();
        for i in 0..150 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            out.push(fx.process(x, x).0);
        }
        // Echo lands at 100 samples, nothing at 50
        assert!(out[100].abs() > 0.5);
        assert!(out[50].abs() < 1e-3);
    }

    #[test]
    fn ping_pong_alternates_channels() {
        let sr = 1000.0;
        let mut fx = FxSection::new(sr);
        fx.set_params(
            &FxParams {
                delay_time: 0.1,
                delay_feedback: 0.5,
                delay_mix: 1.0,
                reverb_mix: 0.0,
                chorus_depth: 0.0,
                ping_pong: true,
                ..FxParams::default()
            },
            true,
        );
        let mut left = Vec::new();
        let mut right = Vec::new();
        for i in 0..250 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            let (l, r) = fx.process(x, x);
            left.push(l);
            right.push(r);
        }
        assert!(left[100].abs() > right[100].abs());
        assert!(right[200].abs() > left[200].abs());
    }
}
