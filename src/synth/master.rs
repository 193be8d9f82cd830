use super::effect::FxParams;
use super::ramp::Glide;
use crate::synth::prelude::{db_to_gain, one_pole_coeff, soft_clip};
use serde::{Deserialize, Serialize};

const BUS_CLIP_DRIVE: f32 = 1.05;
const LIMITER_RATIO: f32 = 20.0;
const LIMITER_ATTACK: f32 = 0.002;
const LIMITER_RELEASE: f32 = 0.05;
const MIN_FOLLOWER_ATTACK: f32 = 0.005;
const MIN_FOLLOWER_RELEASE: f32 = 0.02;

/// Signal the sidechain follower listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidechainSource {
    /// The internal drum bus.
    #[default]
    Internal,
    /// Final output after FX.
    Master,
}

/// Patch `sidechain` block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidechainParams {
    pub source: SidechainSource,
    pub amount: f32,
    pub attack: f32,
    pub release: f32,
}

impl Default for SidechainParams {
    fn default() -> Self {
        Self {
            source: SidechainSource::Internal,
            amount: 0.25,
            attack: 0.04,
            release: 0.24,
        }
    }
}

/// Everything the render path needs to know about the bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusParams {
    pub master_volume: f32,
    pub limiter_ceiling: f32,
    pub fx: FxParams,
    pub sidechain: SidechainParams,
    /// Drum bus reaches the mix: rhythm on and the sidechain listening to it.
    pub drums_audible: bool,
}

impl Default for BusParams {
    fn default() -> Self {
        Self {
            master_volume: 0.8,
            limiter_ceiling: -0.5,
            fx: FxParams::default(),
            sidechain: SidechainParams::default(),
            drums_audible: false,
        }
    }
}

/// Modulation targets for bus parameters. `None` leaves a parameter alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BusModulation {
    pub master_volume: Option<f32>,
    pub delay_mix: Option<f32>,
    pub reverb_mix: Option<f32>,
    pub chorus_depth: Option<f32>,
}

impl BusModulation {
    pub fn is_empty(&self) -> bool {
        self.master_volume.is_none()
            && self.delay_mix.is_none()
            && self.reverb_mix.is_none()
            && self.chorus_depth.is_none()
    }
}

/// Feed-forward peak limiter with a hard-ish ratio.
#[derive(Debug, Clone)]
pub struct PeakLimiter {
    threshold: f32,
    envelope: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl PeakLimiter {
    pub fn new(ceiling_db: f32, sample_rate: f32) -> Self {
        Self {
            threshold: db_to_gain(ceiling_db),
            envelope: 0.0,
            attack_coeff: one_pole_coeff(LIMITER_ATTACK, sample_rate),
            release_coeff: one_pole_coeff(LIMITER_RELEASE, sample_rate),
        }
    }

    pub fn set_ceiling(&mut self, ceiling_db: f32) {
        self.threshold = db_to_gain(ceiling_db.min(0.0));
    }

    /// Gain to apply for a stereo frame whose peak is `peak`.
    #[inline]
    pub fn gain(&mut self, peak: f32) -> f32 {
        let coeff = if peak > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope += (peak - self.envelope) * coeff;
        if self.envelope <= self.threshold {
            return 1.0;
        }
        // Above threshold the output rises 1/ratio as fast as the input (in dB)
        let over = self.envelope / self.threshold;
        over.powf(1.0 / LIMITER_RATIO - 1.0)
    }
}

/// `tanh(1.05x)` -> master gain -> peak limiter.
#[derive(Debug, Clone)]
pub struct MasterBus {
    gain: Glide,
    limiter: PeakLimiter,
}

impl MasterBus {
    pub fn new(sample_rate: f32) -> Self {
        let params = BusParams::default();
        Self {
            gain: Glide::new(params.master_volume),
            limiter: PeakLimiter::new(params.limiter_ceiling, sample_rate),
        }
    }

    pub fn set_glide(&mut self, seconds: f32, sample_rate: f32) {
        self.gain.set_time_constant(seconds, sample_rate);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.gain.set_target(volume.clamp(0.0, 1.0));
    }

    pub fn set_ceiling(&mut self, ceiling_db: f32) {
        self.limiter.set_ceiling(ceiling_db);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let gain = self.gain.next();
        let l = soft_clip(left, BUS_CLIP_DRIVE) * gain;
        let r = soft_clip(right, BUS_CLIP_DRIVE) * gain;
        let reduction = self.limiter.gain(l.abs().max(r.abs()));
        (l * reduction, r * reduction)
    }
}

/// Block-rate RMS follower published to the modulation engine.
#[derive(Debug, Clone)]
pub struct SidechainFollower {
    params: SidechainParams,
    sum_squares: f32,
    samples: usize,
    level: f32,
}

impl SidechainFollower {
    pub fn new() -> Self {
        Self {
            params: SidechainParams::default(),
            sum_squares: 0.0,
            samples: 0,
            level: 0.0,
        }
    }

    pub fn set_params(&mut self, params: SidechainParams) {
        self.params = params;
    }

    pub fn source(&self) -> SidechainSource {
        self.params.source
    }

    #[inline]
    pub fn push(&mut self, left: f32, right: f32) {
        self.sum_squares += 0.5 * (left * left + right * right);
        self.samples += 1;
    }

    /// Closes the current block and returns the smoothed level in [0, 1].
    pub fn finish_block(&mut self, sample_rate: f32) -> f32 {
        if self.samples == 0 {
            return self.level;
        }
        let rms = (self.sum_squares / self.samples as f32).sqrt();
        let target = (rms * self.params.amount * 2.0).clamp(0.0, 1.0);
        let time_constant = if target > self.level {
            self.params.attack.max(MIN_FOLLOWER_ATTACK)
        } else {
            self.params.release.max(MIN_FOLLOWER_RELEASE)
        };
        let block_seconds = self.samples as f32 / sample_rate.max(1.0);
        let coeff = 1.0 - (-block_seconds / time_constant).exp();
        self.level += (target - self.level) * coeff;
        self.sum_squares = 0.0;
        self.samples = 0;
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

impl Default for SidechainFollower {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_holds_output_near_ceiling() {
        let sr = 48_000.0;
        let mut limiter = PeakLimiter::new(-6.0, sr);
        let mut out = 0.0;
        for _ in 0..4800 {
            out = 1.0 * limiter.gain(1.0);
        }
        let ceiling = db_to_gain(-6.0);
        assert!(out < ceiling * 1.05);
        assert!(out > ceiling * 0.9);
    }

    #[test]
    fn quiet_signals_pass_the_limiter() {
        let mut limiter = PeakLimiter::new(-0.5, 48_000.0);
        for _ in 0..100 {
            assert_eq!(limiter.gain(0.1), 1.0);
        }
    }

    #[test]
    fn master_bus_output_is_bounded() {
        let mut bus = MasterBus::new(48_000.0);
        bus.set_volume(1.0);
        for i in 0..48_000 {
            let x = 20.0 * (i as f32 * 0.05).sin();
            let (l, r) = bus.process(x, -x);
            assert!(l.abs() <= 1.0 && r.abs() <= 1.0);
        }
    }

    #[test]
    fn follower_rises_with_level_and_falls_in_silence() {
        let mut follower = SidechainFollower::new();
        follower.set_params(SidechainParams {
            amount: 1.0,
            ..SidechainParams::default()
        });
        for _ in 0..100 {
            for _ in 0..256 {
                follower.push(0.4, 0.4);
            }
            follower.finish_block(48_000.0);
        }
        // rms 0.4 * amount 1 * 2
        assert!((follower.level() - 0.8).abs() < 0.01);
        for _ in 0..400 {
            for _ in 0..256 {
                follower.push(0.0, 0.0);
            }
            follower.finish_block(48_000.0);
        }
        assert!(follower.level() < 0.01);
    }

    #[test]
    fn sidechain_source_names() {
        let source: SidechainSource = serde_json::from_str("\"master\"").unwrap();
        assert_eq!(source, SidechainSource::Master);
    }
}
