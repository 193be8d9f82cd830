use super::filter::Biquad;
use super::ramp::Glide;
use super::rng::DeterministicRng;
use crate::synth::prelude::TAU;

/// Hits the bus can hold at once, scheduled or sounding.
pub const DRUM_SLOTS: usize = 12;
/// Bus gain while audible.
pub const DRUM_BUS_GAIN: f32 = 0.08;
const MUTED_GAIN: f32 = 0.0001;
const MUTE_TIME_CONSTANT: f32 = 0.05;
const NOISE_SEED: u32 = 0x00D2_0B05;

const KICK_START_HZ: f32 = 90.0;
const KICK_END_HZ: f32 = 40.0;
const SNARE_HIGHPASS_HZ: f32 = 1200.0;
const HAT_HIGHPASS_HZ: f32 = 6000.0;
/// Level every hit decays to by the end of its sweep.
const DECAY_FLOOR: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrumHit {
    Kick,
    Snare,
    Hat,
}

impl DrumHit {
    fn peak(self) -> f32 {
        match self {
            DrumHit::Kick => 1.0,
            DrumHit::Snare => 0.5,
            DrumHit::Hat => 0.2,
        }
    }

    /// Seconds from the peak down to the decay floor.
    fn decay(self) -> f32 {
        match self {
            DrumHit::Kick => 0.25,
            DrumHit::Snare => 0.18,
            DrumHit::Hat => 0.08,
        }
    }

    /// Seconds until the hit is cut.
    fn length(self) -> f64 {
        match self {
            DrumHit::Kick => 0.26,
            DrumHit::Snare => 0.2,
            DrumHit::Hat => 0.1,
        }
    }
}

/// `from * (to / from)^(t / span)`, held at `to` after `span`.
#[inline]
fn exp_sweep(from: f32, to: f32, t: f32, span: f32) -> f32 {
    from * (to / from).powf((t / span).min(1.0))
}

#[derive(Debug, Clone)]
struct DrumVoice {
    hit: Option<DrumHit>,
    start: f64,
    phase: f32,
    highpass: Biquad,
}

impl DrumVoice {
    fn new(sample_rate: f32) -> Self {
        Self {
            hit: None,
            start: 0.0,
            phase: 0.0,
            highpass: Biquad::highpass(SNARE_HIGHPASS_HZ, sample_rate),
        }
    }

    fn schedule(&mut self, hit: DrumHit, time: f64, sample_rate: f32) {
        let cutoff = match hit {
            DrumHit::Hat => HAT_HIGHPASS_HZ,
            _ => SNARE_HIGHPASS_HZ,
        };
        self.highpass = Biquad::highpass(cutoff, sample_rate);
        self.hit = Some(hit);
        self.start = time;
        self.phase = 0.0;
    }

    #[inline]
    fn render(&mut self, time: f64, noise: f32, sample_rate: f32) -> f32 {
        let Some(hit) = self.hit else {
            return 0.0;
        };
        let since = time - self.start;
        if since < 0.0 {
            return 0.0;
        }
        if since >= hit.length() {
            self.hit = None;
            return 0.0;
        }
        let t = since as f32;
        let gain = exp_sweep(hit.peak(), DECAY_FLOOR, t, hit.decay());
        match hit {
            DrumHit::Kick => {
                let freq = exp_sweep(KICK_START_HZ, KICK_END_HZ, t, hit.decay());
                let out = (self.phase * TAU).sin() * gain;
                self.phase = (self.phase + freq / sample_rate).rem_euclid(1.0);
                out
            }
            DrumHit::Snare | DrumHit::Hat => self.highpass.process(noise) * gain,
        }
    }
}

/// Internal rhythm bus: synthesized kick, snare and hat hits stamped on the
/// render clock. Feeds the master bus and, when the sidechain listens
/// internally, the follower.
#[derive(Debug, Clone)]
pub struct DrumBus {
    voices: Vec<DrumVoice>,
    noise: DeterministicRng,
    gain: Glide,
    sample_rate: f32,
}

impl DrumBus {
    pub fn new(sample_rate: f32) -> Self {
        let mut gain = Glide::new(MUTED_GAIN);
        gain.set_time_constant(MUTE_TIME_CONSTANT, sample_rate);
        Self {
            voices: (0..DRUM_SLOTS).map(|_| DrumVoice::new(sample_rate)).collect(),
            noise: DeterministicRng::new(NOISE_SEED),
            gain,
            sample_rate,
        }
    }

    pub fn set_audible(&mut self, audible: bool) {
        self.gain
            .set_target(if audible { DRUM_BUS_GAIN } else { MUTED_GAIN });
    }

    /// Queues `hit` at `time`. With every slot busy the earliest hit is
    /// replaced.
    pub fn schedule(&mut self, hit: DrumHit, time: f64) {
        let sample_rate = self.sample_rate;
        let slot = match self.voices.iter().position(|v| v.hit.is_none()) {
            Some(i) => i,
            None => self
                .voices
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.start.total_cmp(&b.1.start))
                .map_or(0, |(i, _)| i),
        };
        if let Some(voice) = self.voices.get_mut(slot) {
            voice.schedule(hit, time, sample_rate);
        }
    }

    /// Drops every scheduled and sounding hit.
    pub fn clear(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.hit = None;
        }
    }

    /// Hits scheduled or still sounding.
    pub fn pending_hits(&self) -> usize {
        self.voices.iter().filter(|v| v.hit.is_some()).count()
    }

    /// Renders one mono frame at render-clock `time`, bus gain applied.
    #[inline]
    pub fn render(&mut self, time: f64) -> f32 {
        let noise = self.noise.next_bipolar();
        let sr = self.sample_rate;
        let sum: f32 = self
            .voices
            .iter_mut()
            .map(|v| v.render(time, noise, sr))
            .sum();
        sum * self.gain.next()
    }
}
