use super::envelope::EnvelopeGenerator;
use super::filter::FilterType;
use super::note::NoteKey;
use super::operator::FmSettings;
use super::patch::{FilterSettings, OscillatorSettings, PatchState};
use super::shaper::MAX_OVERSAMPLE;
use super::wavetable::Timbre;
use crate::synth::prelude::midi_to_freq;

/// Morph changes smaller than this do not reach the render path.
pub const MORPH_DEADBAND: f32 = 0.01;
/// Cutoff floors the release sweep stops at, per filter.
pub const RELEASE_CUTOFF_FLOORS: [f32; 2] = [40.0, 60.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStage {
    Idle,
    Triggered,
    Sustaining,
    Releasing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscParams {
    pub timbre: Timbre,
    pub morph: f32,
    pub level: f32,
    /// Start phase in cycles.
    pub phase: f32,
}

impl From<&OscillatorSettings> for OscParams {
    fn from(osc: &OscillatorSettings) -> Self {
        Self {
            timbre: osc.table,
            morph: osc.morph.clamp(0.0, 1.0),
            level: osc.level,
            phase: osc.phase,
        }
    }
}

/// Gains of the four routing taps around the two filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingGains {
    pub f2_serial_in: f32,
    pub f2_parallel_in: f32,
    pub f1_out: f32,
    pub f2_out: f32,
}

impl RoutingGains {
    pub fn new(serial: bool, mix: f32) -> Self {
        if serial {
            Self {
                f2_serial_in: 1.0,
                f2_parallel_in: 0.0,
                f1_out: 0.0,
                f2_out: 1.0,
            }
        } else {
            let mix = mix.clamp(0.0, 1.0);
            Self {
                f2_serial_in: mix,
                f2_parallel_in: 1.0 - mix * 0.5,
                f1_out: 1.0 - mix,
                f2_out: mix,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub filter_type: FilterType,
    pub resonance: f32,
    /// Cutoff an idle voice rests at.
    pub cutoff: f32,
}

impl From<&FilterSettings> for FilterParams {
    fn from(filter: &FilterSettings) -> Self {
        Self {
            filter_type: filter.filter_type,
            resonance: filter.resonance,
            cutoff: filter.cutoff,
        }
    }
}

/// Sound settings a voice renders with, rebuilt whenever the patch changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    pub osc_a: OscParams,
    pub osc_b: OscParams,
    pub pan: f32,
    pub sub_level: f32,
    pub sub_square: f32,
    pub sub_saturation: f32,
    pub fm: FmSettings,
    pub filters: [FilterParams; 2],
    /// Pre-filter gain.
    pub drive: f32,
    pub routing: RoutingGains,
    pub amp: EnvelopeGenerator,
    pub filter_env: EnvelopeGenerator,
    pub transient_attack: f32,
    pub transient_sustain: f32,
    /// Clipper oversampling factor.
    pub oversample: u32,
}

impl VoiceParams {
    pub fn from_patch(patch: &PatchState) -> Self {
        let osc = &patch.oscillators;
        let filters = &patch.filters;
        Self {
            osc_a: (&osc.osc_a).into(),
            osc_b: (&osc.osc_b).into(),
            pan: (osc.osc_a.pan + osc.osc_b.pan * 0.5).clamp(-1.0, 1.0),
            sub_level: patch.sub.level,
            sub_square: patch.sub.square_blend * 0.2,
            sub_saturation: patch.sub.saturation,
            fm: patch.fm,
            filters: [(&filters.filter1).into(), (&filters.filter2).into()],
            drive: filters.filter1.drive,
            routing: RoutingGains::new(filters.routing.serial, filters.routing.mix),
            amp: patch.envelopes.amp,
            filter_env: patch.envelopes.filter,
            transient_attack: patch.transient.attack,
            transient_sustain: patch.transient.sustain,
            oversample: patch.global.quality.clamp(1, MAX_OVERSAMPLE),
        }
    }
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self::from_patch(&PatchState::default())
    }
}

/// Cutoff breakpoints for one note: start, peak after the filter attack,
/// sustain after the decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSweep {
    pub start: f32,
    pub peak: f32,
    pub sustain: f32,
    pub attack: f32,
    pub decay: f32,
}

impl FilterSweep {
    pub fn new(filter: &FilterSettings, env: &EnvelopeGenerator, note: u8, velocity: f32) -> Self {
        let base = filter.cutoff * 2.0_f32.powf(filter.keytrack * (f32::from(note) - 60.0) / 12.0);
        Self {
            start: (base * 0.5).max(20.0),
            peak: (base + filter.env_amount * velocity).max(60.0),
            sustain: (base + filter.env_amount * env.sustain).max(40.0),
            attack: env.attack.max(0.0),
            decay: env.decay.max(0.0),
        }
    }
}

/// Everything the render path needs to start a note at `time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPlan {
    pub time: f64,
    pub velocity: f32,
    pub freq_a: f32,
    pub freq_b: f32,
    pub freq_sub: f32,
    pub sweeps: [FilterSweep; 2],
}

impl TriggerPlan {
    pub fn new(patch: &PatchState, note: u8, velocity: f32, time: f64) -> Self {
        let osc = &patch.oscillators;
        let pitch = |settings: &OscillatorSettings| {
            midi_to_freq(f32::from(note) + settings.tune) * 2.0_f32.powf(settings.fine / 12.0)
        };
        let env = &patch.envelopes.filter;
        Self {
            time,
            velocity,
            freq_a: pitch(&osc.osc_a),
            freq_b: pitch(&osc.osc_b),
            freq_sub: midi_to_freq(f32::from(note)),
            sweeps: [
                FilterSweep::new(&patch.filters.filter1, env, note, velocity),
                FilterSweep::new(&patch.filters.filter2, env, note, velocity),
            ],
        }
    }
}

/// Partial parameter update for a voice; `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoiceModulation {
    pub osc_a_morph: Option<f32>,
    pub osc_b_morph: Option<f32>,
    pub filter1_cutoff: Option<f32>,
    pub filter2_cutoff: Option<f32>,
    pub sub_level: Option<f32>,
    pub drive: Option<f32>,
    pub fm_index: Option<f32>,
    pub pan: Option<f32>,
}

impl VoiceModulation {
    pub fn is_empty(&self) -> bool {
        *self == VoiceModulation::default()
    }

    /// Clamps every present field to the range a voice accepts.
    pub fn clamped(self) -> Self {
        let clamp = |v: Option<f32>, lo: f32, hi: f32| v.map(|x| x.clamp(lo, hi));
        Self {
            osc_a_morph: clamp(self.osc_a_morph, 0.0, 1.0),
            osc_b_morph: clamp(self.osc_b_morph, 0.0, 1.0),
            filter1_cutoff: clamp(self.filter1_cutoff, 20.0, 18_000.0),
            filter2_cutoff: clamp(self.filter2_cutoff, 20.0, 18_000.0),
            sub_level: clamp(self.sub_level, 0.0, 1.0),
            drive: clamp(self.drive, 0.5, 3.0),
            fm_index: clamp(self.fm_index, 0.0, 1.0),
            pan: clamp(self.pan, -1.0, 1.0),
        }
    }
}

/// Last modulation values forwarded to the render path.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModCache {
    pub osc_a_morph: Option<f32>,
    pub osc_b_morph: Option<f32>,
    pub drive: Option<f32>,
}

/// Control-side view of one voice slot.
#[derive(Debug, Clone)]
pub struct Voice {
    slot: usize,
    key: Option<NoteKey>,
    note: u8,
    velocity: f32,
    trigger_time: f64,
    serial: u64,
    stage: VoiceStage,
    sustain_time: f64,
    release_time: Option<f64>,
    finish_time: Option<f64>,
    cache: ModCache,
    morph_base: [f32; 2],
}

impl Voice {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            key: None,
            note: 0,
            velocity: 0.0,
            trigger_time: 0.0,
            serial: 0,
            stage: VoiceStage::Idle,
            sustain_time: 0.0,
            release_time: None,
            finish_time: None,
            cache: ModCache::default(),
            morph_base: [0.0; 2],
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn key(&self) -> Option<&NoteKey> {
        self.key.as_ref()
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn trigger_time(&self) -> f64 {
        self.trigger_time
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn stage(&self) -> VoiceStage {
        self.stage
    }

    pub fn release_time(&self) -> Option<f64> {
        self.release_time
    }

    pub fn finish_time(&self) -> Option<f64> {
        self.finish_time
    }

    pub fn cache(&self) -> &ModCache {
        &self.cache
    }

    pub fn is_idle(&self) -> bool {
        self.stage == VoiceStage::Idle
    }

    /// Sounding and not yet released.
    pub fn is_held(&self) -> bool {
        matches!(self.stage, VoiceStage::Triggered | VoiceStage::Sustaining)
    }

    /// Rebuilds render parameters from the patch and forgets cached modulation.
    pub fn update_from_patch(&mut self, patch: &PatchState) -> VoiceParams {
        self.cache = ModCache::default();
        self.morph_base = [
            patch.oscillators.osc_a.morph,
            patch.oscillators.osc_b.morph,
        ];
        VoiceParams::from_patch(patch)
    }

    pub fn trigger(
        &mut self,
        key: NoteKey,
        note: u8,
        velocity: f32,
        time: f64,
        serial: u64,
        patch: &PatchState,
    ) -> TriggerPlan {
        let amp = &patch.envelopes.amp;
        self.key = Some(key);
        self.note = note;
        self.velocity = velocity;
        self.trigger_time = time;
        self.serial = serial;
        self.stage = VoiceStage::Triggered;
        self.sustain_time = time + f64::from(amp.attack_time() + amp.decay_time());
        self.release_time = None;
        self.finish_time = None;
        TriggerPlan::new(patch, note, velocity, time)
    }

    /// Moves a held voice into its release. Returns `false` if nothing was held.
    pub fn release(&mut self, time: f64, amp: &EnvelopeGenerator) -> bool {
        if !self.is_held() {
            return false;
        }
        self.stage = VoiceStage::Releasing;
        self.release_time = Some(time);
        self.finish_time = Some(time + f64::from(amp.release_time()));
        true
    }

    pub fn force_stop(&mut self) {
        self.stage = VoiceStage::Idle;
        self.key = None;
        self.release_time = None;
        self.finish_time = None;
    }

    /// Advances the stage machine. Returns `true` when the voice just went idle.
    pub fn update(&mut self, now: f64) -> bool {
        match self.stage {
            VoiceStage::Triggered if now >= self.sustain_time => {
                self.stage = VoiceStage::Sustaining;
                false
            }
            VoiceStage::Releasing if self.finish_time.is_some_and(|t| now >= t) => {
                self.force_stop();
                true
            }
            _ => false,
        }
    }

    /// Clamps `modulation` and drops morph changes inside the deadband.
    /// Returns what should be forwarded to the render path.
    pub fn apply_modulation(&mut self, modulation: &VoiceModulation) -> Option<VoiceModulation> {
        let mut out = modulation.clamped();
        let morphs = [
            (&mut out.osc_a_morph, &mut self.cache.osc_a_morph, self.morph_base[0]),
            (&mut out.osc_b_morph, &mut self.cache.osc_b_morph, self.morph_base[1]),
        ];
        for (target, cached, base) in morphs {
            if let Some(morph) = *target {
                let previous = cached.unwrap_or(base);
                if (previous - morph).abs() > MORPH_DEADBAND {
                    *cached = Some(morph);
                } else {
                    *target = None;
                }
            }
        }
        if let Some(drive) = out.drive {
            self.cache.drive = Some(drive);
        }
        (!out.is_empty()).then_some(out)
    }
}
