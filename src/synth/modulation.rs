use super::error::EngineError;
use super::master::BusModulation;
use super::patch::PatchState;
use super::rng::DeterministicRng;
use super::voice::VoiceModulation;
use crate::synth::prelude::{HashMap, TAU};
use log::warn;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum number of modulation matrix slots in a patch.
pub const MOD_SLOTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModSource {
    #[serde(rename = "LFO1")]
    Lfo1,
    #[serde(rename = "LFO2")]
    Lfo2,
    #[serde(rename = "LFO3")]
    Lfo3,
    #[serde(rename = "MODENV")]
    ModEnv,
    Keytrack,
    Velocity,
    Aftertouch,
    EnvelopeFollower,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
    SampleHold,
}

impl LfoShape {
    /// Value of a periodic shape at `phase` in [0, 1). Sample-and-hold is
    /// stateful and handled by the engine.
    pub fn value(self, phase: f32) -> f32 {
        match self {
            LfoShape::Sine | LfoShape::SampleHold => (phase * TAU).sin(),
            LfoShape::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            LfoShape::Sawtooth => 2.0 * (phase - 0.5),
            LfoShape::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// One routing in the modulation matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulationSlot {
    pub source: ModSource,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub amount: f32,
}

impl ModulationSlot {
    pub fn new(source: ModSource, destination: &str, amount: f32) -> Self {
        Self {
            source,
            destination: destination.to_string(),
            amount,
        }
    }
}

/// Where a destination's value ends up once it passes the deadband.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModulationTargets {
    pub voice: VoiceModulation,
    pub bus: BusModulation,
}

/// A registered modulation destination.
pub struct Destination {
    pub key: &'static str,
    pub scale: f32,
    pub min: f32,
    pub max: f32,
    pub base: fn(&PatchState) -> f32,
    pub apply: fn(&mut ModulationTargets, f32),
}

pub static DESTINATIONS: [Destination; 12] = [
    Destination {
        key: "oscA.morph",
        scale: 0.5,
        min: 0.0,
        max: 1.0,
        base: |p| p.oscillators.osc_a.morph,
        apply: |t, v| t.voice.osc_a_morph = Some(v),
    },
    Destination {
        key: "oscB.morph",
        scale: 0.5,
        min: 0.0,
        max: 1.0,
        base: |p| p.oscillators.osc_b.morph,
        apply: |t, v| t.voice.osc_b_morph = Some(v),
    },
    Destination {
        key: "filter1.cutoff",
        scale: 2000.0,
        min: 40.0,
        max: 14_000.0,
        base: |p| p.filters.filter1.cutoff,
        apply: |t, v| t.voice.filter1_cutoff = Some(v),
    },
    Destination {
        key: "filter2.cutoff",
        scale: 1500.0,
        min: 40.0,
        max: 14_000.0,
        base: |p| p.filters.filter2.cutoff,
        apply: |t, v| t.voice.filter2_cutoff = Some(v),
    },
    Destination {
        key: "sub.level",
        scale: 0.4,
        min: 0.0,
        max: 1.0,
        base: |p| p.sub.level,
        apply: |t, v| t.voice.sub_level = Some(v),
    },
    Destination {
        key: "drive",
        scale: 0.4,
        min: 0.5,
        max: 2.5,
        base: |p| p.filters.filter1.drive,
        apply: |t, v| t.voice.drive = Some(v),
    },
    Destination {
        key: "fm.index",
        scale: 0.3,
        min: 0.0,
        max: 1.0,
        base: |p| p.fm.index,
        apply: |t, v| t.voice.fm_index = Some(v),
    },
    Destination {
        key: "delay.mix",
        scale: 0.5,
        min: 0.0,
        max: 1.0,
        base: |p| p.fx.delay.mix,
        apply: |t, v| t.bus.delay_mix = Some(v),
    },
    Destination {
        key: "reverb.mix",
        scale: 0.5,
        min: 0.0,
        max: 1.0,
        base: |p| p.fx.reverb.mix,
        apply: |t, v| t.bus.reverb_mix = Some(v),
    },
    Destination {
        key: "master.volume",
        scale: 0.8,
        min: 0.0,
        max: 1.0,
        base: |p| p.global.master_volume,
        apply: |t, v| t.bus.master_volume = Some(v),
    },
    Destination {
        key: "chorus.depth",
        scale: 0.3,
        min: 0.0,
        max: 1.0,
        base: |p| p.fx.chorus.depth,
        apply: |t, v| t.bus.chorus_depth = Some(v),
    },
    Destination {
        key: "panner",
        scale: 1.0,
        min: -1.0,
        max: 1.0,
        base: |_| 0.0,
        apply: |t, v| t.voice.pan = Some(v),
    },
];

pub fn destination(key: &str) -> Option<&'static Destination> {
    DESTINATIONS.iter().find(|d| d.key == key)
}

/// Engine state the sources read from, sampled once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationInputs {
    pub now: f64,
    pub bpm: f32,
    /// Mod envelope level in [0, 1].
    pub mod_env: f32,
    pub last_note: u8,
    pub last_velocity: f32,
    pub aftertouch: f32,
    pub follower: f32,
}

impl Default for ModulationInputs {
    fn default() -> Self {
        Self {
            now: 0.0,
            bpm: 140.0,
            mod_env: 0.0,
            last_note: 60,
            last_velocity: 0.8,
            aftertouch: 0.0,
            follower: 0.0,
        }
    }
}

/// A value that passed clamping and the deadband.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationWrite {
    pub destination: &'static str,
    pub value: f32,
}

impl ModulationWrite {
    pub fn apply(&self, targets: &mut ModulationTargets) {
        if let Some(dest) = destination(self.destination) {
            (dest.apply)(targets, self.value);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LfoState {
    held: f32,
    last_phase: f32,
}

/// Control-rate modulation matrix evaluator.
pub struct ModulationEngine {
    lfo_state: Vec<LfoState>,
    random_cache: [Option<f32>; MOD_SLOTS],
    last_values: HashMap<&'static str, f32>,
    warned: HashSet<String>,
    sample_hold_rng: SmallRng,
    deadband: f32,
}

impl ModulationEngine {
    pub fn new(seed: u64, deadband: f32) -> Self {
        Self {
            lfo_state: Vec::new(),
            random_cache: [None; MOD_SLOTS],
            last_values: HashMap::new(),
            warned: HashSet::new(),
            sample_hold_rng: SmallRng::seed_from_u64(seed),
            deadband,
        }
    }

    /// Resizes LFO state for the patch and forgets previous writes so the
    /// next tick re-sends every modulated value.
    pub fn refresh(&mut self, patch: &PatchState) {
        let rng = &mut self.sample_hold_rng;
        self.lfo_state.resize_with(patch.lfo.len(), || LfoState {
            held: rng.random::<f32>() * 2.0 - 1.0,
            last_phase: 0.0,
        });
        self.last_values.clear();
    }

    /// Drops cached `Random` draws; the next tick draws fresh ones.
    pub fn reroll_random(&mut self) {
        self.random_cache = [None; MOD_SLOTS];
    }

    pub fn last_value(&self, destination: &str) -> Option<f32> {
        self.last_values.get(destination).copied()
    }

    fn lfo_value(&mut self, index: usize, patch: &PatchState, inputs: &ModulationInputs) -> f32 {
        let Some(lfo) = patch.lfo.get(index) else {
            return 0.0;
        };
        let mut rate = f64::from(lfo.rate.max(1e-4));
        if lfo.sync {
            rate *= f64::from(inputs.bpm.max(1.0)) / 60.0;
        }
        let offset = f64::from(lfo.phase).rem_euclid(1.0);
        let phase = (inputs.now * rate + offset).rem_euclid(1.0) as f32;
        if lfo.shape != LfoShape::SampleHold {
            return lfo.shape.value(phase);
        }
        if index >= self.lfo_state.len() {
            self.refresh_lfo_len(index + 1);
        }
        let rng = &mut self.sample_hold_rng;
        let state = &mut self.lfo_state[index];
        if phase < state.last_phase {
            state.held = rng.random::<f32>() * 2.0 - 1.0;
        }
        state.last_phase = phase;
        state.held
    }

    fn refresh_lfo_len(&mut self, len: usize) {
        let rng = &mut self.sample_hold_rng;
        self.lfo_state.resize_with(len, || LfoState {
            held: rng.random::<f32>() * 2.0 - 1.0,
            last_phase: 0.0,
        });
    }

    fn source_value(
        &mut self,
        slot_index: usize,
        source: ModSource,
        patch: &PatchState,
        inputs: &ModulationInputs,
        rng: &mut DeterministicRng,
    ) -> f32 {
        match source {
            ModSource::Lfo1 => self.lfo_value(0, patch, inputs),
            ModSource::Lfo2 => self.lfo_value(1, patch, inputs),
            ModSource::Lfo3 => self.lfo_value(2, patch, inputs),
            ModSource::ModEnv => inputs.mod_env * 2.0 - 1.0,
            ModSource::Keytrack => ((f32::from(inputs.last_note) - 60.0) / 24.0).clamp(-1.0, 1.0),
            ModSource::Velocity => (inputs.last_velocity * 2.0 - 1.0).clamp(-1.0, 1.0),
            ModSource::Aftertouch => (inputs.aftertouch * 2.0 - 1.0).clamp(-1.0, 1.0),
            ModSource::EnvelopeFollower => (inputs.follower * 2.0 - 1.0).clamp(-1.0, 1.0),
            ModSource::Random => match self.random_cache.get_mut(slot_index) {
                Some(cached) => *cached.get_or_insert_with(|| rng.next_bipolar()),
                None => rng.next_bipolar(),
            },
        }
    }

    /// Evaluates the matrix and returns the writes that changed by more than
    /// the deadband since the last one.
    pub fn tick(
        &mut self,
        patch: &PatchState,
        inputs: &ModulationInputs,
        rng: &mut DeterministicRng,
    ) -> Vec<ModulationWrite> {
        let mut sums: Vec<(&str, f32)> = Vec::new();
        for (i, slot) in patch.mod_matrix.iter().enumerate() {
            if slot.amount == 0.0 || slot.destination.is_empty() {
                continue;
            }
            let value = self.source_value(i, slot.source, patch, inputs, rng);
            if value.is_nan() {
                continue;
            }
            let contribution = value * slot.amount;
            match sums.iter_mut().find(|(key, _)| *key == slot.destination) {
                Some((_, sum)) => *sum += contribution,
                None => sums.push((slot.destination.as_str(), contribution)),
            }
        }

        let mut writes = Vec::new();
        for (key, sum) in sums {
            let Some(dest) = destination(key) else {
                if self.warned.insert(key.to_string()) {
                    warn!("{}", EngineError::InvalidDestination(key.to_string()));
                }
                continue;
            };
            let base = (dest.base)(patch);
            let value = (base + sum * dest.scale).clamp(dest.min, dest.max);
            if value.is_nan() {
                continue;
            }
            let previous = self.last_values.get(dest.key).copied().unwrap_or(base);
            if (previous - value).abs() < self.deadband {
                continue;
            }
            self.last_values.insert(dest.key, value);
            writes.push(ModulationWrite {
                destination: dest.key,
                value,
            });
        }
        writes
    }

    /// Folds writes into per-voice and bus updates.
    pub fn targets(writes: &[ModulationWrite]) -> ModulationTargets {
        let mut targets = ModulationTargets::default();
        for write in writes {
            write.apply(&mut targets);
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::patch::LfoSettings;

    fn patch_with(slots: Vec<ModulationSlot>) -> PatchState {
        let mut patch = PatchState::default();
        patch.mod_matrix = slots;
        patch
    }

    fn engine() -> ModulationEngine {
        ModulationEngine::new(7, 1e-3)
    }

    #[test]
    fn square_lfo_scenario() {
        let mut patch = patch_with(vec![ModulationSlot::new(ModSource::Lfo1, "filter1.cutoff", 1.0)]);
        patch.lfo = vec![LfoSettings {
            shape: LfoShape::Square,
            rate: 1.0,
            sync: false,
            phase: 0.0,
        }];
        patch.filters.filter1.cutoff = 220.0;
        let mut engine = engine();
        engine.refresh(&patch);
        let mut rng = DeterministicRng::new(1);
        let at = |now| ModulationInputs {
            now,
            ..ModulationInputs::default()
        };
        let writes = engine.tick(&patch, &at(0.25), &mut rng);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].destination, "filter1.cutoff");
        assert_eq!(writes[0].value, 2220.0);
        let writes = engine.tick(&patch, &at(0.75), &mut rng);
        assert_eq!(writes[0].value, 40.0);
        assert!(engine.tick(&patch, &at(0.8), &mut rng).is_empty());
    }

    #[test]
    fn every_write_is_clamped() {
        for dest in DESTINATIONS.iter() {
            let patch = patch_with(vec![
                ModulationSlot::new(ModSource::Velocity, dest.key, 1.0),
                ModulationSlot::new(ModSource::Aftertouch, dest.key, 1.0),
            ]);
            let mut engine = engine();
            let mut rng = DeterministicRng::default();
            for (velocity, aftertouch) in [(1.0, 1.0), (0.0, 0.0)] {
                let inputs = ModulationInputs {
                    last_velocity: velocity,
                    aftertouch,
                    ..ModulationInputs::default()
                };
                for write in engine.tick(&patch, &inputs, &mut rng) {
                    assert!(write.value >= dest.min && write.value <= dest.max);
                }
            }
        }
    }

    #[test]
    fn contributions_sum_per_destination() {
        let patch = patch_with(vec![
            ModulationSlot::new(ModSource::Velocity, "sub.level", 0.5),
            ModulationSlot::new(ModSource::Keytrack, "sub.level", -0.25),
        ]);
        let inputs = ModulationInputs {
            last_velocity: 1.0,
            last_note: 84,
            ..ModulationInputs::default()
        };
        let writes = engine().tick(&patch, &inputs, &mut DeterministicRng::default());
        // 0.8 + (0.5 - 0.25) * 0.4
        assert_eq!(writes.len(), 1);
        assert!((writes[0].value - 0.9).abs() < 1e-6);
    }

    #[test]
    fn unknown_destination_is_skipped() {
        let patch = patch_with(vec![
            ModulationSlot::new(ModSource::Velocity, "nowhere", 1.0),
            ModulationSlot::new(ModSource::Velocity, "panner", 1.0),
        ]);
        let inputs = ModulationInputs {
            last_velocity: 1.0,
            ..ModulationInputs::default()
        };
        let mut engine = engine();
        let writes = engine.tick(&patch, &inputs, &mut DeterministicRng::default());
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].destination, "panner");
        assert!(engine.warned.contains("nowhere"));
    }

    #[test]
    fn random_source_holds_until_rerolled() {
        let patch = patch_with(vec![ModulationSlot::new(ModSource::Random, "panner", 1.0)]);
        let mut engine = ModulationEngine::new(1, 0.0);
        let mut rng = DeterministicRng::new(99);
        let inputs = ModulationInputs::default();
        let first = engine.tick(&patch, &inputs, &mut rng);
        assert!(engine.tick(&patch, &inputs, &mut rng).is_empty());
        engine.reroll_random();
        let second = engine.tick(&patch, &inputs, &mut rng);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].value, second[0].value);
    }

    #[test]
    fn targets_route_voice_and_bus() {
        let writes = [
            ModulationWrite {
                destination: "reverb.mix",
                value: 0.4,
            },
            ModulationWrite {
                destination: "fm.index",
                value: 0.3,
            },
        ];
        let targets = ModulationEngine::targets(&writes);
        assert_eq!(targets.bus.reverb_mix, Some(0.4));
        assert_eq!(targets.voice.fm_index, Some(0.3));
        assert_eq!(targets.voice.pan, None);
    }

    #[test]
    fn shapes() {
        assert_eq!(LfoShape::Triangle.value(0.5), 1.0);
        assert_eq!(LfoShape::Triangle.value(0.0), -1.0);
        assert_eq!(LfoShape::Sawtooth.value(0.0), -1.0);
        assert_eq!(LfoShape::Square.value(0.49), 1.0);
        let shape: LfoShape = serde_json::from_str("\"sample-hold\"").unwrap();
        assert_eq!(shape, LfoShape::SampleHold);
    }
}
