use super::effect::FxParams;
use super::envelope::EnvelopeGenerator;
use super::error::{EngineError, Result};
use super::filter::FilterType;
use super::master::{BusParams, SidechainParams, SidechainSource};
use super::modulation::{LfoShape, ModulationSlot, MOD_SLOTS};
use super::note::{key_offset, NoteValue};
use super::operator::FmSettings;
use super::wavetable::Timbre;
use crate::sequencer::lane::{default_lanes, SequencerLane, MAX_STEPS};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalSettings {
    pub bpm: f32,
    /// Percent of a sixteenth added to every odd step.
    pub swing: f32,
    /// Key root notes are transposed into.
    pub key: String,
    pub master_volume: f32,
    /// Limiter threshold in dB.
    pub limiter_ceiling: f32,
    /// Oversampling factor of the voice clipper, 1 to 4.
    pub quality: u32,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            bpm: 140.0,
            swing: 0.0,
            key: "C".to_string(),
            master_volume: 0.8,
            limiter_ceiling: -0.5,
            quality: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscillatorSettings {
    pub table: Timbre,
    pub morph: f32,
    /// Coarse tune in semitones.
    pub tune: f32,
    /// Fine tune in semitones.
    pub fine: f32,
    pub level: f32,
    pub pan: f32,
    pub phase: f32,
}

impl Default for OscillatorSettings {
    fn default() -> Self {
        Self {
            table: Timbre::SmoothSaw,
            morph: 0.3,
            tune: 0.0,
            fine: 0.0,
            level: 0.7,
            pan: -0.05,
            phase: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Oscillators {
    pub osc_a: OscillatorSettings,
    pub osc_b: OscillatorSettings,
}

impl Default for Oscillators {
    fn default() -> Self {
        Self {
            osc_a: OscillatorSettings::default(),
            osc_b: OscillatorSettings {
                table: Timbre::AiryBlend,
                morph: 0.2,
                level: 0.5,
                pan: 0.05,
                ..OscillatorSettings::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubSettings {
    pub level: f32,
    pub square_blend: f32,
    pub saturation: f32,
    pub legato: bool,
}

impl Default for SubSettings {
    fn default() -> Self {
        Self {
            level: 0.8,
            square_blend: 0.1,
            saturation: 0.25,
            legato: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterSettings {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub cutoff: f32,
    pub resonance: f32,
    pub drive: f32,
    /// Hz added at the envelope peak, scaled by velocity.
    pub env_amount: f32,
    /// Fraction of the note offset from middle C the cutoff follows.
    pub keytrack: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            cutoff: 220.0,
            resonance: 0.7,
            drive: 1.08,
            env_amount: 180.0,
            keytrack: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub serial: bool,
    pub mix: f32,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            serial: true,
            mix: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub filter1: FilterSettings,
    pub filter2: FilterSettings,
    pub routing: RoutingSettings,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            filter1: FilterSettings::default(),
            filter2: FilterSettings {
                filter_type: FilterType::Bandpass,
                cutoff: 520.0,
                resonance: 0.6,
                drive: 1.05,
                env_amount: 70.0,
                keytrack: 0.25,
            },
            routing: RoutingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelopes {
    pub amp: EnvelopeGenerator,
    pub filter: EnvelopeGenerator,
    #[serde(rename = "mod")]
    pub mod_env: EnvelopeGenerator,
}

impl Default for Envelopes {
    fn default() -> Self {
        Self {
            amp: EnvelopeGenerator::new(0.01, 0.2, 0.7, 0.4, 1.1),
            filter: EnvelopeGenerator::new(0.02, 0.3, 0.4, 0.4, 1.3),
            mod_env: EnvelopeGenerator::new(0.01, 0.22, 0.1, 0.3, 1.1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfoSettings {
    pub shape: LfoShape,
    /// Hz, or cycles per beat when `sync` is set.
    pub rate: f32,
    pub sync: bool,
    /// Phase offset in cycles.
    pub phase: f32,
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            shape: LfoShape::Sine,
            rate: 0.3,
            sync: true,
            phase: 0.0,
        }
    }
}

fn default_lfos() -> Vec<LfoSettings> {
    vec![
        LfoSettings::default(),
        LfoSettings {
            shape: LfoShape::Triangle,
            rate: 0.5,
            phase: 0.5,
            ..LfoSettings::default()
        },
        LfoSettings {
            shape: LfoShape::Sawtooth,
            rate: 0.75,
            ..LfoSettings::default()
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusSettings {
    pub depth: f32,
    pub rate: f32,
}

impl Default for ChorusSettings {
    fn default() -> Self {
        Self {
            depth: 0.2,
            rate: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelaySettings {
    pub time: f32,
    pub feedback: f32,
    pub mix: f32,
    pub ping_pong: bool,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            time: 0.32,
            feedback: 0.24,
            mix: 0.2,
            ping_pong: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub size: f32,
    pub mix: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            size: 1.0,
            mix: 0.25,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FxSettings {
    pub chorus: ChorusSettings,
    pub delay: DelaySettings,
    pub reverb: ReverbSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransientSettings {
    pub attack: f32,
    pub sustain: f32,
}

impl Default for TransientSettings {
    fn default() -> Self {
        Self {
            attack: 1.1,
            sustain: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerSettings {
    pub lanes: Vec<SequencerLane>,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
        }
    }
}

impl SequencerSettings {
    pub fn lane(&self, id: &str) -> Option<&SequencerLane> {
        self.lanes.iter().find(|lane| lane.id == id)
    }

    pub fn lane_mut(&mut self, id: &str) -> Option<&mut SequencerLane> {
        self.lanes.iter_mut().find(|lane| lane.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmSettings {
    /// Runs the internal drum bus.
    pub enabled: bool,
}

/// The held drone played from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceSettings {
    pub playing: bool,
    pub drone_note: NoteValue,
    pub drone_velocity: f32,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            playing: false,
            drone_note: NoteValue::from("C2"),
            drone_velocity: 0.65,
        }
    }
}

/// The complete, serializable sound and sequence of the synth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatchState {
    pub meta: PatchMeta,
    pub global: GlobalSettings,
    pub oscillators: Oscillators,
    pub sub: SubSettings,
    pub fm: FmSettings,
    pub filters: Filters,
    pub envelopes: Envelopes,
    pub lfo: Vec<LfoSettings>,
    pub fx: FxSettings,
    pub sidechain: SidechainParams,
    pub rhythm: RhythmSettings,
    pub transient: TransientSettings,
    pub mod_matrix: Vec<ModulationSlot>,
    pub performance: PerformanceSettings,
    pub sequencer: SequencerSettings,
}

impl Default for PatchState {
    fn default() -> Self {
        Self {
            meta: PatchMeta::default(),
            global: GlobalSettings::default(),
            oscillators: Oscillators::default(),
            sub: SubSettings::default(),
            fm: FmSettings::default(),
            filters: Filters::default(),
            envelopes: Envelopes::default(),
            lfo: default_lfos(),
            fx: FxSettings::default(),
            sidechain: SidechainParams::default(),
            rhythm: RhythmSettings::default(),
            transient: TransientSettings::default(),
            mod_matrix: Vec::new(),
            performance: PerformanceSettings::default(),
            sequencer: SequencerSettings::default(),
        }
    }
}

impl PatchState {
    /// Parses and validates a full patch document. Missing fields take their
    /// defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let patch: PatchState = serde_json::from_str(text)?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns this patch with `update` deep-merged on top. `self` is left
    /// untouched when the result does not validate.
    pub fn merged(&self, update: &Value) -> Result<Self> {
        let mut value = serde_json::to_value(self)?;
        deep_merge(&mut value, update);
        let patch: PatchState = serde_json::from_value(value)?;
        patch.validate()?;
        Ok(patch)
    }

    /// Writes `value` at a dotted path such as `"filters.filter1.cutoff"`,
    /// creating intermediate objects as needed.
    pub fn with_path(&self, path: &str, value: Value) -> Result<Self> {
        let mut update = value;
        for segment in path.rsplit('.') {
            if segment.is_empty() {
                return Err(EngineError::InvalidPatch(format!("bad path '{}'", path)));
            }
            let mut object = serde_json::Map::new();
            object.insert(segment.to_string(), update);
            update = Value::Object(object);
        }
        self.merged(&update)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mod_matrix.len() > MOD_SLOTS {
            return Err(EngineError::InvalidPatch(format!(
                "modMatrix has {} slots, at most {} allowed",
                self.mod_matrix.len(),
                MOD_SLOTS
            )));
        }
        for (i, slot) in self.mod_matrix.iter().enumerate() {
            if !(-1.0..=1.0).contains(&slot.amount) {
                return Err(EngineError::InvalidPatch(format!(
                    "modMatrix[{}] amount {} outside [-1, 1]",
                    i, slot.amount
                )));
            }
        }
        for lane in &self.sequencer.lanes {
            if lane.steps == 0 || lane.steps > MAX_STEPS {
                return Err(EngineError::InvalidPatch(format!(
                    "lane '{}' has {} steps",
                    lane.id, lane.steps
                )));
            }
            if lane.pattern.len() != lane.steps {
                return Err(EngineError::InvalidPatch(format!(
                    "lane '{}' pattern length {} does not match {} steps",
                    lane.id,
                    lane.pattern.len(),
                    lane.steps
                )));
            }
            if let Some(step) = lane.pattern.iter().flatten().find(|s| {
                !(0.0..=1.0).contains(&s.probability) || !s.velocity.is_finite()
            }) {
                return Err(EngineError::InvalidPatch(format!(
                    "lane '{}' has a step with probability {}",
                    lane.id, step.probability
                )));
            }
        }
        Ok(())
    }

    /// Semitones notes are shifted by for the patch key.
    pub fn transpose_offset(&self) -> u8 {
        key_offset(&self.global.key)
    }

    pub fn bus_params(&self) -> BusParams {
        let fx = &self.fx;
        BusParams {
            master_volume: self.global.master_volume.clamp(0.0, 1.0),
            limiter_ceiling: self.global.limiter_ceiling,
            fx: FxParams {
                chorus_depth: fx.chorus.depth,
                chorus_rate: fx.chorus.rate,
                delay_time: fx.delay.time,
                delay_feedback: fx.delay.feedback,
                delay_mix: fx.delay.mix,
                ping_pong: fx.delay.ping_pong,
                reverb_size: fx.reverb.size,
                reverb_mix: fx.reverb.mix,
            },
            sidechain: self.sidechain,
            drums_audible: self.rhythm.enabled
                && self.sidechain.source == SidechainSource::Internal,
        }
    }
}

/// Recursively merges `update` into `target`. Objects merge key by key;
/// everything else, arrays included, is replaced.
pub fn deep_merge(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (key, value) in update {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, update) => *target = update.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_round_trips() {
        let patch = PatchState::default();
        let json = patch.to_json().unwrap();
        assert!(!json.contains("\"name\""));
        assert_eq!(PatchState::from_json(&json).unwrap(), patch);
    }

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(PatchState::default()).unwrap();
        assert_eq!(value["global"]["masterVolume"], json!(0.8_f32));
        assert_eq!(value["filters"]["filter2"]["type"], json!("bandpass"));
        assert!(value["envelopes"]["mod"].is_object());
        assert!(value["modMatrix"].is_array());
        assert_eq!(value["oscillators"]["oscB"]["table"], json!("airyBlend"));
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let patch = PatchState::default();
        let merged = patch
            .merged(&json!({ "filters": { "filter1": { "cutoff": 900.0 } } }))
            .unwrap();
        assert_eq!(merged.filters.filter1.cutoff, 900.0);
        assert_eq!(merged.filters.filter1.resonance, 0.7);
        assert_eq!(merged.filters.filter2, patch.filters.filter2);
    }

    #[test]
    fn merge_rejects_bad_documents() {
        let patch = PatchState::default();
        assert!(patch.merged(&json!({ "global": { "bpm": "fast" } })).is_err());
        let slots: Vec<_> = (0..9)
            .map(|_| json!({ "source": "LFO1", "destination": "drive", "amount": 0.1 }))
            .collect();
        assert!(matches!(
            patch.merged(&json!({ "modMatrix": slots })),
            Err(EngineError::InvalidPatch(_))
        ));
        assert!(patch
            .merged(&json!({ "modMatrix": [{ "source": "LFO1", "destination": "drive", "amount": 1.5 }] }))
            .is_err());
    }

    #[test]
    fn path_writes_nested_value() {
        let patch = PatchState::default()
            .with_path("fx.reverb.mix", json!(0.6))
            .unwrap();
        assert_eq!(patch.fx.reverb.mix, 0.6);
        assert!(PatchState::default().with_path("fx..mix", json!(1)).is_err());
    }

    #[test]
    fn mismatched_pattern_fails_validation() {
        let mut patch = PatchState::default();
        patch.sequencer.lanes[0].pattern.pop();
        assert!(patch.validate().is_err());
    }

    #[test]
    fn bus_params_follow_patch() {
        let mut patch = PatchState::default();
        patch.fx.delay.ping_pong = true;
        patch.global.master_volume = 1.4;
        let bus = patch.bus_params();
        assert!(bus.fx.ping_pong);
        assert_eq!(bus.master_volume, 1.0);
        assert_eq!(bus.sidechain.amount, 0.25);
    }

    #[test]
    fn drums_reach_the_mix_only_for_an_internal_sidechain() {
        let mut patch = PatchState::default();
        assert!(!patch.bus_params().drums_audible);
        patch.rhythm.enabled = true;
        assert!(patch.bus_params().drums_audible);
        patch.sidechain.source = SidechainSource::Master;
        assert!(!patch.bus_params().drums_audible);
    }

    #[test]
    fn transport_blocks_read_their_json_names() {
        let patch = PatchState::default()
            .merged(&json!({
                "global": { "quality": 2 },
                "rhythm": { "enabled": true },
                "performance": { "droneNote": "E1", "droneVelocity": 0.4 }
            }))
            .unwrap();
        assert_eq!(patch.global.quality, 2);
        assert!(patch.rhythm.enabled);
        assert_eq!(patch.performance.drone_note.to_midi(), 28);
        assert_eq!(patch.performance.drone_velocity, 0.4);
        assert!(!patch.performance.playing);
    }
}
