use crate::synth::note::NoteValue;
use serde::{Deserialize, Serialize};

pub const MAX_STEPS: usize = 64;
pub const DEFAULT_STEPS: usize = 16;
/// Lane whose steps write patch parameters instead of playing notes.
pub const AUTOMATION_LANE: &str = "automation";

/// A patch parameter write carried by an automation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTarget {
    /// Dotted path into the patch, e.g. `"filters.filter1.cutoff"`.
    pub id: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    pub note: NoteValue,
    pub velocity: f32,
    pub tie: bool,
    pub slide: bool,
    pub ratchet: u32,
    pub probability: f32,
    /// Seconds between the trigger and its release.
    pub gate: f32,
    pub targets: Vec<AutomationTarget>,
}

impl Step {
    pub fn with_note(note: impl Into<NoteValue>) -> Self {
        Self {
            note: note.into(),
            ..Self::default()
        }
    }

    pub fn ratchet(&self) -> u32 {
        self.ratchet.max(1)
    }
}

impl Default for Step {
    fn default() -> Self {
        Self {
            note: NoteValue::default(),
            velocity: 0.8,
            tie: false,
            slide: false,
            ratchet: 1,
            probability: 1.0,
            gate: 0.45,
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SequencerLane {
    pub id: String,
    pub name: String,
    pub steps: usize,
    pub default_note: NoteValue,
    pub legato: bool,
    pub pattern: Vec<Option<Step>>,
}

impl SequencerLane {
    pub fn new(id: &str, name: &str, default_note: &str, legato: bool) -> Self {
        let mut lane = Self {
            id: id.to_string(),
            name: name.to_string(),
            steps: DEFAULT_STEPS,
            default_note: default_note.into(),
            legato,
            pattern: Vec::new(),
        };
        lane.resize(DEFAULT_STEPS);
        lane
    }

    pub fn is_automation(&self) -> bool {
        self.id == AUTOMATION_LANE
    }

    /// Sets the step count (clamped to `1..=MAX_STEPS`), filling new steps
    /// with the lane's default note.
    pub fn resize(&mut self, steps: usize) {
        let steps = steps.clamp(1, MAX_STEPS);
        let fill = Step::with_note(self.default_note.clone());
        self.pattern.resize(steps, Some(fill));
        self.steps = steps;
    }

    /// Replaces the pattern, padding or truncating it to `steps`.
    pub fn set_pattern(&mut self, steps: usize, pattern: Vec<Option<Step>>) {
        self.pattern = pattern;
        self.resize(steps);
    }

    pub fn step_at(&self, position: usize) -> Option<&Step> {
        if self.pattern.is_empty() {
            return None;
        }
        self.pattern[position % self.pattern.len()].as_ref()
    }
}

impl Default for SequencerLane {
    fn default() -> Self {
        Self::new("lane", "Lane", "C2", false)
    }
}

pub fn default_lanes() -> Vec<SequencerLane> {
    vec![
        SequencerLane::new("bass", "Bass", "C2", true),
        SequencerLane::new("stab", "Stab", "F3", false),
        SequencerLane::new("pad", "Pad", "A3", false),
        SequencerLane::new(AUTOMATION_LANE, "Automation", "C4", false),
    ]
}
