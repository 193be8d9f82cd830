pub mod lane;
pub mod rhythm;
pub mod scheduler;

pub use lane::{default_lanes, AutomationTarget, SequencerLane, Step};
pub use rhythm::RhythmClock;
pub use scheduler::{step_duration, LookaheadScheduler, PlayState};

use crate::synth::note::NoteValue;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// What one sequencer step asks the engine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencerEvent {
    Trigger {
        lane: String,
        note: NoteValue,
        velocity: f32,
        time: f64,
        step: Step,
    },
    Automation {
        time: f64,
        targets: Vec<AutomationTarget>,
    },
}

impl SequencerEvent {
    pub fn time(&self) -> f64 {
        match self {
            SequencerEvent::Trigger { time, .. } | SequencerEvent::Automation { time, .. } => *time,
        }
    }
}

/// Walks every lane one step per scheduler tick.
#[derive(Debug, Clone)]
pub struct Sequencer {
    position: usize,
    rng: SmallRng,
}

impl Sequencer {
    pub fn new(seed: u64) -> Self {
        Self {
            position: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Plays the step at the current position of every lane at `time`, then
    /// advances the position.
    pub fn step(&mut self, time: f64, lanes: &[SequencerLane], tempo: f32) -> Vec<SequencerEvent> {
        let step_seconds = 0.25 * 60.0 / f64::from(tempo.max(1.0));
        let mut events = Vec::new();
        for lane in lanes {
            let Some(step) = lane.step_at(self.position) else {
                continue;
            };
            if self.rng.random::<f32>() > step.probability {
                continue;
            }
            if lane.is_automation() {
                events.push(SequencerEvent::Automation {
                    time,
                    targets: step.targets.clone(),
                });
                continue;
            }
            let ratchet = step.ratchet();
            for i in 0..ratchet {
                events.push(SequencerEvent::Trigger {
                    lane: lane.id.clone(),
                    note: step.note.clone(),
                    velocity: step.velocity,
                    time: time + f64::from(i) * step_seconds / f64::from(ratchet),
                    step: step.clone(),
                });
            }
        }
        self.position += 1;
        events
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(0)
    }
}
