use crate::synth::drums::DrumHit;

/// Eighth-note length at `tempo` BPM. A tempo of zero falls back to 120.
pub fn eighth_duration(tempo: f32) -> f64 {
    let tempo = if tempo > 0.0 { tempo } else { 120.0 };
    60.0 / f64::from(tempo) / 2.0
}

/// The fixed internal groove: kick on beats one and three, snare on two and
/// four, hat on every eighth.
pub fn hits_at(step: u64) -> impl Iterator<Item = DrumHit> {
    let kick = (step % 4 == 0).then_some(DrumHit::Kick);
    let snare = (step % 4 == 2).then_some(DrumHit::Snare);
    kick.into_iter().chain(snare).chain(Some(DrumHit::Hat))
}

/// Lookahead clock for the drum bus. Runs independently of the step
/// sequencer transport while rhythm is enabled.
#[derive(Debug, Clone, Default)]
pub struct RhythmClock {
    running: bool,
    next_time: f64,
    step: u64,
}

impl RhythmClock {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn next_time(&self) -> f64 {
        self.next_time
    }

    /// Starts at `now`. Already running clocks keep their phase.
    pub fn start(&mut self, now: f64) {
        if self.running {
            return;
        }
        self.running = true;
        self.next_time = now;
        self.step = 0;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Calls `emit` for every hit on an eighth before `horizon` and returns
    /// how many eighths were scheduled.
    pub fn tick<F>(&mut self, horizon: f64, tempo: f32, mut emit: F) -> usize
    where
        F: FnMut(DrumHit, f64),
    {
        if !self.running {
            return 0;
        }
        let mut scheduled = 0;
        while self.next_time < horizon {
            for hit in hits_at(self.step) {
                emit(hit, self.next_time);
            }
            self.next_time += eighth_duration(tempo);
            self.step += 1;
            scheduled += 1;
        }
        scheduled
    }
}
