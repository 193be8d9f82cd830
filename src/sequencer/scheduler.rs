use log::warn;

/// Transport state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
}

/// Sixteenth-note length at `tempo` BPM, with swing added to odd steps.
pub fn step_duration(tempo: f32, swing: f32, index: u64) -> f64 {
    let base = 60.0 / f64::from(tempo.max(1.0)) / 4.0;
    if index % 2 == 1 {
        base + base * f64::from(swing.clamp(0.0, 100.0)) * 0.01
    } else {
        base
    }
}

/// Emits step times that fall inside a fixed horizon ahead of the clock.
///
/// The control thread wakes every `tick_interval`; each wake schedules every
/// step that starts before `now + schedule_ahead`, so steps are stamped ahead
/// of the render clock and never late as long as the thread keeps its cadence.
#[derive(Debug, Clone)]
pub struct LookaheadScheduler {
    schedule_ahead: f64,
    tick_interval: f64,
    next_time: f64,
    step_index: u64,
    state: PlayState,
}

impl LookaheadScheduler {
    pub fn new(schedule_ahead: f64, tick_interval: f64) -> Self {
        let schedule_ahead = schedule_ahead.max(1e-3);
        let tick_interval = if tick_interval > 0.0 && tick_interval < schedule_ahead {
            tick_interval
        } else {
            warn!(
                "tick interval {}s must be below the {}s horizon, using {}s",
                tick_interval,
                schedule_ahead,
                schedule_ahead * 0.5
            );
            schedule_ahead * 0.5
        };
        Self {
            schedule_ahead,
            tick_interval,
            next_time: 0.0,
            step_index: 0,
            state: PlayState::Stopped,
        }
    }

    pub fn schedule_ahead(&self) -> f64 {
        self.schedule_ahead
    }

    pub fn tick_interval(&self) -> f64 {
        self.tick_interval
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Time of the next step to be emitted.
    pub fn next_time(&self) -> f64 {
        self.next_time
    }

    pub fn start(&mut self, now: f64) {
        self.next_time = now;
        self.step_index = 0;
        self.state = PlayState::Playing;
    }

    pub fn stop(&mut self) {
        self.state = PlayState::Stopped;
    }

    /// Calls `emit` for every step time before `now + schedule_ahead` and
    /// returns how many were emitted. Does nothing while stopped.
    pub fn tick<F>(&mut self, now: f64, tempo: f32, swing: f32, mut emit: F) -> usize
    where
        F: FnMut(f64),
    {
        if self.state != PlayState::Playing {
            return 0;
        }
        let horizon = now + self.schedule_ahead;
        let mut emitted = 0;
        while self.next_time < horizon {
            emit(self.next_time);
            self.next_time += step_duration(tempo, swing, self.step_index);
            self.step_index += 1;
            emitted += 1;
        }
        emitted
    }
}

impl Default for LookaheadScheduler {
    fn default() -> Self {
        Self::new(0.1, 0.025)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn step_duration_with_swing() {
        assert_relative_eq!(step_duration(120.0, 0.0, 0), 0.125);
        assert_relative_eq!(step_duration(120.0, 50.0, 0), 0.125);
        assert_relative_eq!(step_duration(120.0, 50.0, 1), 0.1875);
        assert_relative_eq!(step_duration(120.0, 500.0, 1), 0.25);
        // tempo is floored at 1 BPM
        assert_relative_eq!(step_duration(-5.0, 0.0, 0), 15.0);
    }

    #[test]
    fn emits_steps_inside_horizon() {
        let mut scheduler = LookaheadScheduler::new(0.1, 0.025);
        scheduler.start(1.0);
        let mut times = Vec::new();
        // 500 BPM: 30 ms steps
        scheduler.tick(1.0, 500.0, 0.0, |t| times.push(t));
        assert_eq!(times.len(), 4);
        assert_relative_eq!(times[0], 1.0);
        assert_relative_eq!(times[3], 1.09, epsilon = 1e-9);
        assert!(scheduler.next_time() >= 1.1);
    }

    #[test]
    fn times_strictly_increase_across_ticks() {
        let mut scheduler = LookaheadScheduler::default();
        scheduler.start(0.0);
        let mut times = Vec::new();
        let mut now = 0.0;
        for i in 0..200 {
            let tempo = if i % 3 == 0 { 90.0 } else { 174.0 };
            scheduler.tick(now, tempo, 30.0, |t| times.push(t));
            now += 0.025;
        }
        assert!(times.len() > 50);
        assert!(times.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn stopped_scheduler_is_silent() {
        let mut scheduler = LookaheadScheduler::default();
        assert_eq!(scheduler.tick(0.0, 140.0, 0.0, |_| {}), 0);
        scheduler.start(0.0);
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.tick(0.0, 140.0, 0.0, |_| {}), 0);
    }

    #[test]
    fn interval_not_below_horizon_is_clamped() {
        let scheduler = LookaheadScheduler::new(0.1, 0.2);
        assert_relative_eq!(scheduler.tick_interval(), 0.05);
    }
}
