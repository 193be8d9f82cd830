use super::config::SynthConfig;
use super::context::RenderContext;
use super::core::{RenderCommand, Synth};
use super::envelope::EnvelopeGenerator;
use super::error::{EngineError, Result};
use super::modulation::{ModulationEngine, ModulationInputs};
use super::note::{transpose, NoteKey, NoteValue, DEFAULT_MIDI_NOTE, DRONE_LANE, MANUAL_LANE};
use super::patch::{PatchState, PerformanceSettings};
use super::pool::{Allocation, VoicePool};
use super::presets::{randomize, PresetBank};
use super::rng::DeterministicRng;
use super::wavetable::WaveTableBank;
use crate::sequencer::{LookaheadScheduler, RhythmClock, Sequencer, SequencerEvent, Step};
use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, info, warn};
use std::sync::Arc;

/// Gate used when a lane note arrives without a step.
const DEFAULT_GATE: f32 = 0.4;
const DEFAULT_VELOCITY: f32 = 0.8;

/// A release scheduled for one specific trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingRelease {
    pub slot: usize,
    pub serial: u64,
    pub time: f64,
}

/// Engine-wide mod envelope, retriggered by every note.
#[derive(Debug, Clone, Copy, Default)]
struct ModEnvelopeState {
    start: Option<f64>,
    velocity: f32,
    release_time: Option<f64>,
    release_level: f32,
}

impl ModEnvelopeState {
    fn trigger(&mut self, time: f64, velocity: f32) {
        self.start = Some(time);
        self.velocity = velocity;
        self.release_time = None;
    }

    fn release(&mut self, env: &EnvelopeGenerator, time: f64) {
        self.release_level = self.level(env, time);
        self.release_time = Some(time);
    }

    fn silence(&mut self, time: f64) {
        self.release_level = 0.0;
        self.release_time = Some(time);
    }

    fn level(&self, env: &EnvelopeGenerator, time: f64) -> f32 {
        let Some(start) = self.start else {
            return 0.0;
        };
        if let Some(release) = self.release_time {
            if time >= release {
                return env.release_value_at((time - release) as f32, self.release_level);
            }
        }
        if time < start {
            return 0.0;
        }
        env.value_at((time - start) as f32, self.velocity)
    }
}

/// Control surface of the synth. Owns the patch, the voice pool, the
/// modulation matrix and the sequencer, and drives the render-side [`Synth`]
/// through a command queue.
pub struct SynthEngine {
    config: SynthConfig,
    patch: PatchState,
    pool: VoicePool,
    modulation: ModulationEngine,
    scheduler: LookaheadScheduler,
    sequencer: Sequencer,
    rhythm: RhythmClock,
    rng: DeterministicRng,
    presets: PresetBank,
    commands: Sender<RenderCommand>,
    context: Arc<RenderContext>,
    pending_releases: Vec<PendingRelease>,
    drone: Option<u8>,
    mod_env: ModEnvelopeState,
    last_note: u8,
    last_velocity: f32,
    aftertouch: f32,
    dropped_commands: u64,
}

impl SynthEngine {
    /// Builds the control side and the render side it drives.
    pub fn new(config: SynthConfig) -> (SynthEngine, Synth) {
        let config = config.sanitized();
        let (tx, rx) = bounded(config.command_capacity);
        let context = Arc::new(RenderContext::default());
        let bank = Arc::new(WaveTableBank::new());
        let synth = Synth::new(
            rx,
            context.clone(),
            bank,
            config.max_voices,
            config.glide_seconds,
        );
        let presets = PresetBank::factory().unwrap_or_else(|e| {
            warn!("factory presets unavailable: {}", e);
            PresetBank::default()
        });
        let seed = u64::from(config.seed);
        let mut engine = SynthEngine {
            pool: VoicePool::new(config.max_voices),
            modulation: ModulationEngine::new(seed, config.deadband),
            scheduler: LookaheadScheduler::new(config.schedule_ahead, config.tick_interval),
            sequencer: Sequencer::new(seed.rotate_left(32)),
            rhythm: RhythmClock::default(),
            rng: DeterministicRng::new(config.seed),
            presets,
            commands: tx,
            context,
            pending_releases: Vec::new(),
            drone: None,
            mod_env: ModEnvelopeState::default(),
            last_note: DEFAULT_MIDI_NOTE,
            last_velocity: DEFAULT_VELOCITY,
            aftertouch: 0.0,
            dropped_commands: 0,
            patch: PatchState::default(),
            config,
        };
        engine.apply_patch(PatchState::default());
        info!(
            "engine ready: {} voices, {}s lookahead",
            engine.config.max_voices, engine.config.schedule_ahead
        );
        (engine, synth)
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn patch(&self) -> &PatchState {
        &self.patch
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }

    pub fn pending_releases(&self) -> &[PendingRelease] {
        &self.pending_releases
    }

    /// Commands dropped because the render queue was full.
    pub fn dropped_commands(&self) -> u64 {
        self.dropped_commands
    }

    pub fn now(&self) -> f64 {
        self.context.now()
    }

    fn send(&mut self, command: RenderCommand) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_commands += 1;
                warn!("render queue full, dropped a command");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("render path gone, command discarded");
            }
        }
    }

    /// Makes `patch` current and pushes it to every voice and the bus.
    fn apply_patch(&mut self, patch: PatchState) {
        self.patch = patch;
        self.patch.performance.playing = self.drone.is_some();
        let mut configures = Vec::with_capacity(self.pool.capacity());
        for voice in self.pool.voices_mut() {
            let params = voice.update_from_patch(&self.patch);
            configures.push(RenderCommand::Configure {
                slot: voice.slot(),
                params,
            });
        }
        for command in configures {
            self.send(command);
        }
        self.send(RenderCommand::ConfigureBus(self.patch.bus_params()));
        self.modulation.refresh(&self.patch);
        self.update_rhythm_clock();
    }

    fn update_rhythm_clock(&mut self) {
        let enabled = self.patch.rhythm.enabled;
        if enabled && !self.rhythm.is_running() {
            let now = self.now();
            self.rhythm.start(now);
            info!("drum bus started at {:.3}s", now);
        } else if !enabled && self.rhythm.is_running() {
            self.rhythm.stop();
            info!("drum bus stopped");
        }
    }

    /// Deep-merges a partial patch document. On error the current patch is
    /// kept.
    pub fn update_patch(&mut self, update: &serde_json::Value) -> Result<()> {
        let patch = self.patch.merged(update)?;
        self.apply_patch(patch);
        Ok(())
    }

    pub fn export_patch(&self) -> Result<String> {
        self.patch.to_json()
    }

    pub fn import_patch(&mut self, json: &str) -> Result<()> {
        let patch = PatchState::from_json(json)?;
        self.apply_patch(patch);
        Ok(())
    }

    pub fn preset_names(&self) -> Vec<String> {
        self.presets.names()
    }

    pub fn load_preset(&mut self, name: &str) -> Result<()> {
        let patch = self.presets.get(name)?.clone();
        info!("loading preset '{}'", name);
        self.apply_patch(patch);
        Ok(())
    }

    /// Rewrites the randomizable parameters from `seed`.
    pub fn randomize(&mut self, seed: u32) {
        let mut patch = self.patch.clone();
        randomize(&mut patch, seed);
        self.apply_patch(patch);
    }

    pub fn set_aftertouch(&mut self, value: f32) {
        self.aftertouch = value.clamp(0.0, 1.0);
    }

    fn lane_legato(&self, lane: &str) -> bool {
        self.patch.sub.legato && self.patch.sequencer.lane(lane).is_some_and(|l| l.legato)
    }

    /// Allocates and triggers a voice. Returns the slot and trigger serial.
    fn start_voice(
        &mut self,
        key: NoteKey,
        midi: u8,
        velocity: f32,
        time: f64,
        legato: bool,
    ) -> Option<(usize, u64)> {
        let amp = self.patch.envelopes.amp;
        let acquired = self.pool.acquire(&key, legato, time, &amp);
        if let Some(slot) = acquired.released {
            self.send(RenderCommand::Release { slot, time });
        }
        if acquired.allocation == Allocation::Stolen {
            debug!("{} took stolen voice {}", key, acquired.slot);
        }
        let serial = self.pool.next_serial();
        let voice = self.pool.voice_mut(acquired.slot)?;
        let plan = voice.trigger(key, midi, velocity, time, serial, &self.patch);
        self.send(RenderCommand::Trigger {
            slot: acquired.slot,
            plan,
        });
        self.last_note = midi;
        self.last_velocity = velocity;
        self.mod_env.trigger(time, velocity);
        self.modulation.reroll_random();
        self.context.publish_active_voices(self.pool.active_count());
        Some((acquired.slot, serial))
    }

    pub fn note_on(&mut self, note: impl Into<NoteValue>, velocity: f32) {
        self.note_on_lane(note, velocity, MANUAL_LANE);
    }

    /// Starts a held note now. The note is shifted into the patch key; the
    /// active-notes map keeps the note as given so `note_off` finds it.
    pub fn note_on_lane(&mut self, note: impl Into<NoteValue>, velocity: f32, lane: &str) {
        let midi = note.into().to_midi();
        let played = transpose(midi, self.patch.transpose_offset());
        let legato = self.lane_legato(lane);
        let now = self.now();
        self.start_voice(
            NoteKey::new(lane, midi),
            played,
            velocity.clamp(0.0, 1.0),
            now,
            legato,
        );
    }

    pub fn note_off(&mut self, note: impl Into<NoteValue>) {
        self.note_off_lane(note, MANUAL_LANE);
    }

    /// Releases a held note now. Unknown notes are ignored.
    pub fn note_off_lane(&mut self, note: impl Into<NoteValue>, lane: &str) {
        let key = NoteKey::new(lane, note.into().to_midi());
        let now = self.now();
        let amp = self.patch.envelopes.amp;
        if let Some(slot) = self.pool.release(&key, now, &amp) {
            self.send(RenderCommand::Release { slot, time: now });
            self.mod_env.release(&self.patch.envelopes.mod_env, now);
        }
    }

    /// Plays a sequencer note at `time`. Ignored while the sequencer is
    /// stopped. Unless the step ties, its release is queued at `time + gate`.
    pub fn trigger_lane_note(
        &mut self,
        lane: &str,
        note: &NoteValue,
        velocity: f32,
        time: f64,
        step: Option<&Step>,
    ) {
        if !self.scheduler.is_running() {
            return;
        }
        let midi = note.to_midi();
        let played = transpose(midi, self.patch.transpose_offset());
        let slide = step.is_some_and(|s| s.slide);
        let legato = self.lane_legato(lane) || slide;
        let Some((slot, serial)) = self.start_voice(
            NoteKey::new(lane, midi),
            played,
            velocity.clamp(0.0, 1.0),
            time,
            legato,
        ) else {
            return;
        };
        if step.is_some_and(|s| s.tie) {
            return;
        }
        let gate = step.map_or(DEFAULT_GATE, |s| s.gate.max(0.0));
        self.pending_releases.push(PendingRelease {
            slot,
            serial,
            time: time + f64::from(gate),
        });
    }

    /// Replaces a lane's pattern. Fails for unknown lanes.
    pub fn set_sequencer_lane(
        &mut self,
        lane: &str,
        steps: usize,
        pattern: Vec<Option<Step>>,
    ) -> Result<()> {
        let target = self
            .patch
            .sequencer
            .lane_mut(lane)
            .ok_or_else(|| EngineError::InvalidPatch(format!("unknown lane '{}'", lane)))?;
        target.set_pattern(steps, pattern);
        Ok(())
    }

    pub fn is_rhythm_running(&self) -> bool {
        self.rhythm.is_running()
    }

    /// Turns the internal drum bus on or off. It is heard, and drives the
    /// follower, only while the sidechain listens internally.
    pub fn set_rhythm_enabled(&mut self, enabled: bool) {
        self.patch.rhythm.enabled = enabled;
        self.send(RenderCommand::ConfigureBus(self.patch.bus_params()));
        self.update_rhythm_clock();
        if !enabled {
            self.send(RenderCommand::StopDrums);
        }
    }

    pub fn is_drone_playing(&self) -> bool {
        self.drone.is_some()
    }

    /// Holds the patch's drone note until [`SynthEngine::stop_drone`].
    /// A playing drone is restarted.
    pub fn start_drone(&mut self) {
        self.stop_drone();
        let performance = &self.patch.performance;
        let note = performance.drone_note.to_midi();
        let velocity = if performance.drone_velocity.is_finite() {
            performance.drone_velocity.clamp(0.0, 1.0)
        } else {
            PerformanceSettings::default().drone_velocity
        };
        self.note_on_lane(note, velocity, DRONE_LANE);
        self.drone = Some(note);
        self.patch.performance.playing = true;
        self.patch.performance.drone_velocity = velocity;
        info!("drone on {} at {:.2}", note, velocity);
    }

    pub fn stop_drone(&mut self) {
        if let Some(note) = self.drone.take() {
            self.note_off_lane(note, DRONE_LANE);
            debug!("drone released");
        }
        self.patch.performance.playing = false;
    }

    pub fn is_sequencer_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn start_sequencer(&mut self) {
        let now = self.now();
        self.sequencer.reset();
        self.scheduler.start(now);
        info!("sequencer started at {:.3}s", now);
    }

    /// Stops scheduling. Releases already queued still go out.
    pub fn stop_sequencer(&mut self) {
        self.scheduler.stop();
        info!("sequencer stopped");
    }

    /// Silences every voice and the drum bus immediately and forgets queued
    /// releases. The drone stops too.
    pub fn stop_all(&mut self) {
        self.drone = None;
        self.patch.performance.playing = false;
        if self.rhythm.is_running() {
            self.rhythm.stop();
            self.patch.rhythm.enabled = false;
            self.send(RenderCommand::ConfigureBus(self.patch.bus_params()));
        }
        self.send(RenderCommand::StopDrums);
        let now = self.now();
        for slot in self.pool.stop_all() {
            self.send(RenderCommand::Silence { slot, time: now });
        }
        self.pending_releases.clear();
        self.mod_env.silence(now);
        self.context.publish_active_voices(0);
    }

    pub fn active_voice_count(&self) -> usize {
        self.pool.active_count()
    }

    fn handle_sequencer_event(&mut self, event: SequencerEvent) {
        match event {
            SequencerEvent::Trigger {
                lane,
                note,
                velocity,
                time,
                step,
            } => self.trigger_lane_note(&lane, &note, velocity, time, Some(&step)),
            SequencerEvent::Automation { targets, .. } => {
                if targets.is_empty() {
                    return;
                }
                let mut patch = self.patch.clone();
                let mut written = false;
                for target in targets {
                    match patch.with_path(&target.id, target.value) {
                        Ok(next) => {
                            patch = next;
                            written = true;
                        }
                        Err(e) => warn!("automation '{}' skipped: {}", target.id, e),
                    }
                }
                if written && patch != self.patch {
                    self.apply_patch(patch);
                }
            }
        }
    }

    fn flush_releases(&mut self, horizon: f64) {
        let amp = self.patch.envelopes.amp;
        let mut due = Vec::new();
        self.pending_releases.retain(|release| {
            if release.time < horizon {
                due.push(*release);
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.time.total_cmp(&b.time));
        for release in due {
            if self
                .pool
                .release_trigger(release.slot, release.serial, release.time, &amp)
            {
                self.send(RenderCommand::Release {
                    slot: release.slot,
                    time: release.time,
                });
                self.mod_env
                    .release(&self.patch.envelopes.mod_env, release.time);
            }
        }
    }

    fn run_modulation(&mut self, now: f64) {
        let inputs = ModulationInputs {
            now,
            bpm: self.patch.global.bpm,
            mod_env: self.mod_env.level(&self.patch.envelopes.mod_env, now),
            last_note: self.last_note,
            last_velocity: self.last_velocity,
            aftertouch: self.aftertouch,
            follower: self.context.follower_level(),
        };
        let writes = self.modulation.tick(&self.patch, &inputs, &mut self.rng);
        if writes.is_empty() {
            return;
        }
        let targets = ModulationEngine::targets(&writes);
        if !targets.voice.is_empty() {
            let mut updates = Vec::new();
            for voice in self.pool.voices_mut() {
                if let Some(modulation) = voice.apply_modulation(&targets.voice) {
                    updates.push(RenderCommand::Modulate {
                        slot: voice.slot(),
                        modulation,
                    });
                }
            }
            for update in updates {
                self.send(update);
            }
        }
        if !targets.bus.is_empty() {
            self.send(RenderCommand::ModulateBus(targets.bus));
        }
    }

    /// Control-rate entry point: schedules sequencer steps and drum hits
    /// inside the lookahead horizon, sends due releases, reaps finished voices and
    /// evaluates the modulation matrix.
    pub fn tick(&mut self) {
        let now = self.now();
        let bpm = self.patch.global.bpm;
        let swing = self.patch.global.swing;

        let mut step_times = Vec::new();
        self.scheduler.tick(now, bpm, swing, |t| step_times.push(t));
        for time in step_times {
            let events = self
                .sequencer
                .step(time, &self.patch.sequencer.lanes, self.patch.global.bpm);
            for event in events {
                self.handle_sequencer_event(event);
            }
        }

        let horizon = now + self.scheduler.schedule_ahead();
        let mut hits = Vec::new();
        self.rhythm.tick(horizon, bpm, |hit, time| {
            hits.push(RenderCommand::Drum { hit, time })
        });
        for hit in hits {
            self.send(hit);
        }

        self.flush_releases(horizon);
        let freed = self.pool.reap(now);
        if freed > 0 {
            debug!("{} voices finished", freed);
        }
        self.run_modulation(now);
        self.context.publish_active_voices(self.pool.active_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::note::note_name_to_midi;
    use serde_json::json;

    fn engine() -> (SynthEngine, Synth) {
        SynthEngine::new(SynthConfig::default())
    }

    #[test]
    fn note_on_and_off_map_and_release() {
        let (mut engine, _synth) = engine();
        engine.note_on("C3", 0.9);
        assert_eq!(engine.active_voice_count(), 1);
        let key = NoteKey::new(MANUAL_LANE, note_name_to_midi("C3"));
        let slot = engine.pool().slot_for(&key).unwrap();
        engine.note_off("C3");
        assert_eq!(engine.pool().slot_for(&key), None);
        assert!(!engine.pool().voice(slot).unwrap().is_held());
    }

    #[test]
    fn key_transposes_played_note_only() {
        let (mut engine, _synth) = engine();
        engine
            .update_patch(&json!({ "global": { "key": "D" } }))
            .unwrap();
        engine.note_on(60u8, 0.8);
        let slot = engine
            .pool()
            .slot_for(&NoteKey::new(MANUAL_LANE, 60))
            .unwrap();
        assert_eq!(engine.pool().voice(slot).unwrap().note(), 62);
    }

    #[test]
    fn invalid_update_keeps_patch() {
        let (mut engine, _synth) = engine();
        let before = engine.patch().clone();
        let err = engine.update_patch(&json!({ "sub": { "level": "loud" } }));
        assert!(matches!(err, Err(EngineError::InvalidPatch(_))));
        assert_eq!(engine.patch(), &before);
    }

    #[test]
    fn lane_note_is_ignored_while_stopped() {
        let (mut engine, _synth) = engine();
        engine.trigger_lane_note("stab", &NoteValue::from("F3"), 0.8, 0.0, None);
        assert_eq!(engine.active_voice_count(), 0);
        assert!(engine.pending_releases().is_empty());
    }

    #[test]
    fn tie_skips_the_release() {
        let (mut engine, _synth) = engine();
        engine.start_sequencer();
        let tied = Step {
            tie: true,
            ..Step::with_note("F3")
        };
        engine.trigger_lane_note("stab", &tied.note, 0.8, 0.0, Some(&tied));
        assert!(engine.pending_releases().is_empty());
        engine.trigger_lane_note("pad", &NoteValue::from("A3"), 0.8, 0.0, None);
        assert_eq!(engine.pending_releases().len(), 1);
        assert!((engine.pending_releases()[0].time - 0.4).abs() < 1e-9);
    }

    #[test]
    fn stop_all_clears_everything() {
        let (mut engine, _synth) = engine();
        engine.start_sequencer();
        engine.note_on(60u8, 0.8);
        engine.trigger_lane_note("stab", &NoteValue::from(53u8), 0.8, 0.0, None);
        engine.stop_all();
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(engine.pool().mapped_notes(), 0);
        assert!(engine.pending_releases().is_empty());
    }

    #[test]
    fn unknown_preset_and_lane_are_errors() {
        let (mut engine, _synth) = engine();
        assert!(matches!(
            engine.load_preset("Missing"),
            Err(EngineError::UnknownPreset(_))
        ));
        assert!(engine.set_sequencer_lane("nope", 4, Vec::new()).is_err());
        engine.set_sequencer_lane("bass", 8, Vec::new()).unwrap();
        assert_eq!(engine.patch().sequencer.lane("bass").unwrap().pattern.len(), 8);
    }

    #[test]
    fn mod_envelope_follows_trigger_and_release() {
        let env = EnvelopeGenerator::new(0.1, 0.1, 0.5, 0.2, 1.0);
        let mut state = ModEnvelopeState::default();
        assert_eq!(state.level(&env, 1.0), 0.0);
        state.trigger(1.0, 1.0);
        assert!((state.level(&env, 1.05) - 0.5).abs() < 1e-5);
        state.release(&env, 2.0);
        assert!((state.level(&env, 2.1) - 0.25).abs() < 1e-5);
        assert_eq!(state.level(&env, 3.0), 0.0);
    }
}
