use super::filter::Biquad;
use super::operator::FmOperator;
use super::ramp::{Glide, Ramp};
use super::shaper::{saturate, OversampledClip, TransientShaper};
use super::voice::{TriggerPlan, VoiceModulation, VoiceParams, RELEASE_CUTOFF_FLOORS};
use super::wavetable::WaveTableBank;
use crate::synth::prelude::{FRAC_PI_2, TAU};
use std::sync::Arc;

// Filter coefficients follow the cutoff automation at this many samples
const CUTOFF_UPDATE_INTERVAL: u32 = 8;
const SUB_SQUARE_GAIN: f32 = 1.0;
/// Scheduled events a voice can hold before the newest overwrites the last.
pub const EVENT_CAPACITY: usize = 16;

/// A timestamped note event waiting for the render clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceEvent {
    Trigger(TriggerPlan),
    Release(f64),
    Silence(f64),
}

impl VoiceEvent {
    pub fn time(&self) -> f64 {
        match self {
            VoiceEvent::Trigger(plan) => plan.time,
            VoiceEvent::Release(t) | VoiceEvent::Silence(t) => *t,
        }
    }
}

/// Time-ordered, fixed-capacity event list. Events with equal times keep
/// their arrival order.
#[derive(Debug, Clone, Copy)]
struct EventQueue {
    events: [Option<VoiceEvent>; EVENT_CAPACITY],
    len: usize,
}

impl EventQueue {
    fn new() -> Self {
        Self {
            events: [None; EVENT_CAPACITY],
            len: 0,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.events = [None; EVENT_CAPACITY];
        self.len = 0;
    }

    fn insert(&mut self, event: VoiceEvent) {
        let time = event.time();
        if self.len == EVENT_CAPACITY {
            // Full: the latest event is replaced
            self.len -= 1;
        }
        let at = self.events[..self.len]
            .iter()
            .position(|e| e.is_some_and(|e| e.time() > time))
            .unwrap_or(self.len);
        self.events.copy_within(at..self.len, at + 1);
        self.events[at] = Some(event);
        self.len += 1;
    }

    /// Drops queued releases at or after `time`.
    fn cancel_releases_from(&mut self, time: f64) {
        let mut kept = 0;
        for i in 0..self.len {
            let event = self.events[i];
            let cancelled = matches!(event, Some(VoiceEvent::Release(t)) if t >= time);
            if !cancelled {
                self.events[kept] = event;
                kept += 1;
            }
        }
        for slot in &mut self.events[kept..self.len] {
            *slot = None;
        }
        self.len = kept;
    }

    /// Removes and returns the earliest event if it is due at `time`.
    fn pop_due(&mut self, time: f64) -> Option<VoiceEvent> {
        let first = self.events[0].filter(|e| e.time() <= time)?;
        self.events.copy_within(1..self.len, 0);
        self.len -= 1;
        self.events[self.len] = None;
        Some(first)
    }
}

/// Render-side voice: oscillators, FM, filters, envelopes and panning for a
/// single slot. Owned by the render path and driven only by commands.
pub struct VoiceDsp {
    bank: Arc<WaveTableBank>,
    sample_rate: f32,
    params: VoiceParams,
    active: bool,
    queue: EventQueue,
    note_on: f64,
    velocity: f32,
    amp_origin: f32,
    amp_level: f32,
    release_at: Option<f64>,
    release_level: f32,
    freq_a: f32,
    freq_b: f32,
    freq_sub: f32,
    phase_a: f32,
    phase_b: f32,
    phase_sub: f32,
    fm: FmOperator,
    morph_a: Glide,
    morph_b: Glide,
    level_a: Glide,
    level_b: Glide,
    sub_level: Glide,
    drive: Glide,
    pan: Glide,
    cutoffs: [Ramp; 2],
    filters: [Biquad; 2],
    clip: OversampledClip,
    shaper: TransientShaper,
    counter: u32,
}

impl VoiceDsp {
    pub fn new(bank: Arc<WaveTableBank>, sample_rate: f32, glide_seconds: f32) -> Self {
        let params = VoiceParams::default();
        let sample_rate = sample_rate.max(1.0);
        let filter = |i: usize| {
            let p = &params.filters[i];
            Biquad::new(p.filter_type, p.cutoff, p.resonance, sample_rate)
        };
        let mut voice = Self {
            bank,
            sample_rate,
            params,
            active: false,
            queue: EventQueue::new(),
            note_on: 0.0,
            velocity: 0.0,
            amp_origin: 0.0,
            amp_level: 0.0,
            release_at: None,
            release_level: 0.0,
            freq_a: 0.0,
            freq_b: 0.0,
            freq_sub: 0.0,
            phase_a: 0.0,
            phase_b: 0.0,
            phase_sub: 0.0,
            fm: FmOperator::new(),
            morph_a: Glide::new(params.osc_a.morph),
            morph_b: Glide::new(params.osc_b.morph),
            level_a: Glide::new(params.osc_a.level),
            level_b: Glide::new(params.osc_b.level),
            sub_level: Glide::new(params.sub_level),
            drive: Glide::new(params.drive),
            pan: Glide::new(params.pan),
            cutoffs: [
                Ramp::new(params.filters[0].cutoff),
                Ramp::new(params.filters[1].cutoff),
            ],
            filters: [filter(0), filter(1)],
            clip: OversampledClip::default(),
            shaper: TransientShaper::new(sample_rate),
            counter: 0,
        };
        voice.set_glide(glide_seconds);
        voice.configure(&params, 0.0);
        voice
    }

    fn set_glide(&mut self, seconds: f32) {
        let sr = self.sample_rate;
        for glide in [
            &mut self.morph_a,
            &mut self.morph_b,
            &mut self.level_a,
            &mut self.level_b,
            &mut self.sub_level,
            &mut self.drive,
            &mut self.pan,
        ] {
            glide.set_time_constant(seconds, sr);
        }
        self.fm.set_glide(seconds, sr);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last rendered amplitude envelope level.
    pub fn amp_level(&self) -> f32 {
        self.amp_level
    }

    pub fn params(&self) -> &VoiceParams {
        &self.params
    }

    /// Render-clock time the current note started.
    pub fn note_started(&self) -> f64 {
        self.note_on
    }

    /// Events still waiting for their timestamp.
    pub fn queued_events(&self) -> usize {
        self.queue.len()
    }

    /// New sound settings. A sounding voice glides to them; an idle one jumps.
    pub fn configure(&mut self, params: &VoiceParams, time: f64) {
        self.params = *params;
        let targets = [
            (&mut self.morph_a, params.osc_a.morph),
            (&mut self.morph_b, params.osc_b.morph),
            (&mut self.level_a, params.osc_a.level),
            (&mut self.level_b, params.osc_b.level),
            (&mut self.sub_level, params.sub_level),
            (&mut self.drive, params.drive),
            (&mut self.pan, params.pan),
        ];
        for (glide, value) in targets {
            if self.active {
                glide.set_target(value);
            } else {
                glide.jump(value);
            }
        }
        for (filter, p) in self.filters.iter_mut().zip(&params.filters) {
            filter.configure(p.filter_type, p.resonance);
        }
        if !self.active {
            for (ramp, p) in self.cutoffs.iter_mut().zip(&params.filters) {
                ramp.set_value_at(time, p.cutoff);
            }
        }
        self.fm.configure(params.fm);
        self.shaper
            .set_gains(params.transient_attack, params.transient_sustain);
    }

    /// Queues a note start. Releases queued at or after it are dropped.
    pub fn trigger(&mut self, plan: TriggerPlan) {
        self.queue.cancel_releases_from(plan.time);
        self.queue.insert(VoiceEvent::Trigger(plan));
    }

    pub fn release(&mut self, time: f64) {
        self.queue.insert(VoiceEvent::Release(time));
    }

    /// Hard stop at `time`; no release tail. Everything queued is discarded.
    pub fn silence(&mut self, time: f64) {
        self.queue.clear();
        self.queue.insert(VoiceEvent::Silence(time));
    }

    pub fn modulate(&mut self, modulation: &VoiceModulation, time: f64, glide_seconds: f32) {
        if let Some(v) = modulation.osc_a_morph {
            self.morph_a.set_target(v);
        }
        if let Some(v) = modulation.osc_b_morph {
            self.morph_b.set_target(v);
        }
        if let Some(v) = modulation.sub_level {
            self.sub_level.set_target(v);
        }
        if let Some(v) = modulation.drive {
            self.drive.set_target(v);
        }
        if let Some(v) = modulation.pan {
            self.pan.set_target(v);
        }
        if let Some(v) = modulation.fm_index {
            self.fm.modulate_index(v);
        }
        let cutoffs = [modulation.filter1_cutoff, modulation.filter2_cutoff];
        for (ramp, cutoff) in self.cutoffs.iter_mut().zip(cutoffs) {
            if let Some(v) = cutoff {
                ramp.set_target(v, time, glide_seconds);
            }
        }
    }

    fn start_note(&mut self, plan: &TriggerPlan) {
        let t = plan.time;
        if !self.active {
            self.phase_a = self.params.osc_a.phase.rem_euclid(1.0);
            self.phase_b = self.params.osc_b.phase.rem_euclid(1.0);
            self.phase_sub = 0.0;
            self.filters.iter_mut().for_each(Biquad::reset);
            self.clip.reset();
            self.shaper.reset();
            self.fm.reset();
        }
        // Attack continues from wherever the amplitude currently is
        self.amp_origin = self.amp_level;
        self.note_on = t;
        self.velocity = plan.velocity;
        self.release_at = None;
        self.freq_a = plan.freq_a;
        self.freq_b = plan.freq_b;
        self.freq_sub = plan.freq_sub;
        self.fm.trigger(t, plan.velocity);
        for (ramp, sweep) in self.cutoffs.iter_mut().zip(&plan.sweeps) {
            let attack_end = t + f64::from(sweep.attack);
            ramp.set_value_at(t, sweep.start);
            ramp.linear_ramp_to(sweep.peak, attack_end);
            ramp.linear_ramp_to(sweep.sustain, attack_end + f64::from(sweep.decay));
        }
        self.active = true;
    }

    fn begin_release(&mut self, time: f64) {
        if !self.active || self.release_at.is_some() {
            return;
        }
        self.release_level = self.held_level(time);
        self.release_at = Some(time);
        let release = f64::from(self.params.filter_env.release.max(0.0));
        for (ramp, floor) in self.cutoffs.iter_mut().zip(RELEASE_CUTOFF_FLOORS) {
            let current = ramp.value_at(time);
            ramp.cancel_and_hold(time);
            ramp.linear_ramp_to((current * 0.5).max(floor), time + release);
        }
    }

    fn stop(&mut self) {
        self.active = false;
        self.amp_level = 0.0;
        self.release_at = None;
    }

    fn held_level(&self, time: f64) -> f32 {
        self.params
            .amp
            .value_from(self.amp_origin, (time - self.note_on) as f32, self.velocity)
    }

    fn apply_due_events(&mut self, time: f64) {
        while let Some(event) = self.queue.pop_due(time) {
            match event {
                VoiceEvent::Trigger(plan) => self.start_note(&plan),
                VoiceEvent::Release(t) => self.begin_release(t),
                VoiceEvent::Silence(_) => self.stop(),
            }
        }
    }

    /// Renders one stereo frame at render-clock `time`.
    #[inline]
    pub fn render(&mut self, time: f64) -> (f32, f32) {
        self.apply_due_events(time);
        if !self.active {
            return (0.0, 0.0);
        }
        let amp = &self.params.amp;
        let envelope = match self.release_at {
            Some(r) => {
                let since = (time - r) as f32;
                if amp.is_finished(since) {
                    self.stop();
                    return (0.0, 0.0);
                }
                amp.release_value_at(since, self.release_level)
            }
            None => self.held_level(time),
        };
        self.amp_level = envelope;

        let sr = self.sample_rate;
        let params = &self.params;

        // Oscillators
        let fm_offset = self.fm.process(time, self.freq_a, sr);
        let table_a = self.bank.get_table(params.osc_a.timbre, self.morph_a.next());
        let table_b = self.bank.get_table(params.osc_b.timbre, self.morph_b.next());
        let osc_a = table_a.sample(self.phase_a) * self.level_a.next();
        let osc_b = table_b.sample(self.phase_b) * self.level_b.next();
        self.phase_a = (self.phase_a + (self.freq_a + fm_offset) / sr).rem_euclid(1.0);
        self.phase_b = (self.phase_b + self.freq_b / sr).rem_euclid(1.0);

        let square = if self.phase_sub < 0.5 { 1.0 } else { -1.0 };
        let sub_raw = (self.phase_sub * TAU).sin() + square * params.sub_square * SUB_SQUARE_GAIN;
        let sub = saturate(sub_raw * self.sub_level.next(), params.sub_saturation);
        self.phase_sub = (self.phase_sub + self.freq_sub / sr).rem_euclid(1.0);

        let x = (osc_a + osc_b + sub) * self.drive.next();

        // Filters
        if self.counter % CUTOFF_UPDATE_INTERVAL == 0 {
            for (filter, ramp) in self.filters.iter_mut().zip(&self.cutoffs) {
                filter.set_cutoff(ramp.value_at(time));
            }
        }
        self.counter = self.counter.wrapping_add(1);
        let routing = params.routing;
        let y1 = self.filters[0].process(x);
        let y2 = self.filters[1].process(y1 * routing.f2_serial_in + x * routing.f2_parallel_in);
        let filtered = y1 * routing.f1_out + y2 * routing.f2_out;

        let clipped = self.clip.process(filtered * envelope, params.oversample);
        let shaped = self.shaper.process(clipped);

        // Equal-power pan
        let angle = (self.pan.next().clamp(-1.0, 1.0) + 1.0) * 0.5 * FRAC_PI_2;
        (shaped * angle.cos(), shaped * angle.sin())
    }
}
