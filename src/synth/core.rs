use super::context::RenderContext;
use super::drums::{DrumBus, DrumHit};
use super::effect::FxSection;
use super::master::{BusModulation, BusParams, MasterBus, SidechainFollower, SidechainSource};
use super::voice::{TriggerPlan, VoiceModulation, VoiceParams};
use super::voice_dsp::VoiceDsp;
use super::wavetable::WaveTableBank;
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Frames rendered per `process` call by [`Synth::render_offline`].
const OFFLINE_BLOCK_FRAMES: usize = 256;

/// Messages from the control side to the render path. Times are absolute
/// render-clock seconds.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderCommand {
    Configure { slot: usize, params: VoiceParams },
    Trigger { slot: usize, plan: TriggerPlan },
    Release { slot: usize, time: f64 },
    /// Cut a voice without a release tail.
    Silence { slot: usize, time: f64 },
    Modulate { slot: usize, modulation: VoiceModulation },
    ConfigureBus(BusParams),
    ModulateBus(BusModulation),
    /// Schedule a drum bus hit.
    Drum { hit: DrumHit, time: f64 },
    /// Drop every scheduled and sounding drum hit.
    StopDrums,
}

/// The render path: every voice's DSP, the drum bus, the master bus, FX and
/// the sidechain follower. Runs inside the audio callback, so `process` never locks and
/// never allocates.
pub struct Synth {
    commands: Receiver<RenderCommand>,
    context: Arc<RenderContext>,
    bank: Arc<WaveTableBank>,
    voices: Vec<VoiceDsp>,
    drums: DrumBus,
    master: MasterBus,
    fx: FxSection,
    follower: SidechainFollower,
    bus: BusParams,
    sample_rate: f32,
    glide_seconds: f32,
}

impl Synth {
    pub fn new(
        commands: Receiver<RenderCommand>,
        context: Arc<RenderContext>,
        bank: Arc<WaveTableBank>,
        max_voices: usize,
        glide_seconds: f32,
    ) -> Self {
        let sample_rate = context.sample_rate();
        let mut synth = Self {
            commands,
            context,
            bank,
            voices: Vec::with_capacity(max_voices),
            drums: DrumBus::new(sample_rate),
            master: MasterBus::new(sample_rate),
            fx: FxSection::new(sample_rate),
            follower: SidechainFollower::new(),
            bus: BusParams::default(),
            sample_rate,
            glide_seconds,
        };
        synth.voices = (0..max_voices)
            .map(|_| VoiceDsp::new(synth.bank.clone(), sample_rate, glide_seconds))
            .collect();
        synth.configure_bus(BusParams::default(), true);
        synth
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Commands sent by the control side and not yet drained.
    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }

    /// Drum hits scheduled or still sounding.
    pub fn pending_drum_hits(&self) -> usize {
        self.drums.pending_hits()
    }

    pub fn voice(&self, slot: usize) -> Option<&VoiceDsp> {
        self.voices.get(slot)
    }

    /// Voices currently producing sound on the render side.
    pub fn sounding_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Rebuilds every buffer for a new rate. Call before streaming starts;
    /// sounding notes are dropped.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        let sample_rate = sample_rate.max(1.0);
        if (sample_rate - self.sample_rate).abs() < f32::EPSILON {
            return;
        }
        let now = self.context.now();
        self.context.set_sample_rate(sample_rate);
        self.context.set_time(now);
        self.sample_rate = sample_rate;
        let bank = &self.bank;
        let glide = self.glide_seconds;
        for voice in self.voices.iter_mut() {
            let params = *voice.params();
            *voice = VoiceDsp::new(bank.clone(), sample_rate, glide);
            voice.configure(&params, now);
        }
        self.drums = DrumBus::new(sample_rate);
        self.master = MasterBus::new(sample_rate);
        self.fx = FxSection::new(sample_rate);
        self.configure_bus(self.bus, true);
        log::info!("render path running at {} Hz", sample_rate);
    }

    fn configure_bus(&mut self, bus: BusParams, immediate: bool) {
        self.bus = bus;
        self.master.set_glide(self.glide_seconds, self.sample_rate);
        self.master.set_volume(bus.master_volume);
        self.master.set_ceiling(bus.limiter_ceiling);
        self.fx.set_glide(self.glide_seconds, self.sample_rate);
        self.fx.set_params(&bus.fx, immediate);
        self.follower.set_params(bus.sidechain);
        self.drums.set_audible(bus.drums_audible);
    }

    fn handle_command(&mut self, command: RenderCommand, now: f64) {
        match command {
            RenderCommand::Configure { slot, params } => {
                if let Some(voice) = self.voices.get_mut(slot) {
                    voice.configure(&params, now);
                }
            }
            RenderCommand::Trigger { slot, plan } => {
                if let Some(voice) = self.voices.get_mut(slot) {
                    voice.trigger(plan);
                }
            }
            RenderCommand::Release { slot, time } => {
                if let Some(voice) = self.voices.get_mut(slot) {
                    voice.release(time);
                }
            }
            RenderCommand::Silence { slot, time } => {
                if let Some(voice) = self.voices.get_mut(slot) {
                    voice.silence(time);
                }
            }
            RenderCommand::Modulate { slot, modulation } => {
                let glide = self.glide_seconds;
                if let Some(voice) = self.voices.get_mut(slot) {
                    voice.modulate(&modulation, now, glide);
                }
            }
            RenderCommand::ConfigureBus(bus) => self.configure_bus(bus, false),
            RenderCommand::ModulateBus(modulation) => {
                if let Some(v) = modulation.master_volume {
                    self.master.set_volume(v);
                }
                if let Some(v) = modulation.delay_mix {
                    self.fx.modulate_delay_mix(v);
                }
                if let Some(v) = modulation.reverb_mix {
                    self.fx.modulate_reverb_mix(v);
                }
                if let Some(v) = modulation.chorus_depth {
                    self.fx.modulate_chorus_depth(v);
                }
            }
            RenderCommand::Drum { hit, time } => self.drums.schedule(hit, time),
            RenderCommand::StopDrums => self.drums.clear(),
        }
    }

    /// Fills an interleaved buffer of `channels` channels. Mono output gets
    /// the average of both sides; channels past the second are silent.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let start = self.context.samples_rendered();
        let sr = f64::from(self.sample_rate);
        let now = start as f64 / sr;
        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command, now);
        }

        let source = self.follower.source();
        let mut frames = 0u64;
        for (i, frame) in output.chunks_mut(channels).enumerate() {
            let time = (start + i as u64) as f64 / sr;
            let (mut left, mut right) = (0.0, 0.0);
            for voice in self.voices.iter_mut() {
                let (l, r) = voice.render(time);
                left += l;
                right += r;
            }
            let drums = self.drums.render(time);
            if source == SidechainSource::Internal {
                self.follower.push(drums, drums);
            }
            let (left, right) = (left + drums, right + drums);
            let (left, right) = self.master.process(left, right);
            let (left, right) = self.fx.process(left, right);
            if source == SidechainSource::Master {
                self.follower.push(left, right);
            }
            match frame {
                [mono] => *mono = 0.5 * (left + right),
                [l, r, rest @ ..] => {
                    *l = left;
                    *r = right;
                    rest.fill(0.0);
                }
                [] => {}
            }
            frames += 1;
        }

        self.context.advance(frames);
        let level = self.follower.finish_block(self.sample_rate);
        self.context.publish_follower_level(level);
    }

    /// Renders `seconds` of interleaved stereo without an audio device.
    pub fn render_offline(&mut self, seconds: f64) -> Vec<f32> {
        let frames = (seconds.max(0.0) * f64::from(self.sample_rate)).round() as usize;
        let mut output = vec![0.0; frames * 2];
        for block in output.chunks_mut(OFFLINE_BLOCK_FRAMES * 2) {
            self.process(block, 2);
        }
        output
    }
}
