use crate::audio::{AudioBackend, CpalBackend};
use crate::input::{MidiHandler, MidiMessage};
use crate::synth::config::SynthConfig;
use crate::synth::engine::SynthEngine;
use crate::synth::error::Result;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Native runtime: the audio stream, the control thread and MIDI fan-in.
///
/// The control thread wakes every `tick_interval`, drains input and runs
/// [`SynthEngine::tick`]. It shares the engine with callers through a mutex;
/// the audio callback owns the render path and never touches that mutex.
pub struct NativeSynth {
    engine: Arc<Mutex<SynthEngine>>,
    backend: CpalBackend,
    input: Sender<MidiMessage>,
    midi: Option<MidiHandler>,
    running: Arc<AtomicBool>,
    control: Option<JoinHandle<()>>,
}

/// Opens the default output device and starts the control thread.
pub fn init(config: SynthConfig) -> Result<NativeSynth> {
    let (engine, synth) = SynthEngine::new(config);
    let tick_interval = Duration::from_secs_f64(engine.config().tick_interval);
    let mut backend = CpalBackend::new(synth, engine.config().buffer_frames);
    backend.start()?;

    let engine = Arc::new(Mutex::new(engine));
    let running = Arc::new(AtomicBool::new(true));
    let (input_tx, input_rx) = unbounded();
    let control = spawn_control_thread(engine.clone(), input_rx, running.clone(), tick_interval);

    Ok(NativeSynth {
        engine,
        backend,
        input: input_tx,
        midi: None,
        running,
        control: Some(control),
    })
}

fn spawn_control_thread(
    engine: Arc<Mutex<SynthEngine>>,
    input: Receiver<MidiMessage>,
    running: Arc<AtomicBool>,
    tick_interval: Duration,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        info!("control thread running every {:?}", tick_interval);
        while running.load(Ordering::Acquire) {
            match engine.lock() {
                Ok(mut engine) => {
                    while let Ok(message) = input.try_recv() {
                        message.apply(&mut engine);
                    }
                    engine.tick();
                }
                Err(_) => {
                    error!("engine lock poisoned, control thread exiting");
                    break;
                }
            }
            std::thread::sleep(tick_interval);
        }
    })
}

impl NativeSynth {
    /// Shared handle to the control surface.
    pub fn engine(&self) -> Arc<Mutex<SynthEngine>> {
        self.engine.clone()
    }

    /// Sender for messages from any input source.
    pub fn input(&self) -> Sender<MidiMessage> {
        self.input.clone()
    }

    /// Connects MIDI input port `port_index`. On failure MIDI stays off.
    pub fn connect_midi(&mut self, port_index: usize) -> Result<()> {
        let handler = MidiHandler::connect(self.input.clone(), port_index)?;
        self.midi = Some(handler);
        Ok(())
    }

    pub fn midi_port(&self) -> Option<&str> {
        self.midi.as_ref().map(MidiHandler::port_name)
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.control.take() {
            if handle.join().is_err() {
                warn!("control thread panicked");
            }
        }
        if let Err(e) = self.backend.stop() {
            warn!("{}", e);
        }
    }
}

impl Drop for NativeSynth {
    fn drop(&mut self) {
        self.shutdown();
    }
}
