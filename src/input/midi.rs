use crate::synth::engine::SynthEngine;
use crate::synth::error::{EngineError, Result};
use log::{debug, info, warn};
use midir::{MidiInput, MidiInputConnection};
use crossbeam_channel::Sender;

/// The MIDI channel messages the synth reacts to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiMessage {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8 },
    /// Channel pressure in [0, 1].
    Aftertouch(f32),
}

impl MidiMessage {
    /// Decodes a raw message. Running status and unsupported messages yield
    /// `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        match status & 0xF0 {
            0x90 if data.len() >= 2 => {
                let (note, velocity) = (data[0] & 0x7F, data[1] & 0x7F);
                if velocity > 0 {
                    Some(MidiMessage::NoteOn {
                        note,
                        velocity: f32::from(velocity) / 127.0,
                    })
                } else {
                    Some(MidiMessage::NoteOff { note })
                }
            }
            0x80 if !data.is_empty() => Some(MidiMessage::NoteOff {
                note: data[0] & 0x7F,
            }),
            0xD0 if !data.is_empty() => {
                Some(MidiMessage::Aftertouch(f32::from(data[0] & 0x7F) / 127.0))
            }
            _ => None,
        }
    }

    pub fn apply(self, engine: &mut SynthEngine) {
        match self {
            MidiMessage::NoteOn { note, velocity } => engine.note_on(note, velocity),
            MidiMessage::NoteOff { note } => engine.note_off(note),
            MidiMessage::Aftertouch(value) => engine.set_aftertouch(value),
        }
    }
}

/// Keeps a MIDI input port open and forwards decoded messages.
pub struct MidiHandler {
    #[allow(dead_code)]
    connection: MidiInputConnection<()>,
    port_name: String,
}

impl MidiHandler {
    /// Opens input port `port_index` and sends every decoded message to
    /// `sender`.
    pub fn connect(sender: Sender<MidiMessage>, port_index: usize) -> Result<Self> {
        let midi_in = MidiInput::new("wavemorph input")
            .map_err(|e| EngineError::Initialization(format!("MIDI unavailable: {}", e)))?;
        let ports = midi_in.ports();
        for (i, port) in ports.iter().enumerate() {
            debug!(
                "MIDI port {}: {}",
                i,
                midi_in.port_name(port).unwrap_or_default()
            );
        }
        let port = ports
            .get(port_index)
            .ok_or_else(|| {
                EngineError::Initialization(format!(
                    "no MIDI input port {} ({} found)",
                    port_index,
                    ports.len()
                ))
            })?
            .clone();
        let port_name = midi_in.port_name(&port).unwrap_or_default();

        let connection = midi_in
            .connect(
                &port,
                "wavemorph-read-input",
                move |_, bytes, _| {
                    if let Some(message) = MidiMessage::parse(bytes) {
                        if sender.send(message).is_err() {
                            warn!("MIDI message dropped, control thread gone");
                        }
                    }
                },
                (),
            )
            .map_err(|e| EngineError::Initialization(format!("MIDI connect failed: {}", e)))?;

        info!("opened MIDI port: {}", port_name);
        Ok(Self {
            connection,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_note_on_and_off() {
        assert_eq!(
            MidiMessage::parse(&[0x91, 60, 127]),
            Some(MidiMessage::NoteOn {
                note: 60,
                velocity: 1.0
            })
        );
        assert_eq!(
            MidiMessage::parse(&[0x90, 60, 0]),
            Some(MidiMessage::NoteOff { note: 60 })
        );
        assert_eq!(
            MidiMessage::parse(&[0x80, 61, 40]),
            Some(MidiMessage::NoteOff { note: 61 })
        );
    }

    #[test]
    fn decodes_channel_pressure() {
        assert_eq!(
            MidiMessage::parse(&[0xD3, 127]),
            Some(MidiMessage::Aftertouch(1.0))
        );
    }

    #[test]
    fn senders_fan_in_to_one_engine() {
        use crate::synth::config::SynthConfig;
        use crossbeam_channel::unbounded;

        let (tx, rx) = unbounded();
        let keys = tx.clone();
        let pressure = tx.clone();
        drop(tx);
        let handles = vec![
            std::thread::spawn(move || {
                for note in [48u8, 52, 55] {
                    keys.send(MidiMessage::parse(&[0x90, note, 100]).unwrap())
                        .unwrap();
                }
            }),
            std::thread::spawn(move || {
                pressure.send(MidiMessage::Aftertouch(0.5)).unwrap();
            }),
        ];
        for handle in handles {
            handle.join().unwrap();
        }

        let (mut engine, _synth) = SynthEngine::new(SynthConfig::default());
        let received: Vec<MidiMessage> = rx.iter().collect();
        assert_eq!(received.len(), 4);
        for message in received {
            message.apply(&mut engine);
        }
        assert_eq!(engine.active_voice_count(), 3);
    }

    #[test]
    fn ignores_everything_else() {
        assert_eq!(MidiMessage::parse(&[]), None);
        assert_eq!(MidiMessage::parse(&[0xB0, 7, 100]), None);
        assert_eq!(MidiMessage::parse(&[0x90, 60]), None);
    }
}
