use serde::{Deserialize, Serialize};
use std::fmt;

/// Lane id used for notes that do not come from the sequencer.
pub const MANUAL_LANE: &str = "manual";
/// Lane the transport drone plays on.
pub const DRONE_LANE: &str = "performance";

/// Fallback when a note name cannot be parsed (middle C).
pub const DEFAULT_MIDI_NOTE: u8 = 60;

pub const KEY_ROOTS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const FLAT_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// A note as written in patches and on the control surface: either a MIDI
/// number or a scientific-pitch name like `"C#3"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoteValue {
    Midi(u8),
    Name(String),
}

impl NoteValue {
    pub fn to_midi(&self) -> u8 {
        match self {
            NoteValue::Midi(n) => (*n).min(127),
            NoteValue::Name(name) => note_name_to_midi(name),
        }
    }
}

impl Default for NoteValue {
    fn default() -> Self {
        NoteValue::Name("C2".to_string())
    }
}

impl From<u8> for NoteValue {
    fn from(value: u8) -> Self {
        NoteValue::Midi(value)
    }
}

impl From<&str> for NoteValue {
    fn from(value: &str) -> Self {
        NoteValue::Name(value.to_string())
    }
}

impl From<String> for NoteValue {
    fn from(value: String) -> Self {
        NoteValue::Name(value)
    }
}

impl fmt::Display for NoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteValue::Midi(n) => write!(f, "{}", n),
            NoteValue::Name(name) => f.write_str(name),
        }
    }
}

/// Parses `^([A-Ga-g])(#|b)?(-?\d)$` into a MIDI number clamped to 0..=127.
/// Anything else maps to [`DEFAULT_MIDI_NOTE`].
pub fn note_name_to_midi(name: &str) -> u8 {
    parse_note_name(name.trim()).unwrap_or(DEFAULT_MIDI_NOTE)
}

fn parse_note_name(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    let letter = chars.next()?;
    let mut semitone: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let octave_str = if let Some(stripped) = rest.strip_prefix('#') {
        semitone += 1;
        stripped
    } else if let Some(stripped) = rest.strip_prefix('b') {
        semitone -= 1;
        stripped
    } else {
        rest
    };
    let digits = octave_str.strip_prefix('-').unwrap_or(octave_str);
    if digits.len() != 1 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let octave: i32 = octave_str.parse().ok()?;
    Some((12 * (octave + 1) + semitone).clamp(0, 127) as u8)
}

pub fn midi_to_note_name(midi: u8, prefer_sharps: bool) -> String {
    let clamped = midi.min(127);
    let names = if prefer_sharps { &KEY_ROOTS } else { &FLAT_NAMES };
    let octave = i32::from(clamped / 12) - 1;
    format!("{}{}", names[usize::from(clamped % 12)], octave)
}

/// Canonical key root for a user supplied key name; unknown keys become `"C"`.
pub fn normalize_key(key: &str) -> &'static str {
    let trimmed = key.trim();
    let alias = match trimmed {
        "Db" => "C#",
        "Eb" => "D#",
        "Gb" => "F#",
        "Ab" => "G#",
        "Bb" => "A#",
        other => other,
    };
    let upper = alias.to_ascii_uppercase();
    KEY_ROOTS
        .iter()
        .find(|root| **root == alias || **root == upper)
        .copied()
        .unwrap_or("C")
}

/// Semitone offset of a key root above C.
pub fn key_offset(key: &str) -> u8 {
    let root = normalize_key(key);
    KEY_ROOTS.iter().position(|r| *r == root).unwrap_or(0) as u8
}

pub fn transpose(midi: u8, offset: u8) -> u8 {
    (u16::from(midi) + u16::from(offset)).min(127) as u8
}

/// Identity of a sounding note in the active-notes map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub lane: String,
    pub note: u8,
}

impl NoteKey {
    pub fn new(lane: &str, note: u8) -> Self {
        Self {
            lane: lane.to_string(),
            note,
        }
    }
}

impl fmt::Display for NoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lane, self.note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_note_names() {
        assert_eq!(note_name_to_midi("C4"), 60);
        assert_eq!(note_name_to_midi("C2"), 36);
        assert_eq!(note_name_to_midi("a4"), 69);
        assert_eq!(note_name_to_midi("F#3"), 54);
        assert_eq!(note_name_to_midi("Bb1"), 34);
        assert_eq!(note_name_to_midi("C-1"), 0);
        assert_eq!(note_name_to_midi(" G9 "), 127);
    }

    #[test]
    fn invalid_names_fall_back_to_middle_c() {
        assert_eq!(note_name_to_midi("H2"), 60);
        assert_eq!(note_name_to_midi("C10"), 60);
        assert_eq!(note_name_to_midi(""), 60);
        assert_eq!(note_name_to_midi("C#"), 60);
    }

    #[test]
    fn cb_clamps_at_zero() {
        assert_eq!(note_name_to_midi("Cb-1"), 0);
    }

    #[test]
    fn note_value_deserializes_number_or_name() {
        let n: NoteValue = serde_json::from_str("36").unwrap();
        assert_eq!(n, NoteValue::Midi(36));
        let s: NoteValue = serde_json::from_str("\"C2\"").unwrap();
        assert_eq!(s.to_midi(), 36);
    }

    #[test]
    fn keys_and_transpose() {
        assert_eq!(key_offset("C"), 0);
        assert_eq!(key_offset("Eb"), 3);
        assert_eq!(key_offset("a"), 9);
        assert_eq!(key_offset("nonsense"), 0);
        assert_eq!(transpose(126, 5), 127);
        assert_eq!(midi_to_note_name(61, true), "C#4");
        assert_eq!(midi_to_note_name(61, false), "Db4");
    }

    #[test]
    fn note_key_display() {
        assert_eq!(NoteKey::new("bass", 36).to_string(), "bass-36");
    }
}
