use super::envelope::EnvelopeGenerator;
use super::note::NoteKey;
use super::voice::Voice;
use crate::synth::prelude::HashMap;
use log::debug;

/// How [`VoicePool::acquire`] found its voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Legato retrigger of the voice already holding the key.
    Reused,
    /// An idle voice.
    Free,
    /// The oldest sounding voice, cut without a fade.
    Stolen,
}

/// Side effects of an acquire the caller must forward to the render path.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub slot: usize,
    pub allocation: Allocation,
    /// A previous holder of the same key released at the acquire time.
    pub released: Option<usize>,
}

/// Fixed arena of voices plus the map of which key each sounding note holds.
pub struct VoicePool {
    voices: Vec<Voice>,
    active_notes: HashMap<NoteKey, usize>,
    next_serial: u64,
}

impl VoicePool {
    pub fn new(max_voices: usize) -> Self {
        Self {
            voices: (0..max_voices.max(1)).map(Voice::new).collect(),
            active_notes: HashMap::new(),
            next_serial: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, slot: usize) -> Option<&Voice> {
        self.voices.get(slot)
    }

    pub fn voice_mut(&mut self, slot: usize) -> Option<&mut Voice> {
        self.voices.get_mut(slot)
    }

    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn voices_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }

    pub fn slot_for(&self, key: &NoteKey) -> Option<usize> {
        self.active_notes.get(key).copied()
    }

    pub fn mapped_notes(&self) -> usize {
        self.active_notes.len()
    }

    /// Serial for the next trigger; strictly increasing.
    pub fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// Picks the voice for a new note and maps `key` to it.
    ///
    /// The returned voice is not triggered yet; the caller does that with the
    /// patch in hand.
    pub fn acquire(
        &mut self,
        key: &NoteKey,
        legato: bool,
        time: f64,
        amp: &EnvelopeGenerator,
    ) -> Acquired {
        let mut released = None;
        if let Some(slot) = self.slot_for(key) {
            if legato && !self.voices[slot].is_idle() {
                return Acquired {
                    slot,
                    allocation: Allocation::Reused,
                    released: None,
                };
            }
            // Never let one key name two voices
            self.active_notes.remove(key);
            if self.voices[slot].release(time, amp) {
                released = Some(slot);
            }
        }

        let (slot, allocation) = match self.voices.iter().position(Voice::is_idle) {
            Some(slot) => (slot, Allocation::Free),
            None => {
                let slot = self.oldest();
                let victim = &mut self.voices[slot];
                debug!(
                    "stealing voice {} (note {}, triggered at {:.3}s)",
                    slot,
                    victim.note(),
                    victim.trigger_time()
                );
                if let Some(old) = victim.key().cloned() {
                    if self.active_notes.get(&old) == Some(&slot) {
                        self.active_notes.remove(&old);
                    }
                }
                victim.force_stop();
                (slot, Allocation::Stolen)
            }
        };
        self.active_notes.insert(key.clone(), slot);
        Acquired {
            slot,
            allocation,
            released,
        }
    }

    fn oldest(&self) -> usize {
        self.voices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.trigger_time()
                    .total_cmp(&b.trigger_time())
                    .then(a.serial().cmp(&b.serial()))
            })
            .map(|(slot, _)| slot)
            .unwrap_or(0)
    }

    /// Releases and unmaps `key`. Returns the released slot, if any.
    pub fn release(&mut self, key: &NoteKey, time: f64, amp: &EnvelopeGenerator) -> Option<usize> {
        let slot = self.active_notes.remove(key)?;
        self.voices[slot].release(time, amp).then_some(slot)
    }

    /// Releases a specific trigger, identified by slot and serial. A voice that
    /// has since been retriggered is left alone.
    pub fn release_trigger(
        &mut self,
        slot: usize,
        serial: u64,
        time: f64,
        amp: &EnvelopeGenerator,
    ) -> bool {
        let Some(voice) = self.voices.get_mut(slot) else {
            return false;
        };
        if voice.serial() != serial || !voice.is_held() {
            return false;
        }
        if let Some(key) = voice.key().cloned() {
            if self.active_notes.get(&key) == Some(&slot) {
                self.active_notes.remove(&key);
            }
        }
        voice.release(time, amp)
    }

    /// Marks voices whose release has finished as idle.
    pub fn reap(&mut self, now: f64) -> usize {
        let mut freed = 0;
        for voice in self.voices.iter_mut() {
            if voice.update(now) {
                freed += 1;
            }
        }
        if freed > 0 {
            let voices = &self.voices;
            self.active_notes
                .retain(|_, slot| !voices[*slot].is_idle());
        }
        freed
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_idle()).count()
    }

    /// Silences every voice and clears the map.
    pub fn stop_all(&mut self) -> Vec<usize> {
        self.active_notes.clear();
        self.voices
            .iter_mut()
            .filter(|v| !v.is_idle())
            .map(|v| {
                v.force_stop();
                v.slot()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::patch::PatchState;

    fn trigger(pool: &mut VoicePool, lane: &str, note: u8, legato: bool, time: f64) -> Acquired {
        let patch = PatchState::default();
        let key = NoteKey::new(lane, note);
        let acquired = pool.acquire(&key, legato, time, &patch.envelopes.amp);
        let serial = pool.next_serial();
        if let Some(voice) = pool.voice_mut(acquired.slot) {
            voice.trigger(key, note, 0.8, time, serial, &patch);
        }
        acquired
    }

    #[test]
    fn steals_the_oldest_voice() {
        let mut pool = VoicePool::new(2);
        assert_eq!(trigger(&mut pool, "manual", 60, false, 0.0).slot, 0);
        assert_eq!(trigger(&mut pool, "manual", 62, false, 0.01).slot, 1);
        let third = trigger(&mut pool, "manual", 64, false, 0.02);
        assert_eq!(third.slot, 0);
        assert_eq!(third.allocation, Allocation::Stolen);
        assert_eq!(pool.slot_for(&NoteKey::new("manual", 60)), None);
        assert_eq!(pool.slot_for(&NoteKey::new("manual", 64)), Some(0));
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn equal_trigger_times_break_ties_by_serial() {
        let mut pool = VoicePool::new(2);
        trigger(&mut pool, "a", 60, false, 1.0);
        trigger(&mut pool, "b", 60, false, 1.0);
        assert_eq!(trigger(&mut pool, "c", 60, false, 1.0).slot, 0);
        assert_eq!(trigger(&mut pool, "d", 60, false, 1.0).slot, 1);
    }

    #[test]
    fn legato_reuses_the_mapped_voice() {
        let mut pool = VoicePool::new(4);
        let first = trigger(&mut pool, "bass", 36, true, 0.0);
        let second = trigger(&mut pool, "bass", 36, true, 0.1);
        assert_eq!(first.slot, second.slot);
        assert_eq!(second.allocation, Allocation::Reused);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn retrigger_without_legato_releases_previous_holder() {
        let mut pool = VoicePool::new(4);
        let first = trigger(&mut pool, "stab", 53, false, 0.0);
        let second = trigger(&mut pool, "stab", 53, false, 0.1);
        assert_ne!(first.slot, second.slot);
        assert_eq!(second.released, Some(first.slot));
        assert_eq!(pool.mapped_notes(), 1);
    }

    #[test]
    fn release_of_unmapped_key_is_noop() {
        let mut pool = VoicePool::new(2);
        let amp = EnvelopeGenerator::default();
        assert_eq!(pool.release(&NoteKey::new("manual", 1), 0.0, &amp), None);
    }

    #[test]
    fn reap_frees_finished_voices() {
        let mut pool = VoicePool::new(2);
        let amp = EnvelopeGenerator::default();
        trigger(&mut pool, "manual", 60, false, 0.0);
        pool.release(&NoteKey::new("manual", 60), 1.0, &amp);
        assert_eq!(pool.reap(1.1), 0);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.reap(1.0 + f64::from(amp.release) + 0.001), 1);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn stale_release_skips_retriggered_voice() {
        let mut pool = VoicePool::new(2);
        let amp = EnvelopeGenerator::default();
        trigger(&mut pool, "bass", 36, true, 0.0);
        let old_serial = pool.voice(0).map(Voice::serial).unwrap();
        trigger(&mut pool, "bass", 36, true, 0.1);
        assert!(!pool.release_trigger(0, old_serial, 0.2, &amp));
        let new_serial = pool.voice(0).map(Voice::serial).unwrap();
        assert!(pool.release_trigger(0, new_serial, 0.3, &amp));
        assert_eq!(pool.mapped_notes(), 0);
    }
}
