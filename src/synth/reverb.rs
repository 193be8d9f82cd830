use super::filter::{Allpass, Comb};

// Tunings in samples at 44.1 kHz
const COMB_TUNINGS: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNINGS: [usize; 2] = [556, 441];
const STEREO_SPREAD: usize = 23;
const TUNING_RATE: f32 = 44_100.0;
const ALLPASS_GAIN: f32 = 0.5;
const DAMPING: f32 = 0.25;
const INPUT_GAIN: f32 = 0.25;

/// Tail length in seconds for a room size: `clamp(1.2 * size, 0.3, 6)`.
pub fn decay_seconds(size: f32) -> f32 {
    (1.2 * size).clamp(0.3, 6.0)
}

#[derive(Debug, Clone)]
struct Channel {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
    comb_lengths: Vec<usize>,
}

impl Channel {
    fn new(sample_rate: f32, spread: usize) -> Self {
        let scale = sample_rate / TUNING_RATE;
        let comb_lengths: Vec<usize> = COMB_TUNINGS
            .iter()
            .map(|t| (((t + spread) as f32) * scale).round() as usize)
            .collect();
        let combs = comb_lengths
            .iter()
            .map(|&len| {
                let mut comb = Comb::new(len);
                comb.set_damping(DAMPING);
                comb
            })
            .collect();
        let allpasses = ALLPASS_TUNINGS
            .iter()
            .map(|t| Allpass::new((((t + spread) as f32) * scale).round() as usize, ALLPASS_GAIN))
            .collect();
        Self {
            combs,
            allpasses,
            comb_lengths,
        }
    }

    fn set_decay(&mut self, seconds: f32, sample_rate: f32) {
        for (comb, &len) in self.combs.iter_mut().zip(&self.comb_lengths) {
            // -60 dB after `seconds`
            let loop_seconds = len as f32 / sample_rate;
            comb.set_feedback(10.0_f32.powf(-3.0 * loop_seconds / seconds));
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut out = 0.0;
        for comb in self.combs.iter_mut() {
            out += comb.process(input);
        }
        out /= self.combs.len() as f32;
        for allpass in self.allpasses.iter_mut() {
            out = allpass.process(out);
        }
        out
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(Comb::clear);
        self.allpasses.iter_mut().for_each(Allpass::clear);
    }
}

/// Stereo comb/allpass reverb whose tail length follows the room size.
#[derive(Debug, Clone)]
pub struct Reverb {
    left: Channel,
    right: Channel,
    sample_rate: f32,
    size: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Self {
        let mut reverb = Self {
            left: Channel::new(sample_rate, 0),
            right: Channel::new(sample_rate, STEREO_SPREAD),
            sample_rate,
            size: 1.0,
        };
        reverb.set_size(1.0);
        reverb
    }

    /// Rebuilds the delay network for a new sample rate.
    pub fn configure(&mut self, sample_rate: f32) {
        let size = self.size;
        *self = Self::new(sample_rate.max(1.0));
        self.set_size(size);
    }

    pub fn set_size(&mut self, size: f32) {
        self.size = size;
        let seconds = decay_seconds(size);
        self.left.set_decay(seconds, self.sample_rate);
        self.right.set_decay(seconds, self.sample_rate);
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    /// Wet-only stereo output.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = (left + right) * INPUT_GAIN;
        (self.left.process(input), self.right.process(input))
    }
}
