use crate::synth::prelude::{FRAC_1_SQRT_2, TAU};
use serde::{Deserialize, Serialize};

/// Response of a [`Biquad`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
}

/// RBJ cookbook biquad, Direct Form I.
///
/// Coefficients are recomputed only when cutoff moves by more than a small
/// tolerance, so per-sample automation of the cutoff stays cheap.
#[derive(Clone, Debug)]
pub struct Biquad {
    filter_type: FilterType,
    cutoff: f32,
    q: f32,
    sample_rate: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn new(filter_type: FilterType, cutoff: f32, q: f32, sample_rate: f32) -> Self {
        let mut filter = Self {
            filter_type,
            cutoff: 0.0,
            q: FRAC_1_SQRT_2,
            sample_rate: sample_rate.max(1.0),
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        filter.q = q;
        filter.compute(cutoff);
        filter
    }

    pub fn lowpass(cutoff: f32, sample_rate: f32) -> Self {
        Self::new(FilterType::Lowpass, cutoff, FRAC_1_SQRT_2, sample_rate)
    }

    pub fn highpass(cutoff: f32, sample_rate: f32) -> Self {
        Self::new(FilterType::Highpass, cutoff, FRAC_1_SQRT_2, sample_rate)
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// Changes response and resonance; state is kept so the switch does not click.
    pub fn configure(&mut self, filter_type: FilterType, q: f32) {
        if self.filter_type != filter_type || (self.q - q).abs() > f32::EPSILON {
            self.filter_type = filter_type;
            self.q = q;
            self.compute(self.cutoff);
        }
    }

    pub fn set_cutoff(&mut self, cutoff: f32) {
        if (cutoff - self.cutoff).abs() > self.cutoff * 1e-4 + 1e-3 {
            self.compute(cutoff);
        }
    }

    fn compute(&mut self, cutoff: f32) {
        // Clamp cutoff below Nyquist and keep Q away from zero
        let cutoff = cutoff.clamp(10.0, self.sample_rate * 0.49);
        let q = self.q.max(0.05);
        self.cutoff = cutoff;

        let omega = TAU * cutoff / self.sample_rate;
        let cos_omega = omega.cos();
        let sin_omega = omega.sin();
        let alpha = sin_omega / (2.0 * q);

        let (b0, b1, b2) = match self.filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_omega;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterType::Highpass => {
                let b1 = -(1.0 + cos_omega);
                (-b1 / 2.0, b1, -b1 / 2.0)
            }
            // Constant 0 dB peak gain
            FilterType::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos_omega / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        // Flush denormals
        self.y1 = if output.abs() < 1e-20 { 0.0 } else { output };
        self.y1
    }
}

/// First-order low-pass, used for envelope followers and damping.
#[derive(Clone, Debug, Default)]
pub struct OnePole {
    coeff: f32,
    state: f32,
}

impl OnePole {
    pub fn new(cutoff: f32, sample_rate: f32) -> Self {
        let mut filter = Self::default();
        filter.set_cutoff(cutoff, sample_rate);
        filter
    }

    pub fn set_cutoff(&mut self, cutoff: f32, sample_rate: f32) {
        let sample_rate = sample_rate.max(1.0);
        self.coeff = 1.0 - (-TAU * cutoff.clamp(1.0, sample_rate * 0.49) / sample_rate).exp();
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.state += (input - self.state) * self.coeff;
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

/// Feedback comb with a one-pole damper in the loop.
#[derive(Clone, Debug)]
pub struct Comb {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damping: f32,
    store: f32,
}

impl Comb {
    pub fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            index: 0,
            feedback: 0.8,
            damping: 0.2,
            store: 0.0,
        }
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback;
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.damping = damping.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.store = output * (1.0 - self.damping) + self.store * self.damping;
        self.buffer[self.index] = input + self.store * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.store = 0.0;
    }
}

/// Schroeder all-pass diffuser.
#[derive(Clone, Debug)]
pub struct Allpass {
    buffer: Vec<f32>,
    index: usize,
    gain: f32,
}

impl Allpass {
    pub fn new(length: usize, gain: f32) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            index: 0,
            gain,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        let output = delayed - self.gain * input;
        self.buffer[self.index] = input + self.gain * delayed;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms_of_sine(filter: &mut Biquad, freq: f32, sample_rate: f32) -> f32 {
        let n = 4800;
        let mut sum = 0.0;
        for i in 0..n {
            let x = (TAU * freq * i as f32 / sample_rate).sin();
            let y = filter.process(x);
            if i > n / 2 {
                sum += y * y;
            }
        }
        (sum / (n / 2) as f32).sqrt()
    }

    #[test]
    fn lowpass_attenuates_above_cutoff() {
        let sr = 48_000.0;
        let low = rms_of_sine(&mut Biquad::lowpass(500.0, sr), 100.0, sr);
        let high = rms_of_sine(&mut Biquad::lowpass(500.0, sr), 8000.0, sr);
        assert!(low > 0.6);
        assert!(high < 0.05);
    }

    #[test]
    fn highpass_attenuates_below_cutoff() {
        let sr = 48_000.0;
        let low = rms_of_sine(&mut Biquad::highpass(2000.0, sr), 50.0, sr);
        let high = rms_of_sine(&mut Biquad::highpass(2000.0, sr), 10_000.0, sr);
        assert!(low < 0.05);
        assert!(high > 0.6);
    }

    #[test]
    fn bandpass_peaks_at_center() {
        let sr = 48_000.0;
        let mk = || Biquad::new(FilterType::Bandpass, 1000.0, 2.0, sr);
        let center = rms_of_sine(&mut mk(), 1000.0, sr);
        let off = rms_of_sine(&mut mk(), 8000.0, sr);
        assert!(center > 0.6);
        assert!(off < center * 0.3);
    }

    #[test]
    fn cutoff_is_clamped_below_nyquist() {
        let filter = Biquad::lowpass(40_000.0, 48_000.0);
        assert!(filter.cutoff() < 24_000.0);
    }

    #[test]
    fn comb_echoes_after_its_length() {
        let mut comb = Comb::new(4);
        comb.set_damping(0.0);
        comb.set_feedback(0.5);
        let out: Vec<f32> = (0..9)
            .map(|i| comb.process(if i == 0 { 1.0 } else { 0.0 }))
            .collect();
        assert_eq!(out[4], 1.0);
        assert_eq!(out[8], 0.5);
    }

    #[test]
    fn filter_type_serializes_lowercase() {
        let json = serde_json::to_string(&FilterType::Bandpass).unwrap();
        assert_eq!(json, "\"bandpass\"");
    }
}
