use crate::synth::prelude::TAU;

// Smoothing applied to delay-time changes. Smaller = slower/smoother.
const DEFAULT_SMOOTHING_COEFF: f32 = 0.002;
const MIN_DELAY_SAMPLES: f32 = 1.0;
// Linear interpolation reads idx and idx + 1
const INTERPOLATION_MARGIN: usize = 2;

#[derive(Clone, Debug)]
pub struct Lfo {
    phase: f32,
    sample_rate: f32,
    phase_increment: f32,
}

impl Lfo {
    pub fn new(freq_hz: f32, sample_rate: f32, phase: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Lfo {
            phase: phase.rem_euclid(1.0),
            sample_rate,
            phase_increment: freq_hz / sample_rate,
        }
    }

    #[inline]
    pub fn process(&mut self) -> f32 {
        let val = (self.phase * TAU).sin();
        self.phase += self.phase_increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        val
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    pub fn set_freq(&mut self, freq_hz: f32) {
        self.phase_increment = freq_hz.max(0.0) / self.sample_rate;
    }
}

/// Circular buffer with a fractional, linearly interpolated read.
#[derive(Clone, Debug)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    /// Allocates room for delays up to `max_delay_samples`.
    pub fn new(max_delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay_samples.max(1) + INTERPOLATION_MARGIN],
            write_pos: 0,
        }
    }

    /// Largest delay this line can read back.
    pub fn max_delay(&self) -> f32 {
        (self.buffer.len() - INTERPOLATION_MARGIN) as f32
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Reads the sample written `delay_samples` writes ago.
    #[inline]
    pub fn read(&self, delay_samples: f32) -> f32 {
        let delay = delay_samples.clamp(MIN_DELAY_SAMPLES, self.max_delay());
        let len = self.buffer.len() as f32;
        let read_pos = (self.write_pos as f32 - delay).rem_euclid(len);
        let index = read_pos.floor() as usize % self.buffer.len();
        let fraction = read_pos - read_pos.floor();
        let a = self.buffer[index];
        let b = self.buffer[(index + 1) % self.buffer.len()];
        a + fraction * (b - a)
    }

    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }
}

/// Delay whose length is swept by a sine LFO around a smoothed base delay.
#[derive(Clone, Debug)]
pub struct ModulatedDelayLine {
    line: DelayLine,
    base_delay_current: f32,
    base_delay_target: f32,
    smoothing_coeff: f32,
    lfo: Lfo,
    modulation_depth: f32,
}

impl ModulatedDelayLine {
    pub fn new(
        base_delay_samples: f32,
        max_total_delay_samples: f32,
        lfo_freq_hz: f32,
        lfo_start_phase: f32,
        modulation_depth_samples: f32,
        sample_rate: f32,
    ) -> Self {
        let line = DelayLine::new(max_total_delay_samples.ceil().max(MIN_DELAY_SAMPLES) as usize);
        let mut delay = ModulatedDelayLine {
            line,
            base_delay_current: 0.0,
            base_delay_target: 0.0,
            smoothing_coeff: DEFAULT_SMOOTHING_COEFF,
            lfo: Lfo::new(lfo_freq_hz, sample_rate, lfo_start_phase),
            modulation_depth: modulation_depth_samples.abs(),
        };
        delay.set_base_delay_samples(base_delay_samples);
        delay.base_delay_current = delay.base_delay_target;
        delay
    }

    pub fn reset(&mut self) {
        self.line.reset();
        self.lfo.reset();
        self.base_delay_current = self.base_delay_target;
    }

    pub fn set_lfo_freq(&mut self, freq_hz: f32) {
        self.lfo.set_freq(freq_hz);
    }

    pub fn set_modulation_depth_samples(&mut self, depth_samples: f32) {
        self.modulation_depth = depth_samples.abs();
        self.set_base_delay_samples(self.base_delay_target);
    }

    /// Sets the target base delay. The change is smoothed.
    pub fn set_base_delay_samples(&mut self, delay_samples: f32) {
        // Base plus full modulation depth must fit in the buffer
        let max_base = (self.line.max_delay() - self.modulation_depth).max(MIN_DELAY_SAMPLES);
        self.base_delay_target = delay_samples.clamp(MIN_DELAY_SAMPLES, max_base);
    }

    pub fn base_delay_samples(&self) -> f32 {
        self.base_delay_current
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        if (self.base_delay_current - self.base_delay_target).abs() > 1e-6 {
            self.base_delay_current +=
                (self.base_delay_target - self.base_delay_current) * self.smoothing_coeff;
        } else {
            self.base_delay_current = self.base_delay_target;
        }
        let total = self.base_delay_current + self.lfo.process() * self.modulation_depth;
        let output = self.line.read(total);
        self.line.write(input);
        output
    }
}
