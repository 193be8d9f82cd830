use crate::synth::prelude::one_pole_coeff;

const MAX_SEGMENTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    end_time: f64,
    end_value: f32,
    shape: Shape,
}

#[derive(Debug, Clone, Copy)]
struct Target {
    start: f64,
    value: f32,
    time_constant: f32,
}

/// A parameter automated by timestamped breakpoints on the render clock.
///
/// Holds an anchor value at an anchor time, up to [`MAX_SEGMENTS`] ramps after
/// it, and optionally an exponential approach toward a target once the ramps
/// run out. Storage is fixed-size so scheduling never allocates.
#[derive(Debug, Clone)]
pub struct Ramp {
    before: f32,
    anchor_time: f64,
    anchor_value: f32,
    segments: [Segment; MAX_SEGMENTS],
    len: usize,
    target: Option<Target>,
}

impl Ramp {
    pub fn new(value: f32) -> Self {
        Self {
            before: value,
            anchor_time: 0.0,
            anchor_value: value,
            segments: [Segment {
                end_time: 0.0,
                end_value: value,
                shape: Shape::Linear,
            }; MAX_SEGMENTS],
            len: 0,
            target: None,
        }
    }

    /// Drops everything scheduled and jumps to `value` at `time`. Reads before
    /// `time` keep returning the previously automated value.
    pub fn set_value_at(&mut self, time: f64, value: f32) {
        self.before = self.value_at(time);
        self.anchor_time = time;
        self.anchor_value = value;
        self.len = 0;
        self.target = None;
    }

    /// Freezes the curve at whatever it reads at `time`.
    pub fn cancel_and_hold(&mut self, time: f64) {
        let value = self.value_at(time);
        self.set_value_at(time, value);
        self.before = value;
    }

    pub fn linear_ramp_to(&mut self, value: f32, end_time: f64) {
        self.push(value, end_time, Shape::Linear);
    }

    /// Exponential ramp; falls back to linear when either end is not positive.
    pub fn exponential_ramp_to(&mut self, value: f32, end_time: f64) {
        self.push(value, end_time, Shape::Exponential);
    }

    /// Exponential approach toward `value` starting at `start`.
    pub fn set_target(&mut self, value: f32, start: f64, time_constant: f32) {
        self.cancel_and_hold(start);
        self.target = Some(Target {
            start,
            value,
            time_constant: time_constant.max(1e-4),
        });
    }

    fn push(&mut self, value: f32, end_time: f64, shape: Shape) {
        self.target = None;
        let segment = Segment {
            end_time,
            end_value: value,
            shape,
        };
        if self.len < MAX_SEGMENTS {
            self.segments[self.len] = segment;
            self.len += 1;
        } else {
            self.segments[MAX_SEGMENTS - 1] = segment;
        }
    }

    pub fn value_at(&self, time: f64) -> f32 {
        if time < self.anchor_time {
            return self.before;
        }
        let mut t0 = self.anchor_time;
        let mut v0 = self.anchor_value;
        for segment in &self.segments[..self.len] {
            if time < segment.end_time {
                let span = segment.end_time - t0;
                let progress = if span <= 0.0 {
                    1.0
                } else {
                    ((time - t0) / span) as f32
                };
                return interpolate(v0, segment.end_value, progress, segment.shape);
            }
            t0 = segment.end_time;
            v0 = segment.end_value;
        }
        if let Some(target) = self.target {
            let start = target.start.max(t0);
            if time > start {
                let elapsed = (time - start) as f32;
                return target.value + (v0 - target.value) * (-elapsed / target.time_constant).exp();
            }
        }
        v0
    }
}

fn interpolate(from: f32, to: f32, progress: f32, shape: Shape) -> f32 {
    match shape {
        Shape::Exponential if from > 0.0 && to > 0.0 => from * (to / from).powf(progress),
        _ => from + (to - from) * progress,
    }
}

/// One-pole smoother toward a target, advanced once per sample.
#[derive(Debug, Clone)]
pub struct Glide {
    current: f32,
    target: f32,
    coeff: f32,
}

impl Glide {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            coeff: 1.0,
        }
    }

    pub fn set_time_constant(&mut self, seconds: f32, sample_rate: f32) {
        self.coeff = one_pole_coeff(seconds, sample_rate);
    }

    pub fn set_target(&mut self, value: f32) {
        self.target = value;
    }

    /// Moves target and current value together.
    pub fn jump(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let diff = self.target - self.current;
        if diff.abs() < 1e-6 {
            self.current = self.target;
        } else {
            self.current += diff * self.coeff;
        }
        self.current
    }
}
