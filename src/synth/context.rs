use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// State shared between the render path and the control path.
///
/// Every field is a single atomic scalar written by exactly one side: the
/// render path owns the clock and the follower level, the control path owns the
/// active voice count.
#[derive(Debug)]
pub struct RenderContext {
    samples_rendered: AtomicU64,
    sample_rate: AtomicU32,
    follower_level: AtomicU32,
    active_voices: AtomicU32,
}

impl RenderContext {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            samples_rendered: AtomicU64::new(0),
            sample_rate: AtomicU32::new(sample_rate.to_bits()),
            follower_level: AtomicU32::new(0.0_f32.to_bits()),
            active_voices: AtomicU32::new(0),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        f32::from_bits(self.sample_rate.load(Ordering::Acquire))
    }

    pub fn set_sample_rate(&self, sample_rate: f32) {
        self.sample_rate
            .store(sample_rate.max(1.0).to_bits(), Ordering::Release);
    }

    pub fn samples_rendered(&self) -> u64 {
        self.samples_rendered.load(Ordering::Acquire)
    }

    /// Render clock in seconds.
    pub fn now(&self) -> f64 {
        self.samples_rendered() as f64 / f64::from(self.sample_rate())
    }

    pub fn advance(&self, frames: u64) {
        self.samples_rendered.fetch_add(frames, Ordering::AcqRel);
    }

    /// Moves the clock to an absolute time. Used when no render path is
    /// driving the clock (offline control, tests).
    pub fn set_time(&self, seconds: f64) {
        let samples = (seconds.max(0.0) * f64::from(self.sample_rate())).round() as u64;
        self.samples_rendered.store(samples, Ordering::Release);
    }

    pub fn follower_level(&self) -> f32 {
        f32::from_bits(self.follower_level.load(Ordering::Acquire))
    }

    pub fn publish_follower_level(&self, level: f32) {
        self.follower_level.store(level.to_bits(), Ordering::Release);
    }

    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Acquire) as usize
    }

    pub fn publish_active_voices(&self, count: usize) {
        self.active_voices.store(count as u32, Ordering::Release);
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new(48_000.0)
    }
}
