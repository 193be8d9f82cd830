/// Seed used when a caller asks for seed `0`, which would lock xorshift at zero.
const ZERO_SEED_REPLACEMENT: u32 = 0x9E37_79B9;
/// `2^24`: the top 24 state bits are exact in an `f32` mantissa.
const F32_SPAN: f32 = 16_777_216.0;

/// Seeded 32-bit xorshift stream.
///
/// The output depends only on integer operations, so the same seed yields the
/// same sequence on every platform.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u32,
}

impl DeterministicRng {
    pub fn new(seed: u32) -> Self {
        let mut rng = Self { state: 0 };
        rng.set_seed(seed);
        rng
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.state = if seed == 0 {
            ZERO_SEED_REPLACEMENT
        } else {
            seed
        };
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    /// Advances the generator and returns a value in `[0, 1)`.
    pub fn next(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        (x >> 8) as f32 / F32_SPAN
    }

    pub fn next_range(&mut self, min: f32, max: f32) -> f32 {
        let t = self.next();
        min + (max - min) * t
    }

    /// Picks an element uniformly; `None` for an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let index = (self.next() * items.len() as f32).floor() as usize % items.len();
        items.get(index)
    }

    /// Bipolar draw in `[-1, 1]`.
    pub fn next_bipolar(&mut self) -> f32 {
        self.next() * 2.0 - 1.0
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(1_234_567)
    }
}
