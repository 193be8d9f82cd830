use crate::synth::prelude::{lerp, PI, TAU};
use serde::{Deserialize, Serialize};

/// Harmonics per generated spectrum.
pub const PARTIALS: usize = 24;
/// Morph snapshots precomputed per timbre.
pub const SNAPSHOTS: usize = 32;
/// Samples per rendered single-cycle table.
pub const TABLE_SIZE: usize = 2048;
/// How far a full morph moves a timbre toward the gritty saw spectrum.
const MORPH_DEPTH: f32 = 0.35;

/// The harmonic timbres an oscillator can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Timbre {
    MellowTriangle,
    SmoothSaw,
    GrittySaw,
    ReeseBlend,
    HollowPulse,
    AiryBlend,
    MetallicFm,
}

impl Timbre {
    pub const ALL: [Timbre; 7] = [
        Timbre::MellowTriangle,
        Timbre::SmoothSaw,
        Timbre::GrittySaw,
        Timbre::ReeseBlend,
        Timbre::HollowPulse,
        Timbre::AiryBlend,
        Timbre::MetallicFm,
    ];

    fn index(self) -> usize {
        match self {
            Timbre::MellowTriangle => 0,
            Timbre::SmoothSaw => 1,
            Timbre::GrittySaw => 2,
            Timbre::ReeseBlend => 3,
            Timbre::HollowPulse => 4,
            Timbre::AiryBlend => 5,
            Timbre::MetallicFm => 6,
        }
    }

    /// The primary spectrum of this timbre.
    pub fn harmonics(self, partials: usize) -> Harmonics {
        match self {
            Timbre::MellowTriangle => Harmonics::build(partials, |n| {
                if n % 2 == 0 {
                    return (0.0, 0.0);
                }
                let amp = 1.0 / (n * n) as f32;
                let sign = if n % 4 == 1 { 1.0 } else { -1.0 };
                (sign * amp, 0.0)
            }),
            Timbre::SmoothSaw => Harmonics::build(partials, |n| (0.0, 1.0 / n as f32)),
            Timbre::GrittySaw => Harmonics::build(partials, |n| {
                let nf = n as f32;
                let amp = (1.0 / nf) * (1.0 + (1.0 + nf).log2());
                let phase = if n % 2 == 0 { PI / 4.0 } else { PI / 2.0 };
                (phase.cos() * amp * 0.6, phase.sin() * amp)
            }),
            Timbre::ReeseBlend => Harmonics::build(partials, |n| {
                let nf = n as f32;
                let detune_a = (nf * 0.15).sin() * 0.3;
                let detune_b = (nf * 0.12).cos() * 0.3;
                let amp = 1.0 / nf;
                (amp * detune_a, amp * (1.0 + detune_b))
            }),
            Timbre::HollowPulse => Harmonics::build(partials, |n| {
                if n % 2 == 0 {
                    return (0.0, 0.0);
                }
                let amp = 1.0 / n as f32;
                (amp * 0.5, amp * 0.8)
            }),
            Timbre::AiryBlend => Harmonics::build(partials, |n| {
                let nf = n as f32;
                let amp = (1.0 / nf) * (-0.05 * nf).exp();
                (amp * 0.3, amp)
            }),
            Timbre::MetallicFm => Harmonics::build(partials, |n| {
                let amp = (1.0 / n as f32) * if n % 2 == 0 { 0.8 } else { 1.2 };
                let phase = (n % 3) as f32 * (PI / 3.0);
                (phase.cos() * amp, phase.sin() * amp)
            }),
        }
    }
}

/// Cosine (`real`) and sine (`imag`) amplitudes per harmonic; index 0 is DC.
#[derive(Debug, Clone, PartialEq)]
pub struct Harmonics {
    pub real: Vec<f32>,
    pub imag: Vec<f32>,
}

impl Harmonics {
    fn build(partials: usize, f: impl Fn(usize) -> (f32, f32)) -> Self {
        let mut real = vec![0.0; partials + 1];
        let mut imag = vec![0.0; partials + 1];
        for n in 1..=partials {
            let (r, i) = f(n);
            real[n] = r;
            imag[n] = i;
        }
        Self { real, imag }
    }

    /// Element-wise interpolation toward `other`.
    pub fn mix(&self, other: &Harmonics, t: f32) -> Harmonics {
        let blend = |a: &[f32], b: &[f32]| -> Vec<f32> {
            a.iter()
                .enumerate()
                .map(|(i, &x)| lerp(x, b.get(i).copied().unwrap_or(0.0), t))
                .collect()
        };
        Harmonics {
            real: blend(&self.real, &other.real),
            imag: blend(&self.imag, &other.imag),
        }
    }

    /// Additive render of one cycle. The spectrum is not normalized.
    fn render_cycle(&self, size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = TAU * i as f32 / size as f32;
                self.real
                    .iter()
                    .zip(&self.imag)
                    .enumerate()
                    .skip(1)
                    .map(|(n, (r, im))| {
                        let angle = phase * n as f32;
                        r * angle.cos() + im * angle.sin()
                    })
                    .sum()
            })
            .collect()
    }
}

/// One morph snapshot: its spectrum plus the rendered cycle used for playback.
#[derive(Debug, Clone)]
pub struct WaveTable {
    harmonics: Harmonics,
    samples: Vec<f32>,
}

impl WaveTable {
    fn new(harmonics: Harmonics) -> Self {
        let samples = harmonics.render_cycle(TABLE_SIZE);
        Self { harmonics, samples }
    }

    pub fn harmonics(&self) -> &Harmonics {
        &self.harmonics
    }

    /// Linearly interpolated lookup; `phase` is in cycles.
    #[inline]
    pub fn sample(&self, phase: f32) -> f32 {
        let len = self.samples.len();
        let pos = phase.rem_euclid(1.0) * len as f32;
        let index = (pos as usize).min(len - 1);
        let frac = pos - index as f32;
        let a = self.samples[index];
        let b = self.samples[(index + 1) % len];
        a + (b - a) * frac
    }
}

/// Precomputed morph snapshots for every [`Timbre`].
///
/// Built once; the render path only ever reads it.
pub struct WaveTableBank {
    tables: Vec<Vec<WaveTable>>,
}

impl WaveTableBank {
    pub fn new() -> Self {
        let secondary = Timbre::GrittySaw.harmonics(PARTIALS);
        let tables = Timbre::ALL
            .iter()
            .map(|timbre| {
                let primary = timbre.harmonics(PARTIALS);
                (0..SNAPSHOTS)
                    .map(|i| {
                        let t = i as f32 / (SNAPSHOTS - 1) as f32;
                        WaveTable::new(primary.mix(&secondary, t * MORPH_DEPTH))
                    })
                    .collect()
            })
            .collect();
        log::debug!(
            "wavetable bank ready: {} timbres x {} snapshots",
            Timbre::ALL.len(),
            SNAPSHOTS
        );
        Self { tables }
    }

    /// Nearest snapshot index for a morph position.
    pub fn snapshot_index(morph: f32) -> usize {
        let clamped = if morph.is_finite() {
            morph.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (clamped * (SNAPSHOTS - 1) as f32).round() as usize
    }

    pub fn get_table(&self, timbre: Timbre, morph: f32) -> &WaveTable {
        self.table(timbre, Self::snapshot_index(morph))
    }

    pub fn table(&self, timbre: Timbre, index: usize) -> &WaveTable {
        let snapshots = &self.tables[timbre.index()];
        &snapshots[index.min(snapshots.len() - 1)]
    }
}

impl Default for WaveTableBank {
    fn default() -> Self {
        Self::new()
    }
}
