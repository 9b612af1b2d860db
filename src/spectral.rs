//! Turns a block of audio into the two numbers the choreography cares
//! about: the dominant frequency and the RMS loudness.

use crate::audio_source::AudioBlock;
use rustfft::{num_complex::Complex, FftPlanner};

use std::f64::consts::PI;
use std::fmt;

/// What a single block sounded like. A `peak_frequency_hz` of zero means
/// no pitch could be found.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpectralReading {
    /// Frequency of the strongest non-negative bin, in Hz
    pub peak_frequency_hz: f32,
    /// Root-mean-square amplitude of the block
    pub loudness_rms: f32,
}

/// Coarse loudness buckets, handy for eyeballing a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoudnessCategory {
    /// Below 0.025 RMS
    Softest,
    /// Below 0.05
    Soft,
    /// Below 0.075
    Neutral,
    /// Up to and including 0.1
    Loud,
    /// Anything above
    Louder,
}

impl LoudnessCategory {
    /// Buckets an RMS value.
    pub fn from_rms(rms: f32) -> Self {
        if rms < 0.025 {
            Self::Softest
        } else if rms < 0.05 {
            Self::Soft
        } else if rms < 0.075 {
            Self::Neutral
        } else if rms <= 0.1 {
            Self::Loud
        } else {
            Self::Louder
        }
    }
}

impl fmt::Display for LoudnessCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Softest => "softest",
            Self::Soft => "soft",
            Self::Neutral => "neutral",
            Self::Loud => "loud",
            Self::Louder => "LOUDER",
        };
        write!(f, "{}", s)
    }
}

/// Computes [`SpectralReading`]s, optionally high-passing the block first to
/// keep rumble from winning the peak search.
pub struct SpectralAnalyzer {
    planner: FftPlanner<f32>,
    highpass_cutoff_hz: Option<f32>,
}

impl SpectralAnalyzer {
    /// Makes an analyzer. `highpass_cutoff_hz` enables the pre-filter and
    /// also removes every bin at or below the cutoff from the peak search.
    pub fn new(highpass_cutoff_hz: Option<f32>) -> Self {
        Self {
            planner: FftPlanner::new(),
            highpass_cutoff_hz: highpass_cutoff_hz.filter(|c| *c > 0.0),
        }
    }

    /// Analyzes one block. The output only depends on the block.
    pub fn analyze(&mut self, block: &AudioBlock) -> SpectralReading {
        let n = block.len();
        if n == 0 || block.sample_rate == 0 {
            return SpectralReading::default();
        }

        let filtered;
        let samples: &[f32] = match self.highpass_cutoff_hz {
            Some(cutoff) => {
                filtered = high_pass(&block.samples, cutoff, block.sample_rate);
                &filtered
            }
            None => &block.samples,
        };

        let loudness_rms = rms(samples);
        if loudness_rms == 0.0 || !loudness_rms.is_finite() {
            return SpectralReading::default();
        }

        let fft = self.planner.plan_fft_forward(n);
        let mut buf: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
        fft.process(&mut buf);

        let bin_hz = block.sample_rate as f32 / n as f32;
        let first_bin = match self.highpass_cutoff_hz {
            Some(cutoff) => (cutoff / bin_hz).floor() as usize + 1,
            None => 0,
        };

        // First maximum wins, so a flat spectrum lands on the lowest bin
        let mut peak: Option<(usize, f32)> = None;
        for (i, c) in buf.iter().enumerate().take(n / 2).skip(first_bin) {
            let mag = c.norm();
            if peak.map_or(true, |(_, best)| mag > best) {
                peak = Some((i, mag));
            }
        }

        let peak_frequency_hz = match peak {
            Some((i, mag)) if mag > 0.0 && mag.is_finite() => i as f32 * bin_hz,
            _ => 0.0,
        };

        SpectralReading {
            peak_frequency_hz,
            loudness_rms,
        }
    }
}

/// `sqrt(mean(sample²))`, zero for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Second-order Butterworth high-pass (RBJ biquad), run over the block from
/// a cold start.
pub fn high_pass(samples: &[f32], cutoff_hz: f32, sample_rate: u32) -> Vec<f32> {
    let nyquist = sample_rate as f64 / 2.0;
    let cutoff = (cutoff_hz as f64).clamp(1.0, nyquist * 0.99);

    let w0 = 2.0 * PI * cutoff / sample_rate as f64;
    let (sin, cos) = w0.sin_cos();
    let alpha = sin / (2.0 * std::f64::consts::FRAC_1_SQRT_2);

    let a0 = 1.0 + alpha;
    let b0 = (1.0 + cos) / 2.0 / a0;
    let b1 = -(1.0 + cos) / a0;
    let b2 = b0;
    let a1 = -2.0 * cos / a0;
    let a2 = (1.0 - alpha) / a0;

    let (mut x1, mut x2, mut y1, mut y2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    samples
        .iter()
        .map(|&x| {
            let x = x as f64;
            let y = b0 * x + b1 * x1 + b2 * x2 - a1 * y1 - a2 * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;
            y as f32
        })
        .collect()
}
