//! A file-backed [`AudioSource`] built on hound. Reads a WAV file block by
//! block, keeping only the first channel.

use crate::audio_source::{AudioBlock, AudioSource, SourceError};
use hound::{SampleFormat, WavReader};
use log::{debug, info};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Streams mono blocks out of a WAV file until it runs out.
pub struct WavSource<R: Read> {
    reader: WavReader<R>,
    channels: usize,
    format: SampleFormat,
    bits_per_sample: u16,
    sample_rate: u32,
}

impl WavSource<BufReader<File>> {
    /// Opens the WAV file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let reader = WavReader::open(path.as_ref())?;
        info!(
            "Opened {} ({} Hz, {} channel(s), {} samples)",
            path.as_ref().display(),
            reader.spec().sample_rate,
            reader.spec().channels,
            reader.duration()
        );
        Ok(Self::from_reader(reader))
    }
}

impl<R: Read> WavSource<R> {
    /// Wraps an already open hound reader.
    pub fn from_reader(reader: WavReader<R>) -> Self {
        let spec = reader.spec();
        Self {
            reader,
            channels: spec.channels.max(1) as usize,
            format: spec.sample_format,
            bits_per_sample: spec.bits_per_sample,
            sample_rate: spec.sample_rate,
        }
    }

    // Pulls up to `n` interleaved samples, normalised to [-1, 1].
    fn read_interleaved(&mut self, n: usize) -> Result<Vec<f32>, SourceError> {
        match self.format {
            SampleFormat::Float => Ok(self
                .reader
                .samples::<f32>()
                .take(n)
                .collect::<Result<Vec<f32>, hound::Error>>()?),
            SampleFormat::Int => {
                let full_scale = (1i64 << (self.bits_per_sample.saturating_sub(1))) as f32;
                Ok(self
                    .reader
                    .samples::<i32>()
                    .take(n)
                    .map(|s| s.map(|s| s as f32 / full_scale))
                    .collect::<Result<Vec<f32>, hound::Error>>()?)
            }
        }
    }
}

impl<R: Read> AudioSource for WavSource<R> {
    fn next_block(&mut self, size: usize) -> Result<AudioBlock, SourceError> {
        let interleaved = self.read_interleaved(size * self.channels)?;
        if interleaved.is_empty() {
            debug!("WAV source exhausted");
            return Err(SourceError::Exhausted);
        }

        let samples = interleaved.into_iter().step_by(self.channels).collect();
        Ok(AudioBlock::new(samples, self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
