//! A file-backed [`AudioSource`] for compressed media (MP3 and friends),
//! decoded with symphonia. Like [`crate::wav_source::WavSource`], only the
//! first channel is kept.

use crate::audio_source::{AudioBlock, AudioSource, SourceError};
use log::{debug, info, warn};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use std::fs::File;
use std::io;
use std::path::Path;

/// Streams mono blocks out of any container and codec symphonia knows.
pub struct MediaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    pending: Vec<f32>,
    finished: bool,
}

impl MediaSource {
    /// Opens the file at `path`, using its extension as a hint for the
    /// container format.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let detected = symphonia::default::get_probe().format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SourceError::Device("no audio track in file".to_owned()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| SourceError::Device("audio track has no sample rate".to_owned()))?;
        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        info!("Opened {} ({} Hz)", path.display(), sample_rate);
        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            pending: Vec::new(),
            finished: false,
        })
    }

    // Decodes one more packet into `pending`. Returns false at end of stream.
    fn decode_packet(&mut self) -> Result<bool, SourceError> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(false)
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != self.track_id {
            return Ok(true);
        }

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let channels = spec.channels.count().max(1);
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                self.pending
                    .extend(buf.samples().iter().step_by(channels).copied());
                Ok(true)
            }
            // a corrupt frame is skipped, like most players do
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl AudioSource for MediaSource {
    fn next_block(&mut self, size: usize) -> Result<AudioBlock, SourceError> {
        while !self.finished && self.pending.len() < size {
            self.finished = !self.decode_packet()?;
        }

        if self.pending.is_empty() {
            debug!("Media source exhausted");
            return Err(SourceError::Exhausted);
        }

        let n = size.min(self.pending.len());
        let samples = self.pending.drain(..n).collect();
        Ok(AudioBlock::new(samples, self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::io::Write;

    #[test]
    fn decodes_through_symphonia_then_exhausted() {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(file.path(), spec).unwrap();
        for i in 0..3000 {
            writer.write_sample((i % 100) as i16 * 100).unwrap();
            writer.write_sample(-16384i16).unwrap();
        }
        writer.finalize().unwrap();

        let mut src = MediaSource::open(file.path()).unwrap();
        assert_eq!(src.sample_rate(), 22050);

        let first = src.next_block(1024).unwrap();
        assert_eq!(first.len(), 1024);
        // left channel only, scaled into [-1, 1]
        assert_eq!(first.samples[0], 0.0);
        assert!((first.samples[1] - 100.0 / 32768.0).abs() < 1e-4);
        assert!(first.samples.iter().all(|s| *s >= 0.0 && *s <= 1.0));

        let mut total = first.len();
        loop {
            match src.next_block(1024) {
                Ok(block) => total += block.len(),
                Err(SourceError::Exhausted) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(total, 3000);
    }

    #[test]
    fn garbage_mp3_is_a_media_error() {
        let mut file = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
        file.write_all(b"definitely not an mpeg stream").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            MediaSource::open(file.path()),
            Err(SourceError::Media(_))
        ));
    }

    #[test]
    fn missing_file_is_io() {
        assert!(matches!(
            MediaSource::open("/definitely/not/here.mp3"),
            Err(SourceError::Io(_))
        ));
    }
}
