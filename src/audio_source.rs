//! The audio side of the pipeline: a source hands out fixed-size blocks of
//! mono samples, one at a time, whenever the choreographer asks for them.

use std::{borrow::Cow, fmt, io};

/// A block of mono samples, tagged with the rate they were captured at.
/// Samples are normalised to `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// The samples, oldest first
    pub samples: Vec<f32>,
    /// Samples per second
    pub sample_rate: u32,
}

impl AudioBlock {
    /// Wraps some samples captured at `sample_rate`.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Number of samples in the block
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the block holds no samples at all
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Everything that can go wrong while pulling audio.
#[derive(Debug)]
pub enum SourceError {
    /// A file-backed source has nothing left to give. This is the normal
    /// end of a recorded run, not a failure.
    Exhausted,

    /// The capture device refused to open or died mid-stream.
    Device(String),

    /// Returned when io fails underneath a source.
    Io(io::Error),

    /// Returned when hound cannot read or decode a WAV file.
    Hound(hound::Error),

    /// Returned when symphonia cannot recognise or decode a media file.
    Media(symphonia::core::errors::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            SourceError::Exhausted => Cow::from("audio source exhausted"),
            SourceError::Device(msg) => Cow::from(format!("audio device error: {}", msg)),
            SourceError::Io(error) => Cow::from(format!("io error: {}", error)),
            SourceError::Hound(error) => Cow::from(format!("wav error: {}", error)),
            SourceError::Media(error) => Cow::from(format!("media error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for SourceError {}

impl From<io::Error> for SourceError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<hound::Error> for SourceError {
    fn from(value: hound::Error) -> Self {
        match value {
            hound::Error::IoError(e) => Self::Io(e),
            other => Self::Hound(other),
        }
    }
}

impl From<symphonia::core::errors::Error> for SourceError {
    fn from(value: symphonia::core::errors::Error) -> Self {
        Self::Media(value)
    }
}

/// Anything that can feed the choreographer with audio.
///
/// `next_block` blocks until `size` samples are available. File-backed
/// sources return [`SourceError::Exhausted`] once they run dry; live sources
/// never do.
pub trait AudioSource {
    /// Pull the next block of (at most) `size` samples.
    fn next_block(&mut self, size: usize) -> Result<AudioBlock, SourceError>;

    /// The rate the blocks are delivered at.
    fn sample_rate(&self) -> u32;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn next_block(&mut self, size: usize) -> Result<AudioBlock, SourceError> {
        (**self).next_block(size)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed list of blocks, then reports exhaustion.
    pub(crate) struct ScriptedSource {
        pub(crate) blocks: VecDeque<Vec<f32>>,
        pub(crate) sample_rate: u32,
    }

    impl ScriptedSource {
        pub(crate) fn new(blocks: Vec<Vec<f32>>, sample_rate: u32) -> Self {
            Self {
                blocks: blocks.into(),
                sample_rate,
            }
        }
    }

    impl AudioSource for ScriptedSource {
        fn next_block(&mut self, _size: usize) -> Result<AudioBlock, SourceError> {
            self.blocks
                .pop_front()
                .map(|s| AudioBlock::new(s, self.sample_rate))
                .ok_or(SourceError::Exhausted)
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    #[test]
    fn scripted_source_runs_dry() {
        let mut src = ScriptedSource::new(vec![vec![0.0; 4]], 8000);
        assert_eq!(src.next_block(4).unwrap().len(), 4);
        assert!(matches!(src.next_block(4), Err(SourceError::Exhausted)));
    }

    #[test]
    fn hound_io_errors_become_io() {
        let err: SourceError =
            hound::Error::IoError(io::Error::new(io::ErrorKind::NotFound, "gone")).into();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
