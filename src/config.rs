//! Run configuration, stored as RON. Every field has a default, so a config
//! file only needs to mention what it changes:
//!
//! ```text
//! (
//!     link: (port: Some("/dev/ttyUSB0"), baud_rate: 115200),
//!     motion: (bounds: (center: (10.5, 10.5), max_radius: 6.0, min_z: 0.0, max_z: 60.0)),
//! )
//! ```

use crate::gcode::{UnitsConfig, SETUP_COMMANDS};
use crate::motion::{MotionConfig, Position};
use crate::note_mapper::NoteTable;
use serde::{Deserialize, Serialize};

use std::{borrow::Cow, fmt, fs, io, path::Path, time::Duration};

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device; when unset the user picks one at startup
    pub port: Option<String>,
    #[allow(missing_docs)]
    pub baud_rate: u32,
    /// How long to wait for each acknowledgment
    pub ack_timeout_secs: f64,
    /// Substrings that make an otherwise unrecognised reply an acknowledgment
    pub ack_markers: Vec<String>,
    /// Pause after opening the port while the board resets
    pub open_settle_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 250000,
            ack_timeout_secs: 50.0,
            ack_markers: vec!["ok".to_owned(), "wait".to_owned()],
            open_settle_ms: 2000,
        }
    }
}

impl LinkConfig {
    #[allow(missing_docs)]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_secs.max(0.0))
    }
}

/// Audio capture and analysis settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested capture rate for live sources
    pub sample_rate: u32,
    /// Samples per analysed block
    pub block_size: usize,
    /// Blocks quieter than this (RMS) count as silence
    pub loudness_threshold: f32,
    /// High-pass pre-filter cutoff; `None` turns the filter off
    pub highpass_cutoff_hz: Option<f32>,
    /// Input device name for live capture; `None` for the default device
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 2048,
            loudness_threshold: 0.01,
            highpass_cutoff_hz: Some(50.0),
            input_device: None,
        }
    }
}

/// Everything a choreography run needs to know.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChoreoConfig {
    /// Serial link
    pub link: LinkConfig,
    /// Audio capture and analysis
    pub audio: AudioConfig,
    /// Bounds, gains and direction tables
    pub motion: MotionConfig,
    #[allow(missing_docs)]
    pub units: UnitsConfig,
    /// Notes the analyser snaps frequencies to
    pub note_table: NoteTable,
    /// Where the pen starts, in the same units as the bounds
    pub home: Position,
    /// Feed rate for the move to `home`
    pub initial_feed: f64,
    /// Sent one by one before the first move
    pub setup_commands: Vec<String>,
    /// Sent after a deliberate stop or at the end of a file
    pub finish_commands: Vec<String>,
    /// Pause after each acknowledged move on a live printer
    pub settle_ms: u64,
}

impl Default for ChoreoConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            audio: AudioConfig::default(),
            motion: MotionConfig::default(),
            units: UnitsConfig::default(),
            note_table: NoteTable::default(),
            home: Position::new(10.5, 10.5, 10.0),
            initial_feed: 500.0,
            setup_commands: SETUP_COMMANDS.iter().map(|s| s.to_string()).collect(),
            finish_commands: vec!["M84".to_owned()],
            settle_ms: 500,
        }
    }
}

/// Returned when a config file cannot be used.
#[derive(Debug)]
pub enum ConfigError {
    /// Returned when io fails when reading or writing files.
    IoError(io::Error),

    /// Returned when serialization fails.
    RonError(ron::Error),

    /// Returned when deserialization fails.
    RonSpannedError(ron::de::SpannedError),

    /// The file parsed, but the values make no sense.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            CE::Invalid(why) => Cow::from(format!("invalid config: {}", why)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl ChoreoConfig {
    /// Reads and validates a RON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_ron(&text)
    }

    /// Parses and validates RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::de::from_str(text).map_err(ConfigError::RonSpannedError)?;
        config.validate()?;
        Ok(config)
    }

    /// The config as pretty RON.
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::RonError)
    }

    /// Writes the config out as pretty RON.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_ron()?).map_err(ConfigError::IoError)
    }

    /// Rejects values that would make the run meaningless or unsafe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.motion;
        let b = &m.bounds;
        let problem = if self.audio.block_size == 0 {
            Some("audio.block_size must be positive")
        } else if !(b.max_radius >= 0.0) {
            Some("motion.bounds.max_radius must not be negative")
        } else if !(b.min_z <= b.max_z) {
            Some("motion.bounds.min_z must not exceed max_z")
        } else if !(m.base_feed > 0.0) || !(m.base_feed <= m.max_feed) {
            Some("motion.base_feed must be positive and no more than max_feed")
        } else if !(self.initial_feed > 0.0) {
            Some("initial_feed must be positive")
        } else if !b.contains(&self.home) {
            Some("home lies outside motion.bounds")
        } else {
            None
        };

        match problem {
            Some(why) => Err(ConfigError::Invalid(why.to_owned())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ChoreoConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_ron_fills_in_defaults() {
        let text = r#"(
            link: (port: Some("/dev/ttyACM0"), baud_rate: 115200),
            motion: (bounds: (center: (10.5, 10.5), max_radius: 6.0, min_z: 0.0, max_z: 60.0)),
        )"#;
        let config = ChoreoConfig::from_ron(text).unwrap();
        assert_eq!(config.link.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.link.baud_rate, 115200);
        assert_eq!(config.link.ack_timeout_secs, 50.0);
        assert_eq!(config.motion.bounds.max_radius, 6.0);
        assert_eq!(config.motion.max_feed, 1000.0);
        assert_eq!(config.audio.block_size, 2048);
    }

    #[test]
    fn write_and_read_path() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let config = ChoreoConfig::default();
        config.to_path(tempfile.path()).unwrap();
        let read = ChoreoConfig::from_path(tempfile.path()).unwrap();
        assert_eq!(config, read);
    }

    #[test]
    fn rejects_home_outside_bounds() {
        let text = "(home: (x: 100.0, y: 0.0, z: 0.0))";
        assert!(matches!(
            ChoreoConfig::from_ron(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unsorted_note_table() {
        let text = r#"(note_table: [("A4", 440.0), ("G4", 392.0)])"#;
        assert!(matches!(
            ChoreoConfig::from_ron(text),
            Err(ConfigError::RonSpannedError(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(ChoreoConfig::from_ron("(link: 12)").is_err());
        assert!(ChoreoConfig::from_path("/no/such/config.ron").is_err());
    }
}
