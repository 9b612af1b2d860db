// Commandline argument parser using clap for ChoreoPrinter

use crate::audio_source::{AudioSource, SourceError};
use crate::config::AudioConfig;
use crate::live_source::LiveSource;
use crate::media_source::MediaSource;
use crate::wav_source::WavSource;
use clap::{Args, Parser, ValueEnum};
use log::info;
use std::path::PathBuf;

/// Arguments for the `choreoprinter` binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct ChoreoArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Where the G-code goes: a printer on a serial port, or a file
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = OutputMode::Live)]
    pub output: OutputMode,

    /// File to write G-code to in file mode
    #[arg(short = 'o', long = "gcode-out", default_value = "choreography.gcode")]
    pub gcode_out: PathBuf,

    /// RON config file; defaults are used for anything it leaves out
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial device of the printer, overrides the config file
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate, overrides the config file
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Seed for the random nudges, for repeatable runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip the terminal monitor; press Enter to stop
    #[arg(long)]
    pub headless: bool,

    /// Send log output to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Print the effective config as RON and exit
    #[arg(long = "dump-config")]
    pub dump_config: bool,
}

/// Where the audio comes from. Shared with the `listen` binary.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Audio source to listen to
    #[arg(short = 's', long = "source", value_enum, default_value_t = SourceKind::Mic)]
    pub source: SourceKind,

    /// Audio file to read when the source is `file` (WAV, MP3, FLAC, OGG)
    #[arg(short = 'f', long = "audio-file", required_if_eq("source", "file"))]
    pub audio_file: Option<PathBuf>,

    /// Input device name for `mic` or `system`; a loopback device for `system`
    #[arg(short = 'd', long = "device")]
    pub device: Option<String>,
}

impl InputArgs {
    /// Opens the source these arguments describe. `--device` wins over the
    /// device named in `audio`.
    pub fn open_source(
        &self,
        audio: &AudioConfig,
    ) -> Result<Box<dyn AudioSource + Send>, SourceError> {
        let device = self.device.as_deref().or(audio.input_device.as_deref());

        match self.source {
            SourceKind::File => {
                let path = self.audio_file.as_ref().ok_or_else(|| {
                    SourceError::Device("no audio file given (--audio-file)".to_owned())
                })?;
                info!("Reading audio from {}", path.display());
                let is_wav = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| e.eq_ignore_ascii_case("wav"));
                if is_wav {
                    Ok(Box::new(WavSource::open(path)?))
                } else {
                    Ok(Box::new(MediaSource::open(path)?))
                }
            }
            SourceKind::Mic => Ok(Box::new(LiveSource::open(
                device,
                audio.sample_rate,
                audio.block_size,
            )?)),
            SourceKind::System => {
                let device = device.ok_or_else(|| {
                    let names = LiveSource::device_names().unwrap_or_default();
                    SourceError::Device(format!(
                        "system capture needs --device naming a loopback input; inputs: {}",
                        names.join(", ")
                    ))
                })?;
                Ok(Box::new(LiveSource::open(
                    Some(device),
                    audio.sample_rate,
                    audio.block_size,
                )?))
            }
        }
    }
}

/// Kinds of audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// The default (or named) microphone
    Mic,
    /// An audio file, played through once
    File,
    /// What the computer is playing, through a loopback input device
    System,
}

/// Where the commands go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Drive a printer over its serial port
    Live,
    /// Render the run to a G-code file
    File,
}

/// Arguments for the analysis-only `listen` binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct ListenArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// RON config file, for the audio and note table settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stop after this many blocks
    #[arg(short = 'n', long)]
    pub blocks: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definitions_are_consistent() {
        ChoreoArgs::command().debug_assert();
        ListenArgs::command().debug_assert();
    }

    #[test]
    fn defaults_to_a_live_mic_run() {
        let args = ChoreoArgs::try_parse_from(["choreoprinter"]).unwrap();
        assert_eq!(args.input.source, SourceKind::Mic);
        assert_eq!(args.output, OutputMode::Live);
        assert!(!args.headless);
        assert!(args.port.is_none());
    }

    #[test]
    fn file_source_needs_a_file() {
        assert!(ChoreoArgs::try_parse_from(["choreoprinter", "-s", "file"]).is_err());

        let args = ChoreoArgs::try_parse_from([
            "choreoprinter",
            "--source",
            "file",
            "--audio-file",
            "song.wav",
            "--mode",
            "file",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "115200",
        ])
        .unwrap();
        assert_eq!(args.input.audio_file, Some(PathBuf::from("song.wav")));
        assert_eq!(args.output, OutputMode::File);
        assert_eq!(args.gcode_out, PathBuf::from("choreography.gcode"));
        assert_eq!(args.baud, Some(115200));
    }

    #[test]
    fn opens_a_wav_file() {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let input = InputArgs {
            source: SourceKind::File,
            audio_file: Some(file.path().to_path_buf()),
            device: None,
        };
        let mut source = input.open_source(&AudioConfig::default()).unwrap();
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.next_block(64).unwrap().len(), 64);
    }

    #[test]
    fn other_extensions_go_to_the_media_decoder() {
        let mut file = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"not really an mp3").unwrap();

        let input = InputArgs {
            source: SourceKind::File,
            audio_file: Some(file.path().to_path_buf()),
            device: None,
        };
        assert!(matches!(
            input.open_source(&AudioConfig::default()),
            Err(SourceError::Media(_))
        ));
    }
}
