//! Prints what the analyser hears, block by block, without touching a
//! printer. Handy for picking a loudness threshold or a high-pass cutoff.

use choreoprinter::{
    args::ListenArgs,
    audio_source::SourceError,
    config::ChoreoConfig,
    error::ChoreoError,
    spectral::{LoudnessCategory, SpectralAnalyzer},
};

use clap::Parser;
use env_logger::Env;
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = ListenArgs::parse();

    match listen(args) {
        Ok(blocks) => {
            info!("Listened to {} block(s)", blocks);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Listening failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn listen(args: ListenArgs) -> Result<usize, ChoreoError> {
    let config = match &args.config {
        Some(path) => ChoreoConfig::from_path(path)?,
        None => ChoreoConfig::default(),
    };
    let mut source = args.input.open_source(&config.audio)?;
    let mut analyzer = SpectralAnalyzer::new(config.audio.highpass_cutoff_hz);
    let limit = args.blocks.unwrap_or(usize::MAX);

    println!("{:>10}  {:<8}  {:>7}  loudness", "frequency", "note", "rms");

    let mut count = 0;
    while count < limit {
        let block = match source.next_block(config.audio.block_size) {
            Ok(block) => block,
            Err(SourceError::Exhausted) => break,
            Err(e) => return Err(e.into()),
        };
        count += 1;

        let reading = analyzer.analyze(&block);
        let note = if reading.loudness_rms < config.audio.loudness_threshold {
            None
        } else {
            config.note_table.note_for(reading.peak_frequency_hz)
        };

        println!(
            "{:>7.2} Hz  {:<8}  {:>7.4}  {}",
            reading.peak_frequency_hz,
            note.map(|n| n.to_string()).unwrap_or_else(|| "-".to_owned()),
            reading.loudness_rms,
            LoudnessCategory::from_rms(reading.loudness_rms)
        );
    }

    Ok(count)
}
