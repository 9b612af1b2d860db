//! The control loop. Pulls a block of audio, works out the note and the
//! loudness, plans the next move, sends it, waits for the printer, repeats.
//!
//! A run goes `Idle -> Homing -> Running` and ends in either `Stopped` or
//! `Faulted`. The link is closed on the way out no matter which.
//! The [`Choreographer`] is the only thing that knows where the pen is, and
//! it only believes a move happened once the printer has acknowledged it.

use crate::audio_source::{AudioBlock, AudioSource, SourceError};
use crate::config::ChoreoConfig;
use crate::error::ChoreoError;
use crate::gcode::{command_line, encode_move};
use crate::link::{LinkSession, Transport};
use crate::motion::{MotionSynthesizer, Position};
use crate::note_mapper::{Note, NoteTable};
use crate::spectral::{LoudnessCategory, SpectralAnalyzer};
use log::{debug, error, info, warn};
use rand::Rng;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Built, not started
    #[default]
    Idle,
    /// Sending setup commands and moving to the home position
    Homing,
    /// Turning audio into moves
    Running,
    /// Ended on purpose, or because the audio ran out
    Stopped,
    /// Ended by an error
    Faulted,
}

/// How a run that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Someone raised the stop flag
    Stopped,
    /// A file-backed source ran out of audio
    Exhausted,
}

/// A snapshot of the run, for whoever is watching.
#[derive(Debug, Clone, Default)]
pub struct Status {
    #[allow(missing_docs)]
    pub phase: Phase,
    /// Last acknowledged position
    pub position: Position,
    /// Note heard in the most recent block, if any
    pub note: Option<Note>,
    /// Dominant frequency of the most recent block
    pub frequency_hz: f32,
    /// RMS of the most recent block
    pub loudness: f32,
    /// Moves acknowledged by the printer
    pub moves: u64,
    /// Blocks with no usable note
    pub skipped: u64,
    /// Moves that had to be pulled back inside the bounds
    pub corrections: u64,
}

fn request_stop(stop: &AtomicBool) {
    info!("Interrupt received, stopping after the current move");
    stop.store(true, Ordering::SeqCst);
}

/// Drives one choreography run over a [`Transport`].
pub struct Choreographer<T: Transport, R: Rng> {
    config: ChoreoConfig,
    session: LinkSession<T>,
    analyzer: SpectralAnalyzer,
    notes: NoteTable,
    synth: MotionSynthesizer,
    rng: R,
    position: Position,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<Status>>,
}

impl<T: Transport, R: Rng> Choreographer<T, R> {
    /// Opens a link session over `transport`. `rng` decides the random
    /// nudges; seed it to make a run repeatable.
    pub fn new(config: ChoreoConfig, transport: T, rng: R) -> Self {
        let session = LinkSession::open(
            transport,
            config.link.ack_timeout(),
            config.link.ack_markers.clone(),
        );
        let home = config.home;

        Self {
            session,
            analyzer: SpectralAnalyzer::new(config.audio.highpass_cutoff_hz),
            notes: config.note_table.clone(),
            synth: MotionSynthesizer::new(config.motion.clone()),
            rng,
            position: home,
            stop: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(Status {
                position: home,
                ..Status::default()
            })),
            config,
        }
    }

    /// Raise this flag to stop the run after the current move is done.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Makes Ctrl-C raise the stop flag instead of killing the process, so
    /// an interrupted run still settles its last move and closes the link.
    /// Only one handler can be installed per process.
    pub fn stop_on_interrupt(&self) -> Result<(), ctrlc::Error> {
        let stop = self.stop.clone();
        ctrlc::set_handler(move || request_stop(&stop))
    }

    /// A live view of the run.
    pub fn status_handle(&self) -> Arc<Mutex<Status>> {
        self.status.clone()
    }

    /// Last acknowledged position
    pub fn position(&self) -> Position {
        self.position
    }

    /// Homes the printer, then choreographs `source` until it runs out, the
    /// stop flag goes up, or something fails. The link is closed before this
    /// returns, on every path.
    pub fn run<S: AudioSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<RunOutcome, ChoreoError> {
        if source.sample_rate() != self.config.audio.sample_rate {
            debug!(
                "Audio arrives at {} Hz (configured {} Hz)",
                source.sample_rate(),
                self.config.audio.sample_rate
            );
        }

        let result = self.home().and_then(|_| self.perform(source));

        let result = match result {
            Ok(outcome) => {
                self.finish();
                self.set_phase(Phase::Stopped);
                Ok(outcome)
            }
            Err(e) => {
                error!("Choreography faulted: {}", e);
                self.set_phase(Phase::Faulted);
                Err(e)
            }
        };

        if let Err(e) = self.session.close() {
            warn!("Error while closing the link: {}", e);
        }
        info!("Execution finished.");
        result
    }

    fn set_phase(&self, phase: Phase) {
        info!("Phase: {:?}", phase);
        self.status.lock().unwrap().phase = phase;
    }

    fn home(&mut self) -> Result<(), ChoreoError> {
        self.set_phase(Phase::Homing);
        info!("Starting printer initialization.");

        for cmd in &self.config.setup_commands {
            self.session.send_and_await(&command_line(cmd))?;
        }

        let home = self.synth.bounds().clamp(self.config.home);
        let line = encode_move(&home, self.config.initial_feed, &self.config.units);
        self.session.send_and_await(&line)?;
        self.position = home;
        self.status.lock().unwrap().position = home;
        info!("Initial position set to: {}", home);
        Ok(())
    }

    fn perform<S: AudioSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<RunOutcome, ChoreoError> {
        self.set_phase(Phase::Running);

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("Interrupted by user.");
                return Ok(RunOutcome::Stopped);
            }

            let block = match source.next_block(self.config.audio.block_size) {
                Ok(block) => block,
                Err(SourceError::Exhausted) => {
                    info!("Audio source exhausted.");
                    return Ok(RunOutcome::Exhausted);
                }
                Err(e) => return Err(e.into()),
            };

            self.cycle(&block)?;
        }
    }

    // One block in, at most one move out.
    fn cycle(&mut self, block: &AudioBlock) -> Result<(), ChoreoError> {
        let reading = self.analyzer.analyze(block);
        let note = if reading.loudness_rms < self.config.audio.loudness_threshold {
            None
        } else {
            self.notes.note_for(reading.peak_frequency_hz)
        };

        {
            let mut status = self.status.lock().unwrap();
            status.note = note;
            status.frequency_hz = reading.peak_frequency_hz;
            status.loudness = reading.loudness_rms;
        }

        let step = match self
            .synth
            .step(self.position, note, reading.loudness_rms, &mut self.rng)
        {
            Some(step) => step,
            None => {
                debug!("No note detected. Skipping movement.");
                self.status.lock().unwrap().skipped += 1;
                return Ok(());
            }
        };

        let line = encode_move(&step.position, step.feed_rate, &self.config.units);
        self.session.send_and_await(&line)?;
        self.position = step.position;

        let (dx, dy, dz) = step.displacement;
        info!(
            "Note: {}, Frequency: {:.2} Hz, RMS: {:.2} ({}), Movement: dx={:.2}, dy={:.2}, dz={:.2}. New Position: {}",
            note.map(|n| n.to_string()).unwrap_or_default(),
            reading.peak_frequency_hz,
            reading.loudness_rms,
            LoudnessCategory::from_rms(reading.loudness_rms),
            dx,
            dy,
            dz,
            step.position
        );

        {
            let mut status = self.status.lock().unwrap();
            status.position = step.position;
            status.moves += 1;
            if step.correction.is_some() {
                status.corrections += 1;
            }
        }

        if self.config.settle_ms > 0 {
            spin_sleep::sleep(Duration::from_millis(self.config.settle_ms));
        }
        Ok(())
    }

    // Best effort: a failure here is logged, not escalated.
    fn finish(&mut self) {
        for cmd in &self.config.finish_commands {
            if let Err(e) = self.session.send_and_await(&command_line(cmd)) {
                warn!("Finish command {} failed: {}", cmd, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_source::tests::ScriptedSource;
    use crate::link::mock::{ScriptedTransport, Wire};
    use crate::link::LinkError;
    use rand::rngs::mock::StepRng;
    use std::f32::consts::PI;

    const RATE: u32 = 44100;
    const N: usize = 2048;

    fn config() -> ChoreoConfig {
        let mut config = ChoreoConfig::default();
        config.audio.highpass_cutoff_hz = None;
        config.link.ack_timeout_secs = 0.2;
        config.settle_ms = 0;
        config
    }

    fn a440() -> Vec<f32> {
        (0..N)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / RATE as f32).sin() * 0.5)
            .collect()
    }

    fn written(wire: &Arc<Mutex<Wire>>) -> Vec<String> {
        wire.lock().unwrap().written.clone()
    }

    const SETUP: [&str; 5] = [
        "G21\n",
        "G90\n",
        "M82\n",
        "G28\n",
        "G1 X105.00 Y105.00 Z10.00 F500\n",
    ];

    #[test]
    fn a_note_moves_to_the_wall() {
        let (transport, wire) = ScriptedTransport::always_ok();
        let mut choreo = Choreographer::new(config(), transport, StepRng::new(0, 0));
        let mut source = ScriptedSource::new(vec![a440()], RATE);

        let outcome = choreo.run(&mut source).unwrap();

        assert_eq!(outcome, RunOutcome::Exhausted);
        let lines = written(&wire);
        assert_eq!(lines.len(), 7);
        assert_eq!(&lines[..5], &SETUP);
        assert!(lines[5].starts_with("G1 X195.00 Y105.00 Z10.00 F"));
        assert_eq!(lines[6], "M84\n");
        assert!(wire.lock().unwrap().closed);

        let status = choreo.status_handle().lock().unwrap().clone();
        assert_eq!(status.phase, Phase::Stopped);
        assert_eq!(status.moves, 1);
        assert_eq!(status.corrections, 1);
        assert!((choreo.position().x - 19.5).abs() < 1e-9);
    }

    #[test]
    fn silence_sends_nothing() {
        let (transport, wire) = ScriptedTransport::always_ok();
        let mut choreo = Choreographer::new(config(), transport, StepRng::new(0, 0));
        let quiet: Vec<f32> = a440().iter().map(|s| s * 0.001).collect();
        let mut source = ScriptedSource::new(vec![vec![0.0; N], quiet], RATE);

        assert_eq!(choreo.run(&mut source).unwrap(), RunOutcome::Exhausted);

        let lines = written(&wire);
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[5], "M84\n");
        assert_eq!(choreo.status_handle().lock().unwrap().skipped, 2);
        assert_eq!(choreo.position(), Position::new(10.5, 10.5, 10.0));
    }

    #[test]
    fn homing_timeout_faults_and_closes() {
        // G21 is acknowledged, G90 never is
        let (transport, wire) = ScriptedTransport::new(vec![vec!["ok"], vec![]], None);
        let mut choreo = Choreographer::new(config(), transport, StepRng::new(0, 0));
        let mut source = ScriptedSource::new(vec![a440()], RATE);

        let res = choreo.run(&mut source);

        assert!(matches!(
            res,
            Err(ChoreoError::Link(LinkError::Timeout { .. }))
        ));
        assert_eq!(written(&wire), vec!["G21\n".to_owned(), "G90\n".to_owned()]);
        assert!(wire.lock().unwrap().closed);
        assert_eq!(
            choreo.status_handle().lock().unwrap().phase,
            Phase::Faulted
        );
    }

    #[test]
    fn unacknowledged_move_does_not_advance() {
        let mut script: Vec<Vec<&str>> = vec![vec!["ok"]; 5];
        script.push(vec!["echo:busy"]);
        let (transport, wire) = ScriptedTransport::new(script, None);
        let mut choreo = Choreographer::new(config(), transport, StepRng::new(0, 0));
        let mut source = ScriptedSource::new(vec![a440(), a440()], RATE);

        assert!(choreo.run(&mut source).is_err());
        // the second block never got a chance
        assert_eq!(written(&wire).len(), 6);
        assert_eq!(choreo.position(), Position::new(10.5, 10.5, 10.0));
        assert!(wire.lock().unwrap().closed);
    }

    #[test]
    fn stop_flag_ends_the_run_cleanly() {
        let (transport, wire) = ScriptedTransport::always_ok();
        let mut choreo = Choreographer::new(config(), transport, StepRng::new(0, 0));
        choreo.stop_handle().store(true, Ordering::SeqCst);
        let mut source = ScriptedSource::new(vec![a440(); 10], RATE);

        assert_eq!(choreo.run(&mut source).unwrap(), RunOutcome::Stopped);
        let lines = written(&wire);
        assert_eq!(&lines[..5], &SETUP);
        assert_eq!(lines[5], "M84\n");
        assert!(wire.lock().unwrap().closed);
        assert_eq!(source.blocks.len(), 10);
    }

    #[test]
    fn interrupt_stops_the_run_cleanly() {
        let (transport, wire) = ScriptedTransport::always_ok();
        let mut choreo = Choreographer::new(config(), transport, StepRng::new(0, 0));
        choreo.stop_on_interrupt().unwrap();
        // one handler per process
        assert!(choreo.stop_on_interrupt().is_err());

        request_stop(&choreo.stop_handle());
        let mut source = ScriptedSource::new(vec![a440(); 3], RATE);

        assert_eq!(choreo.run(&mut source).unwrap(), RunOutcome::Stopped);
        let lines = written(&wire);
        assert_eq!(lines.last().map(String::as_str), Some("M84\n"));
        assert!(wire.lock().unwrap().closed);
    }

    struct BrokenSource;

    impl AudioSource for BrokenSource {
        fn next_block(&mut self, _size: usize) -> Result<AudioBlock, SourceError> {
            Err(SourceError::Device("unplugged".to_owned()))
        }

        fn sample_rate(&self) -> u32 {
            RATE
        }
    }

    #[test]
    fn source_failure_faults_and_closes() {
        let (transport, wire) = ScriptedTransport::always_ok();
        let mut choreo = Choreographer::new(config(), transport, StepRng::new(0, 0));

        assert!(matches!(
            choreo.run(&mut BrokenSource),
            Err(ChoreoError::Source(SourceError::Device(_)))
        ));
        assert!(wire.lock().unwrap().closed);
        // no finish commands after a fault
        assert_eq!(written(&wire).len(), 5);
    }
}
