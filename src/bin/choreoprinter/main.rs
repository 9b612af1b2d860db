//! Listens to music and makes the printer dance to it.

use choreoprinter::{
    args::{ChoreoArgs, OutputMode},
    choreographer::{Choreographer, RunOutcome},
    config::ChoreoConfig,
    error::ChoreoError,
    gui::{device_selector, monitor_until_stop, GuiError},
    link::{LinkError, Transport},
    serial_link::{GcodeFileTransport, SerialTransport},
};

use clap::Parser;
use env_logger::{Env, Target};
use log::{info, warn};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::atomic::Ordering,
    thread::spawn,
    time::Duration,
};

// Where the log goes while the monitor owns the terminal
const DEFAULT_LOG_FILE: &str = "choreography.log";

// Example:
// cargo run --bin choreoprinter --
//                            --source     file
//                            --audio-file song.wav
//                            --mode       file
//                            --gcode-out  song.gcode

fn main() -> ExitCode {
    let args = ChoreoArgs::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("Could not set up logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(Some(RunOutcome::Stopped)) => {
            println!("Stopped by user.");
            ExitCode::SUCCESS
        }
        Ok(Some(RunOutcome::Exhausted)) => {
            println!("Audio exhausted, choreography complete.");
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Choreography faulted: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &ChoreoArgs) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));

    let log_file = match (&args.log_file, args.headless || args.dump_config) {
        (Some(path), _) => Some(path.clone()),
        (None, false) => Some(PathBuf::from(DEFAULT_LOG_FILE)),
        (None, true) => None,
    };
    if let Some(path) = log_file {
        builder.target(Target::Pipe(Box::new(File::create(path)?)));
    }

    builder.init();
    Ok(())
}

fn run(args: ChoreoArgs) -> Result<Option<RunOutcome>, ChoreoError> {
    let mut config = match &args.config {
        Some(path) => ChoreoConfig::from_path(path)?,
        None => ChoreoConfig::default(),
    };
    if let Some(port) = &args.port {
        config.link.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.link.baud_rate = baud;
    }

    if args.dump_config {
        println!("{}", config.to_ron()?);
        return Ok(None);
    }

    let transport: Box<dyn Transport + Send> = match args.output {
        OutputMode::File => {
            config.settle_ms = 0;
            Box::new(GcodeFileTransport::create(&args.gcode_out).map_err(LinkError::Io)?)
        }
        OutputMode::Live => {
            let port = match config.link.port.clone() {
                Some(port) => PathBuf::from(port),
                None => match pick_port(args.headless, config.link.baud_rate)? {
                    Some(port) => port,
                    None => {
                        println!("No serial port chosen.");
                        return Ok(None);
                    }
                },
            };
            Box::new(
                SerialTransport::open(
                    &port,
                    config.link.baud_rate,
                    Duration::from_millis(config.link.open_settle_ms),
                )
                .map_err(LinkError::Io)?,
            )
        }
    };

    let mut source = args.input.open_source(&config.audio)?;

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut choreographer = Choreographer::new(config, transport, rng);
    let stop = choreographer.stop_handle();
    if let Err(e) = choreographer.stop_on_interrupt() {
        warn!("Ctrl-C will not stop the run cleanly: {}", e);
    }

    if args.headless {
        println!("Choreographing. Press Enter or Ctrl-C to stop.");
        let _stdin_thread = spawn(move || {
            let mut line = String::new();
            if io::stdin().read_line(&mut line).is_ok() {
                info!("Stop requested from stdin");
                stop.store(true, Ordering::SeqCst);
            }
        });
        choreographer.run(&mut source).map(Some)
    } else {
        let status = choreographer.status_handle();
        monitor_until_stop(status, stop, move || choreographer.run(&mut source))?.map(Some)
    }
}

/// Asks which serial port the printer is on: through the device selector,
/// or on stdin when there is no terminal UI.
fn pick_port(headless: bool, baud_rate: u32) -> Result<Option<PathBuf>, ChoreoError> {
    let available_ports = SerialTransport::available_ports().map_err(LinkError::Io)?;
    if available_ports.is_empty() {
        warn!("No serial ports found");
        return Ok(None);
    }

    if !headless {
        return Ok(device_selector(available_ports, baud_rate)?);
    }

    println!("Available devices:");
    for port in &available_ports {
        println!("\t{}", port.to_string_lossy());
    }
    print!("Enter the device name: ");
    io::stdout().flush().map_err(GuiError::from)?;

    let mut device_name = String::new();
    io::stdin()
        .read_line(&mut device_name)
        .map_err(GuiError::from)?;
    let device_name = device_name.trim();

    Ok((!device_name.is_empty()).then(|| PathBuf::from(device_name)))
}
