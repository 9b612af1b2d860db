//! The two [`Transport`]s the choreographer can drive: a real serial line
//! to the printer, and a G-code file for dry runs.

use crate::link::Transport;
use log::{debug, info};
use serial2::SerialPort;

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// The printer on the other end of a serial port.
pub struct SerialTransport {
    port: SerialPort,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Opens `path` at `baud_rate`, then waits `settle` for the board to
    /// come out of the reset that opening the port triggers.
    pub fn open(path: impl AsRef<Path>, baud_rate: u32, settle: Duration) -> io::Result<Self> {
        let port = SerialPort::open(path.as_ref(), baud_rate)?;
        info!(
            "Opened {} at {} baud",
            path.as_ref().display(),
            baud_rate
        );
        sleep(settle);
        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }

    /// Serial devices the OS knows about.
    pub fn available_ports() -> io::Result<Vec<PathBuf>> {
        SerialPort::available_ports()
    }

    // Splits the first complete line off the pending bytes.
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&c| c == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end().to_owned())
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buffer = [0; 256];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.port.set_read_timeout(deadline - now)?;

            match self.port.read(&mut buffer) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial device disconnected",
                    ))
                }
                Ok(n) => self.pending.extend_from_slice(&buffer[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            debug!("Dropping {} stale byte(s)", self.pending.len());
        }
        self.pending.clear();
        self.port.discard_input_buffer()
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Writes every command to a G-code file and acknowledges it on the spot,
/// so a whole choreography can be rendered without a printer attached.
pub struct GcodeFileTransport<W: Write> {
    out: W,
    acks: VecDeque<String>,
}

impl GcodeFileTransport<BufWriter<File>> {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        info!("Writing G-code to {}", path.as_ref().display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> GcodeFileTransport<W> {
    /// Wraps any writer.
    pub fn new(out: W) -> Self {
        Self {
            out,
            acks: VecDeque::new(),
        }
    }

    /// Hands the writer back.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Transport for GcodeFileTransport<W> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        self.acks.push_back("ok".to_owned());
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        match self.acks.pop_front() {
            Some(ack) => Ok(Some(ack)),
            None => {
                sleep(timeout);
                Ok(None)
            }
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.acks.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkSession;
    use std::fs;

    #[test]
    fn gcode_file_gets_every_command() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let transport = GcodeFileTransport::create(file.path()).unwrap();
        let mut session =
            LinkSession::open(transport, Duration::from_millis(100), vec!["ok".to_owned()]);

        session.send_and_await("G28\n").unwrap();
        session.send_and_await("G1 X105.00 Y105.00 Z10.00 F500\n").unwrap();
        session.close().unwrap();

        let written = fs::read_to_string(file.path()).unwrap();
        assert_eq!(written, "G28\nG1 X105.00 Y105.00 Z10.00 F500\n");
    }

    #[test]
    fn gcode_transport_is_quiet_without_commands() {
        let mut transport = GcodeFileTransport::new(Vec::new());
        assert_eq!(transport.read_line(Duration::from_millis(1)).unwrap(), None);
        transport.write_line("M84\n").unwrap();
        assert_eq!(
            transport.read_line(Duration::from_millis(1)).unwrap(),
            Some("ok".to_owned())
        );
        assert_eq!(transport.into_inner(), b"M84\n".to_vec());
    }

    #[test]
    fn missing_serial_port_fails_to_open() {
        assert!(SerialTransport::open("/dev/does-not-exist-42", 250000, Duration::ZERO).is_err());
    }
}
