//! The link driver. Every command goes out, then we sit on the line until
//! the printer acknowledges it or the deadline passes. Nothing is pipelined:
//! the next command cannot leave before the last one was acknowledged.

use crate::gcode::{decode, Reply};
use log::{debug, error, info, trace, warn};

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};

/// A line-oriented, half-duplex byte pipe to the printer.
pub trait Transport {
    /// Writes `line` (terminator included) and flushes it.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Reads one line, waiting at most `timeout`. `Ok(None)` means nothing
    /// complete arrived in time.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Drops whatever is sitting in the input buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Releases the underlying device.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        (**self).write_line(line)
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        (**self).read_line(timeout)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Where the last command is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Nothing sent yet
    Idle,
    /// Written and flushed
    Sent,
    /// Reading replies
    WaitingAck,
    /// The printer is ready for the next one
    Acked,
    /// The deadline passed without an acknowledgment
    TimedOut,
}

/// What can go wrong on the link.
#[derive(Debug)]
pub enum LinkError {
    /// No acknowledgment for `command` within `waited`.
    Timeout {
        #[allow(missing_docs)]
        command: String,
        #[allow(missing_docs)]
        waited: Duration,
    },

    /// The transport failed underneath us.
    Io(io::Error),

    /// The session was already closed.
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            LinkError::Timeout { command, waited } => Cow::from(format!(
                "printer did not acknowledge {:?} within {:.1?}",
                command, waited
            )),
            LinkError::Io(error) => Cow::from(format!("io error: {}", error)),
            LinkError::Closed => Cow::from("link already closed"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for LinkError {}

impl From<io::Error> for LinkError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// An open link to the printer. Owns the transport, and closes it when
/// dropped if nobody closed it first.
pub struct LinkSession<T: Transport> {
    transport: Option<T>,
    timeout: Duration,
    markers: Vec<String>,
    state: CommandState,
    acked: u64,
}

impl<T: Transport> LinkSession<T> {
    /// Takes ownership of `transport`, flushing any stale input it has.
    pub fn open(mut transport: T, timeout: Duration, markers: Vec<String>) -> Self {
        if let Err(e) = transport.clear_input() {
            warn!("Could not clear the input buffer on open: {}", e);
        }
        Self {
            transport: Some(transport),
            timeout,
            markers,
            state: CommandState::Idle,
            acked: 0,
        }
    }

    /// State of the most recent command
    pub fn state(&self) -> CommandState {
        self.state
    }

    /// How many commands have been acknowledged so far
    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// True once [`LinkSession::close`] has run
    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Sends `line` and blocks until it is acknowledged, using the session
    /// timeout.
    pub fn send_and_await(&mut self, line: &str) -> Result<Reply, LinkError> {
        self.send_and_await_within(line, self.timeout)
    }

    /// Sends `line` and blocks until it is acknowledged or `timeout`
    /// passes. On success the input buffer is cleared before returning.
    pub fn send_and_await_within(
        &mut self,
        line: &str,
        timeout: Duration,
    ) -> Result<Reply, LinkError> {
        let transport = self.transport.as_mut().ok_or(LinkError::Closed)?;
        let command = line.trim_end();

        transport.write_line(line)?;
        self.state = CommandState::Sent;
        debug!("Sent: {}", command);

        let start = Instant::now();
        let deadline = start + timeout;
        self.state = CommandState::WaitingAck;

        loop {
            let now = Instant::now();
            if now >= deadline {
                self.state = CommandState::TimedOut;
                error!("Timeout waiting for printer acknowledgment of {}", command);
                return Err(LinkError::Timeout {
                    command: command.to_owned(),
                    waited: now - start,
                });
            }

            let raw = match transport.read_line(deadline - now)? {
                Some(raw) => raw,
                None => continue,
            };

            let reply = decode(&raw);
            if reply.is_ready(&self.markers) {
                debug!("Printer ready after {}: {}", command, raw.trim());
                transport.clear_input()?;
                self.state = CommandState::Acked;
                self.acked += 1;
                return Ok(reply);
            }

            match &reply {
                Reply::Error(msg) => warn!("Printer error while waiting on {}: {}", command, msg),
                _ => trace!("Printer response: {}", raw.trim()),
            }
        }
    }

    /// Closes the transport. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), LinkError> {
        match self.transport.take() {
            Some(mut transport) => {
                transport.close()?;
                info!("Link closed after {} acknowledged command(s)", self.acked);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<T: Transport> Drop for LinkSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error while closing the link: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::gcode::{encode_move, UnitsConfig};
    use crate::motion::Position;

    fn markers() -> Vec<String> {
        vec!["ok".to_owned(), "wait".to_owned()]
    }

    #[test]
    fn ok_clears_the_wait_in_one_read() {
        let (transport, wire) = ScriptedTransport::always_ok();
        let mut session = LinkSession::open(transport, Duration::from_secs(1), markers());

        let line = encode_move(&Position::new(1.23, 4.0, 0.2), 500.0, &UnitsConfig::default());
        let reply = session.send_and_await(&line).unwrap();

        assert_eq!(reply, Reply::Ok("".to_owned()));
        assert_eq!(session.state(), CommandState::Acked);
        let wire = wire.lock().unwrap();
        assert_eq!(wire.written, vec!["G1 X12.30 Y40.00 Z0.20 F500\n".to_owned()]);
        assert_eq!(wire.reads, 1);
        // once on open, once after the ack
        assert_eq!(wire.clears, 2);
    }

    #[test]
    fn chatter_is_skipped_until_ready() {
        let (transport, wire) = ScriptedTransport::new(
            vec![vec!["echo:busy: processing", "ok"], vec!["start", "echo:hi", "wait"]],
            None,
        );
        let mut session = LinkSession::open(transport, Duration::from_secs(1), markers());

        assert_eq!(
            session.send_and_await("G28\n").unwrap(),
            Reply::Busy("processing".to_owned())
        );
        assert_eq!(session.send_and_await("G90\n").unwrap(), Reply::Wait);
        assert_eq!(session.acked(), 2);
        assert_eq!(wire.lock().unwrap().reads, 4);
    }

    #[test]
    fn silence_times_out_on_schedule() {
        let (transport, _wire) = ScriptedTransport::new(vec![vec![]], None);
        let mut session = LinkSession::open(transport, Duration::from_secs(5), markers());

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let res = session.send_and_await_within("G28\n", timeout);
        let elapsed = start.elapsed();

        match res {
            Err(LinkError::Timeout { command, waited }) => {
                assert_eq!(command, "G28");
                assert!(waited >= timeout);
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(150));
        assert_eq!(session.state(), CommandState::TimedOut);
    }

    #[test]
    fn endless_chatter_still_times_out() {
        let mut session =
            LinkSession::open(ChattyTransport, Duration::from_millis(100), markers());
        let start = Instant::now();
        assert!(matches!(
            session.send_and_await("G1 X0\n"),
            Err(LinkError::Timeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let (transport, wire) = ScriptedTransport::always_ok();
        let mut session = LinkSession::open(transport, Duration::from_secs(1), markers());

        session.close().unwrap();
        session.close().unwrap();
        assert!(session.is_closed());
        assert!(wire.lock().unwrap().closed);
        assert!(matches!(session.send_and_await("G28\n"), Err(LinkError::Closed)));
    }

    #[test]
    fn drop_closes_the_transport() {
        let (transport, wire) = ScriptedTransport::always_ok();
        {
            let _session = LinkSession::open(transport, Duration::from_secs(1), markers());
        }
        assert!(wire.lock().unwrap().closed);
    }
}
