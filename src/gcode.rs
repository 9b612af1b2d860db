//! The wire format: absolute linear moves going out, printer replies coming
//! back in.
//!
//! Moves are rendered as `G1 X<x> Y<y> Z<z> F<feed>` with two decimals on
//! every axis, scaled into the firmware's millimetres on the way out.
//! Replies are parsed with nom into a [`Reply`], which knows whether it
//! acknowledges the last command.

use crate::motion::Position;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    combinator::{map, rest, value},
    sequence::preceded,
    Finish, IResult,
};
use serde::{Deserialize, Serialize};

/// Millimetres, absolute positioning, extruder absolute, home all axes.
pub const SETUP_COMMANDS: [&str; 4] = ["G21", "G90", "M82", "G28"];

/// How positions convert into the numbers the firmware expects.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UnitsConfig {
    /// Multiplier for X and Y (centimetres to millimetres by default)
    pub xy_scale: f64,
    /// Multiplier for Z
    pub z_scale: f64,
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            xy_scale: 10.0,
            z_scale: 1.0,
        }
    }
}

/// Terminates a bare command so it can go on the wire.
pub fn command_line(cmd: &str) -> String {
    format!("{}\n", cmd.trim_end())
}

/// Renders an absolute linear move to `pos` at `feed_rate`.
pub fn encode_move(pos: &Position, feed_rate: f64, units: &UnitsConfig) -> String {
    format!(
        "G1 X{:.2} Y{:.2} Z{:.2} F{:.0}\n",
        pos.x * units.xy_scale,
        pos.y * units.xy_scale,
        pos.z * units.z_scale,
        feed_rate
    )
}

/// A line the printer sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `ok`, plus whatever trailed it (temperatures, line numbers)
    Ok(String),
    /// `wait`, sent by an idle printer with an empty queue
    Wait,
    /// `echo:busy: <reason>`, a keepalive during long moves
    Busy(String),
    /// `Error:<message>`
    Error(String),
    /// Any other `echo:` chatter
    Echo(String),
    /// Anything at all
    Other(String),
}

impl Reply {
    /// Whether this line clears the wait for the last command. `ok`, `wait`
    /// and `busy` always do; echo chatter and unrecognised lines do if they
    /// contain one of `markers`.
    pub fn is_ready(&self, markers: &[String]) -> bool {
        match self {
            Reply::Ok(_) | Reply::Wait | Reply::Busy(_) => true,
            Reply::Echo(line) | Reply::Other(line) => contains_marker(line, markers),
            // "Error:... ok resend" or a halted printer is never ready
            Reply::Error(_) => false,
        }
    }
}

fn contains_marker(line: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|m| !m.is_empty() && line.contains(m.as_str()))
}

fn trimmed(s: &str) -> String {
    s.trim().to_owned()
}

fn parse_ok(s: &str) -> IResult<&str, Reply> {
    map(preceded(tag("ok"), rest), |r: &str| Reply::Ok(trimmed(r)))(s)
}

fn parse_wait(s: &str) -> IResult<&str, Reply> {
    value(Reply::Wait, tag("wait"))(s)
}

fn parse_busy(s: &str) -> IResult<&str, Reply> {
    map(preceded(tag("echo:busy:"), rest), |r: &str| {
        Reply::Busy(trimmed(r))
    })(s)
}

fn parse_echo(s: &str) -> IResult<&str, Reply> {
    map(preceded(tag("echo:"), rest), |r: &str| Reply::Echo(trimmed(r)))(s)
}

fn parse_error(s: &str) -> IResult<&str, Reply> {
    map(preceded(tag_no_case("error:"), rest), |r: &str| {
        Reply::Error(trimmed(r))
    })(s)
}

fn parse_reply(s: &str) -> IResult<&str, Reply> {
    alt((parse_ok, parse_wait, parse_busy, parse_echo, parse_error))(s)
}

/// Classifies one response line. Never fails; lines nom cannot make sense
/// of come back as [`Reply::Other`].
pub fn decode(raw: &str) -> Reply {
    let line = raw.trim();
    match parse_reply(line).finish() {
        Ok((_remaining, reply)) => reply,
        Err(_) => Reply::Other(line.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["ok".to_owned(), "wait".to_owned()]
    }

    #[test]
    fn encodes_with_fixed_precision() {
        let line = encode_move(
            &Position::new(1.23, 4.0, 0.2),
            500.0,
            &UnitsConfig::default(),
        );
        assert_eq!(line, "G1 X12.30 Y40.00 Z0.20 F500\n");
    }

    #[test]
    fn encodes_in_native_units() {
        let units = UnitsConfig {
            xy_scale: 1.0,
            z_scale: 1.0,
        };
        let line = encode_move(&Position::new(19.5, 10.5, -10.0), 987.6, &units);
        assert_eq!(line, "G1 X19.50 Y10.50 Z-10.00 F988\n");
    }

    #[test]
    fn terminates_commands() {
        assert_eq!(command_line("G28"), "G28\n");
        assert_eq!(command_line("G28\r\n"), "G28\n");
    }

    #[test]
    fn decodes_ok() {
        assert_eq!(decode("ok\n"), Reply::Ok("".to_owned()));
        assert_eq!(
            decode("ok T:201.3 /200.0 B:60.1 /60.0"),
            Reply::Ok("T:201.3 /200.0 B:60.1 /60.0".to_owned())
        );
        assert!(decode("ok").is_ready(&markers()));
    }

    #[test]
    fn decodes_wait_and_busy() {
        assert_eq!(decode("wait"), Reply::Wait);
        assert_eq!(
            decode("echo:busy: processing"),
            Reply::Busy("processing".to_owned())
        );
        assert!(decode("wait").is_ready(&markers()));
        assert!(decode("echo:busy: processing").is_ready(&markers()));
    }

    #[test]
    fn chatter_is_not_ready() {
        let echo = decode("echo:Unknown command: \"G99\"");
        assert_eq!(echo, Reply::Echo("Unknown command: \"G99\"".to_owned()));
        assert!(!echo.is_ready(&markers()));

        let err = decode("Error:Printer halted. kill() called! token");
        assert!(matches!(err, Reply::Error(_)));
        assert!(!err.is_ready(&markers()));

        let start = decode("start");
        assert_eq!(start, Reply::Other("start".to_owned()));
        assert!(!start.is_ready(&markers()));
    }

    #[test]
    fn markers_catch_odd_firmware() {
        let reply = decode("N12 ok");
        assert_eq!(reply, Reply::Other("N12 ok".to_owned()));
        assert!(reply.is_ready(&markers()));
        assert!(!reply.is_ready(&[]));

        let echo = decode("echo:ok");
        assert_eq!(echo, Reply::Echo("ok".to_owned()));
        assert!(echo.is_ready(&markers()));
    }

    #[test]
    fn errors_never_acknowledge() {
        let err = decode("Error:checksum mismatch, ok resend");
        assert_eq!(err, Reply::Error("checksum mismatch, ok resend".to_owned()));
        assert!(!err.is_ready(&markers()));
    }
}
