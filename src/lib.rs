//! ChoreoPrinter makes a 3D printer dance to music. The print head carries a
//! pen (or nothing at all) and moves over the build plate in time with
//! whatever it hears: a microphone, an audio file, or the computer's own
//! output.
//!
//! Every block of audio goes through the same pipeline:
//!
//! 1. [`spectral`] finds the dominant frequency and the loudness,
//! 2. [`note_mapper`] snaps the frequency to the nearest named note,
//! 3. [`motion`] turns the note into a step, scaled by loudness and kept
//!    inside a circle on the plate,
//! 4. [`gcode`] encodes the step as a `G1` move,
//! 5. [`link`] sends it and waits for the printer to acknowledge it.
//!
//! [`choreographer`] runs that loop, and the binaries wrap it in a command
//! line and a small terminal UI.

#![warn(missing_docs)]
pub mod args;
pub mod audio_source;
pub mod choreographer;
pub mod config;
pub mod error;
pub mod gcode;
pub mod gui;
pub mod link;
pub mod live_source;
pub mod media_source;
pub mod motion;
pub mod note_mapper;
pub mod serial_link;
pub mod spectral;
pub mod wav_source;
