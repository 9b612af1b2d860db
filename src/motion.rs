//! The motion synthesizer: turns a note and a loudness into the next
//! absolute position of the pen, and keeps that position inside the safe
//! working volume no matter what the audio does.
//!
//! Letters pick a base direction, accidentals add a random nudge, loudness
//! picks the speed and (through it) the length of the step. Candidates that
//! leave the working cylinder are pulled back onto its wall along the same
//! bearing; Z saturates at its limits.

use crate::note_mapper::{Accidental, Note};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Slack allowed when checking a clamped position against its bounds.
pub const BOUNDS_TOLERANCE: f64 = 1e-9;

/// A point in the working volume. XY share one unit, Z may use another;
/// the codec scales both into transport units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct Position {
    /// Centimetres along the plate
    pub x: f64,
    /// Centimetres across the plate
    pub y: f64,
    /// Height, in firmware Z units
    pub z: f64,
}

impl Position {
    #[allow(missing_docs)]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={:.2}, Y={:.2}, Z={:.2}", self.x, self.y, self.z)
    }
}

/// The safe working volume: a cylinder around `center`, `max_radius` wide,
/// between `min_z` and `max_z`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MotionBounds {
    /// XY center of the allowed circle
    pub center: (f64, f64),
    /// Largest XY distance from `center`
    pub max_radius: f64,
    #[allow(missing_docs)]
    pub min_z: f64,
    #[allow(missing_docs)]
    pub max_z: f64,
}

impl Default for MotionBounds {
    fn default() -> Self {
        Self {
            center: (10.5, 10.5),
            max_radius: 9.0,
            min_z: -10.0,
            max_z: 120.0,
        }
    }
}

impl MotionBounds {
    /// Horizontal distance of `p` from the center.
    pub fn radial_distance(&self, p: &Position) -> f64 {
        (p.x - self.center.0).hypot(p.y - self.center.1)
    }

    /// True when `p` is inside the volume (give or take [`BOUNDS_TOLERANCE`]).
    pub fn contains(&self, p: &Position) -> bool {
        self.radial_distance(p) <= self.max_radius + BOUNDS_TOLERANCE
            && p.z >= self.min_z - BOUNDS_TOLERANCE
            && p.z <= self.max_z + BOUNDS_TOLERANCE
    }

    /// Pulls `p` into the volume. XY is projected onto the wall of the
    /// cylinder along the same bearing from the center; Z saturates.
    pub fn clamp(&self, p: Position) -> Position {
        let mut out = p;
        let dx = p.x - self.center.0;
        let dy = p.y - self.center.1;
        let dist = dx.hypot(dy);
        if dist > self.max_radius {
            out.x = self.center.0 + dx * self.max_radius / dist;
            out.y = self.center.1 + dy * self.max_radius / dist;
        }
        out.z = p.z.max(self.min_z).min(self.max_z);
        out
    }
}

/// A unit direction, or a rule for picking one at random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Move {
    /// One unit toward +X
    XPlus,
    /// One unit toward -X
    XMinus,
    /// One unit toward +Y
    YPlus,
    /// One unit toward -Y
    YMinus,
    /// One layer up
    ZPlus,
    /// One layer down
    ZMinus,
    /// ±1 on X, coin flip
    RandomX,
    /// ±1 on Y, coin flip
    RandomY,
    /// ±1 on X and on Y, one flip each
    RandomXY,
    /// No displacement
    Still,
}

impl Move {
    /// Unit displacement for this move. Random moves draw from `rng`.
    pub fn unit<R: Rng + ?Sized>(self, rng: &mut R) -> (f64, f64, f64) {
        match self {
            Move::XPlus => (1.0, 0.0, 0.0),
            Move::XMinus => (-1.0, 0.0, 0.0),
            Move::YPlus => (0.0, 1.0, 0.0),
            Move::YMinus => (0.0, -1.0, 0.0),
            Move::ZPlus => (0.0, 0.0, 1.0),
            Move::ZMinus => (0.0, 0.0, -1.0),
            Move::RandomX => (coin(rng), 0.0, 0.0),
            Move::RandomY => (0.0, coin(rng), 0.0),
            Move::RandomXY => {
                let x = coin(rng);
                (x, coin(rng), 0.0)
            }
            Move::Still => (0.0, 0.0, 0.0),
        }
    }
}

fn coin<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    if rng.gen_bool(0.5) {
        1.0
    } else {
        -1.0
    }
}

/// Everything that shapes a step.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Where the pen is allowed to go
    pub bounds: MotionBounds,
    /// Z travel for one unit of Z displacement
    pub layer_height: f64,
    /// Slowest feed rate, also the floor of the speed scale
    pub base_feed: f64,
    /// Fastest feed rate, also the ceiling of the speed scale
    pub max_feed: f64,
    /// Loudness multiplier applied before the feed clamp
    pub loudness_gain: f64,
    /// XY travel per unit of feed rate
    pub horizontal_unit: f64,
    /// Letter to base direction; letters not listed stay put
    pub letter_moves: BTreeMap<char, Move>,
    /// Accidental to extra nudge; accidentals not listed add nothing
    pub accidental_moves: BTreeMap<Accidental, Move>,
    /// Log bounds corrections as warnings rather than debug chatter
    pub warn_on_correction: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            bounds: MotionBounds::default(),
            layer_height: 10.0,
            base_feed: 150.0,
            max_feed: 1000.0,
            loudness_gain: 1000.0,
            horizontal_unit: 0.1,
            letter_moves: BTreeMap::from([
                ('A', Move::XPlus),
                ('B', Move::XMinus),
                ('C', Move::YPlus),
                ('D', Move::YMinus),
                ('E', Move::ZPlus),
                ('F', Move::ZMinus),
                ('G', Move::RandomXY),
            ]),
            accidental_moves: BTreeMap::from([
                (Accidental::Sharp, Move::RandomX),
                (Accidental::Flat, Move::RandomY),
            ]),
            warn_on_correction: true,
        }
    }
}

/// One planned move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// Where the pen goes, already inside the bounds
    pub position: Position,
    /// Feed rate to get there
    pub feed_rate: f64,
    /// Scaled displacement before any clamping
    pub displacement: (f64, f64, f64),
    /// Set when the candidate had to be pulled back into the bounds
    pub correction: Option<Correction>,
}

/// A candidate that left the working volume, and where it ended up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    #[allow(missing_docs)]
    pub attempted: Position,
    #[allow(missing_docs)]
    pub corrected: Position,
}

/// Plans moves from notes. Holds no position of its own; the caller passes
/// the current one in and keeps the result.
#[derive(Debug, Clone)]
pub struct MotionSynthesizer {
    config: MotionConfig,
}

impl MotionSynthesizer {
    /// Builds a synthesizer around `config`.
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    /// Where every planned position is kept
    pub fn bounds(&self) -> &MotionBounds {
        &self.config.bounds
    }

    /// `loudness * gain`, saturated into `[base_feed, max_feed]`.
    pub fn speed_scale(&self, loudness: f32) -> f64 {
        let c = &self.config;
        (loudness as f64 * c.loudness_gain)
            .min(c.max_feed)
            .max(c.base_feed)
    }

    /// Plans the move for `note` at `loudness`, starting from `current`.
    ///
    /// No note means no move: `None` comes back and the caller should leave
    /// its position alone and send nothing.
    pub fn step<R: Rng + ?Sized>(
        &self,
        current: Position,
        note: Option<Note>,
        loudness: f32,
        rng: &mut R,
    ) -> Option<Step> {
        let note = note?;
        let c = &self.config;

        let (mut dx, mut dy, mut dz) = c
            .letter_moves
            .get(&note.letter)
            .map_or((0.0, 0.0, 0.0), |m| m.unit(rng));
        if let Some(m) = c.accidental_moves.get(&note.accidental) {
            let (ax, ay, az) = m.unit(rng);
            dx += ax;
            dy += ay;
            dz += az;
        }

        let speed = self.speed_scale(loudness);
        let displacement = (
            dx * speed * c.horizontal_unit,
            dy * speed * c.horizontal_unit,
            dz * c.layer_height,
        );

        let candidate = Position::new(
            current.x + displacement.0,
            current.y + displacement.1,
            current.z + displacement.2,
        );
        let position = c.bounds.clamp(candidate);

        let correction = (position != candidate).then(|| {
            if c.warn_on_correction {
                warn!(
                    "Movement out of bounds, adjusting. Attempted: {}, corrected: {}",
                    candidate, position
                );
            } else {
                debug!("Clamped {} to {}", candidate, position);
            }
            Correction {
                attempted: candidate,
                corrected: position,
            }
        });

        Some(Step {
            position,
            feed_rate: speed,
            displacement,
            correction,
        })
    }
}
