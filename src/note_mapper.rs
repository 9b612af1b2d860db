//! Maps a frequency onto the nearest entry of a note table and splits the
//! winning symbol into a letter and an accidental.

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, ops::RangeInclusive};

const NAMES: [&str; 12] = [
    "C", "C#/Db", "D", "D#/Eb", "E", "F", "F#/Gb", "G", "G#/Ab", "A", "A#/Bb", "B",
];

/// The bit of a note symbol after the letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Accidental {
    /// No `#` or `b` in the symbol
    Natural,
    /// `#`
    Sharp,
    /// `b`
    Flat,
}

/// A discretised pitch. Only the letter and accidental survive; the octave
/// is thrown away, as are any enharmonic spellings after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    /// First character of the table symbol, normally `A` through `G`
    pub letter: char,
    #[allow(missing_docs)]
    pub accidental: Accidental,
}

impl Note {
    /// Splits a table symbol like `"C#4/Db4"` into `C` and sharp. Returns
    /// `None` for an empty symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let mut chars = symbol.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let accidental = match chars.next() {
            Some('#') => Accidental::Sharp,
            Some('b') => Accidental::Flat,
            _ => Accidental::Natural,
        };
        Some(Self { letter, accidental })
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let acc = match self.accidental {
            Accidental::Natural => "",
            Accidental::Sharp => "#",
            Accidental::Flat => "b",
        };
        write!(f, "{}{}", self.letter, acc)
    }
}

/// Returned when a note table is unusable.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteTableError {
    /// The table has no entries
    Empty,
    /// Entry `index` is not strictly higher than the one before it
    NotIncreasing {
        #[allow(missing_docs)]
        index: usize,
    },
    /// Entry `index` has a non-positive or non-finite frequency
    BadFrequency {
        #[allow(missing_docs)]
        index: usize,
    },
}

impl fmt::Display for NoteTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            NoteTableError::Empty => Cow::from("note table is empty"),
            NoteTableError::NotIncreasing { index } => {
                Cow::from(format!("note table entry {} is out of order", index))
            }
            NoteTableError::BadFrequency { index } => {
                Cow::from(format!("note table entry {} has a bad frequency", index))
            }
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for NoteTableError {}

/// An ordered list of `(symbol, frequency)` pairs, strictly increasing in
/// frequency. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Vec<(String, f32)>", into = "Vec<(String, f32)>")]
pub struct NoteTable {
    entries: Vec<(String, f32)>,
}

impl NoteTable {
    /// Checks that `entries` is non-empty and strictly increasing.
    pub fn new(entries: Vec<(String, f32)>) -> Result<Self, NoteTableError> {
        if entries.is_empty() {
            return Err(NoteTableError::Empty);
        }
        for (index, (_, freq)) in entries.iter().enumerate() {
            if !freq.is_finite() || *freq <= 0.0 {
                return Err(NoteTableError::BadFrequency { index });
            }
        }
        if let Some(index) = entries.windows(2).position(|w| w[1].1 <= w[0].1) {
            return Err(NoteTableError::NotIncreasing { index: index + 1 });
        }
        Ok(Self { entries })
    }

    /// Equal-tempered table (A4 = 440 Hz) over `octaves`, with frequencies
    /// rounded to the hundredth. Symbols look like `C4` and `C#4/Db4`. An
    /// empty range gives [`NoteTableError::Empty`].
    pub fn chromatic(octaves: RangeInclusive<i32>) -> Result<Self, NoteTableError> {
        Self::new(chromatic_entries(octaves))
    }

    /// The entries, lowest first
    pub fn entries(&self) -> &[(String, f32)] {
        &self.entries
    }

    /// Finds the entry closest to `freq`. Ties go to the lower entry.
    pub fn nearest(&self, freq: f32) -> &(String, f32) {
        let idx = self.entries.partition_point(|(_, f)| *f < freq);
        if idx == 0 {
            return &self.entries[0];
        }
        if idx == self.entries.len() {
            return &self.entries[idx - 1];
        }
        let below = &self.entries[idx - 1];
        let above = &self.entries[idx];
        if (above.1 - freq).abs() < (freq - below.1).abs() {
            above
        } else {
            below
        }
    }

    /// Maps a frequency to a [`Note`]. Zero (or anything non-positive) means
    /// no pitch was found, and so no note.
    pub fn note_for(&self, freq: f32) -> Option<Note> {
        if !(freq > 0.0) {
            return None;
        }
        Note::from_symbol(&self.nearest(freq).0)
    }
}

fn chromatic_entries(octaves: RangeInclusive<i32>) -> Vec<(String, f32)> {
    octaves
        .flat_map(|octave| {
            NAMES.iter().enumerate().map(move |(semitone, name)| {
                // semitones away from A4
                let offset = (octave - 4) * 12 + semitone as i32 - 9;
                let freq = 440.0 * 2f64.powf(offset as f64 / 12.0);
                let symbol = name
                    .split('/')
                    .map(|n| format!("{}{}", n, octave))
                    .collect::<Vec<_>>()
                    .join("/");
                (symbol, ((freq * 100.0).round() / 100.0) as f32)
            })
        })
        .collect()
}

impl Default for NoteTable {
    fn default() -> Self {
        Self {
            entries: chromatic_entries(0..=6),
        }
    }
}

impl TryFrom<Vec<(String, f32)>> for NoteTable {
    type Error = NoteTableError;

    fn try_from(value: Vec<(String, f32)>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NoteTable> for Vec<(String, f32)> {
    fn from(value: NoteTable) -> Self {
        value.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chromatic_matches_reference_values() {
        let table = NoteTable::default();
        let entries = table.entries();
        assert_eq!(entries.len(), 84);
        assert_eq!(entries[0], ("C0".to_owned(), 16.35));
        assert_eq!(entries[1], ("C#0/Db0".to_owned(), 17.32));
        assert_eq!(entries[57], ("A4".to_owned(), 440.0));
        assert_eq!(entries[48], ("C4".to_owned(), 261.63));
        assert_eq!(entries[83], ("B6".to_owned(), 1975.53));
    }

    #[test]
    fn exact_frequencies_round_trip() {
        let table = NoteTable::default();
        for (symbol, freq) in table.entries() {
            assert_eq!(&table.nearest(*freq).0, symbol);
            assert_eq!(table.note_for(*freq), Note::from_symbol(symbol));
        }
    }

    #[test]
    fn zero_is_no_note() {
        let table = NoteTable::default();
        assert_eq!(table.note_for(0.0), None);
        assert_eq!(table.note_for(-3.0), None);
    }

    #[test]
    fn nearest_and_out_of_range() {
        let table = NoteTable::default();
        assert_eq!(table.nearest(430.66).0, "A4");
        assert_eq!(table.nearest(1.0).0, "C0");
        assert_eq!(table.nearest(20000.0).0, "B6");
    }

    #[test]
    fn ties_go_to_the_first_entry() {
        let table = NoteTable::new(vec![
            ("A".to_owned(), 100.0),
            ("B".to_owned(), 200.0),
        ])
        .unwrap();
        assert_eq!(table.nearest(150.0).0, "A");
    }

    #[test]
    fn splits_symbols() {
        assert_eq!(
            Note::from_symbol("C#4/Db4"),
            Some(Note {
                letter: 'C',
                accidental: Accidental::Sharp
            })
        );
        assert_eq!(
            Note::from_symbol("Bb2"),
            Some(Note {
                letter: 'B',
                accidental: Accidental::Flat
            })
        );
        assert_eq!(
            Note::from_symbol("A4"),
            Some(Note {
                letter: 'A',
                accidental: Accidental::Natural
            })
        );
        assert_eq!(Note::from_symbol(""), None);
    }

    #[test]
    fn rejects_bad_tables() {
        assert_eq!(NoteTable::new(vec![]), Err(NoteTableError::Empty));
        assert_eq!(
            NoteTable::new(vec![("A".to_owned(), 2.0), ("B".to_owned(), 1.0)]),
            Err(NoteTableError::NotIncreasing { index: 1 })
        );
        assert_eq!(
            NoteTable::new(vec![("A".to_owned(), 0.0)]),
            Err(NoteTableError::BadFrequency { index: 0 })
        );
    }

    #[test]
    fn table_round_trips_through_ron() {
        let table = NoteTable::chromatic(4..=4).unwrap();
        let s = ron::ser::to_string(&table).unwrap();
        let back: NoteTable = ron::de::from_str(&s).unwrap();
        assert_eq!(table, back);
    }

    #[test]
    fn empty_octave_range_is_rejected() {
        #[allow(clippy::reversed_empty_ranges)]
        let res = NoteTable::chromatic(5..=4);
        assert_eq!(res, Err(NoteTableError::Empty));
    }
}
