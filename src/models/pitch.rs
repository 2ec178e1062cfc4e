//! Pitch model
//!
//! A pitch is a MIDI key number in 0..=127, constructed from a western
//! spelling `(letter, accidental, octave)`. Middle C (C4) is MIDI 60,
//! A4 is MIDI 69.

use serde::{Deserialize, Serialize};

/// A concrete pitch as a MIDI key number (0..=127)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pitch {
    key: u8,
}

impl Pitch {
    /// Wrap a MIDI key number, rejecting values above 127
    pub fn from_key(key: i32) -> Option<Pitch> {
        if (0..=127).contains(&key) {
            Some(Pitch { key: key as u8 })
        } else {
            None
        }
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    /// Build a pitch from its spelling
    ///
    /// `letter` is one of A..G (either case), `alter` the accidental offset
    /// in semitones (-2..=2), `octave` the scientific octave number
    /// (C4 = middle C = MIDI 60).
    pub fn from_spelling(letter: char, alter: i32, octave: i32) -> Option<Pitch> {
        let base = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        // MIDI key 0 = C-1, so C4 = (4 + 1) * 12 = 60
        Pitch::from_key((octave + 1) * 12 + base + alter)
    }

    /// Parse a pitch literal such as `C4`, `F#3`, `Bb-1`, `C##5`
    ///
    /// The whole string must be consumed; used by the lexer's trial
    /// matching, so a trailing garbage character means "not a pitch".
    pub fn parse(text: &str) -> Option<Pitch> {
        let mut chars = text.chars();
        let letter = chars.next()?;
        if !matches!(letter.to_ascii_uppercase(), 'A'..='G') {
            return None;
        }
        let rest: &str = chars.as_str();

        // Longest accidental first so `##` is not read as `#` + garbage
        let (alter, octave_text) = if let Some(r) = rest.strip_prefix("##") {
            (2, r)
        } else if let Some(r) = rest.strip_prefix("bb") {
            (-2, r)
        } else if let Some(r) = rest.strip_prefix('#') {
            (1, r)
        } else if let Some(r) = rest.strip_prefix('b') {
            (-1, r)
        } else {
            (0, rest)
        };

        if octave_text.is_empty() {
            return None;
        }
        let octave: i32 = octave_text.parse().ok()?;
        Pitch::from_spelling(letter, alter, octave)
    }

    /// Shift by `semitones`, returning `None` when the result leaves 0..=127
    pub fn transpose(&self, semitones: i32) -> Option<Pitch> {
        Pitch::from_key(self.key as i32 + semitones)
    }

    /// Scientific octave number (C4 = 60 → 4)
    pub fn octave(&self) -> i32 {
        (self.key as i32 / 12) - 1
    }
}

impl std::fmt::Display for Pitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        write!(f, "{}{}", NAMES[(self.key % 12) as usize], self.octave())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_c_and_a440() {
        assert_eq!(Pitch::parse("C4").unwrap().key(), 60);
        assert_eq!(Pitch::parse("A4").unwrap().key(), 69);
    }

    #[test]
    fn test_accidentals() {
        assert_eq!(Pitch::parse("C#4").unwrap().key(), 61);
        assert_eq!(Pitch::parse("Db4").unwrap().key(), 61);
        assert_eq!(Pitch::parse("C##4").unwrap().key(), 62);
        assert_eq!(Pitch::parse("Dbb4").unwrap().key(), 60);
        assert_eq!(Pitch::parse("Bb3").unwrap().key(), 58);
    }

    #[test]
    fn test_negative_octave() {
        // MIDI 0 = C-1
        assert_eq!(Pitch::parse("C-1").unwrap().key(), 0);
        assert_eq!(Pitch::parse("B-1").unwrap().key(), 11);
    }

    #[test]
    fn test_out_of_range_rejected() {
        // G9 = 127 is the ceiling
        assert_eq!(Pitch::parse("G9").unwrap().key(), 127);
        assert!(Pitch::parse("G#9").is_none());
        assert!(Pitch::parse("C-2").is_none());
    }

    #[test]
    fn test_not_a_pitch() {
        assert!(Pitch::parse("H4").is_none());
        assert!(Pitch::parse("C").is_none());
        assert!(Pitch::parse("C4x").is_none());
        assert!(Pitch::parse("").is_none());
    }

    #[test]
    fn test_transpose() {
        let c4 = Pitch::parse("C4").unwrap();
        assert_eq!(c4.transpose(12).unwrap().key(), 72);
        assert_eq!(c4.transpose(-12).unwrap().key(), 48);
        assert!(c4.transpose(100).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Pitch::parse("C4").unwrap().to_string(), "C4");
        assert_eq!(Pitch::parse("Bb3").unwrap().to_string(), "A#3");
    }
}
