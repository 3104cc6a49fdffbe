//! Keys and scale-degree resolution.
//!
//! Generators speak in scale degrees. A [`Key`] turns a degree into an
//! absolute MIDI pitch: degree 0 is the key's root in the octave starting at
//! middle C (MIDI 60), positive degrees walk up the scale and negative
//! degrees walk down, wrapping octaves as needed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// MIDI pitch of middle C; degree 0 of a C key.
pub const MIDDLE_C: i32 = 60;

/// A pitch class, 0 (C) through 11 (B).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PitchClass(u8);

impl PitchClass {
    pub fn new(semitone: i32) -> Self {
        Self(semitone.rem_euclid(12) as u8)
    }

    pub fn semitone(self) -> i32 {
        self.0 as i32
    }
}

impl FromStr for PitchClass {
    type Err = Error;

    /// Parse a note name such as `C`, `F#`, `Bb` or `E♭`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();

        let base: i32 = match chars.next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => 0,
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => return Err(Error::Document(format!("invalid key root '{}'", s))),
        };

        let mut accidental = 0;
        for c in chars {
            match c {
                '#' | '♯' => accidental += 1,
                'b' | '♭' => accidental -= 1,
                _ => return Err(Error::Document(format!("invalid key root '{}'", s))),
            }
        }

        Ok(Self::new(base + accidental))
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        f.write_str(NAMES[self.0 as usize])
    }
}

/// Scale shape of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Major,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Minor,
    Locrian,
    HarmonicMinor,
    MelodicMinor,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
}

impl Mode {
    /// Semitone offsets from the root for each degree of one octave.
    pub fn intervals(self) -> &'static [i32] {
        match self {
            Mode::Major => &[0, 2, 4, 5, 7, 9, 11],
            Mode::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Mode::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Mode::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Mode::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Mode::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Mode::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Mode::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Mode::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            Mode::MajorPentatonic => &[0, 2, 4, 7, 9],
            Mode::MinorPentatonic => &[0, 3, 5, 7, 10],
            Mode::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }

    /// Church modes by rotation of the major scale, 0 (ionian) to 6 (locrian).
    fn from_rotation(index: u32) -> Option<Self> {
        const ROTATIONS: [Mode; 7] = [
            Mode::Major,
            Mode::Dorian,
            Mode::Phrygian,
            Mode::Lydian,
            Mode::Mixolydian,
            Mode::Minor,
            Mode::Locrian,
        ];
        ROTATIONS.get(index as usize).copied()
    }
}

impl FromStr for Mode {
    type Err = Error;

    /// Accepts a mode name (`major`, `dorian`, `harmonic_minor`, ...) or a
    /// church-mode rotation index `0`..=`6`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if let Ok(index) = name.parse::<u32>() {
            return Mode::from_rotation(index)
                .ok_or_else(|| Error::Document(format!("invalid mode index {}", index)));
        }
        let mode = match name.as_str() {
            "major" | "ionian" => Mode::Major,
            "dorian" => Mode::Dorian,
            "phrygian" => Mode::Phrygian,
            "lydian" => Mode::Lydian,
            "mixolydian" => Mode::Mixolydian,
            "minor" | "natural_minor" | "aeolian" => Mode::Minor,
            "locrian" => Mode::Locrian,
            "harmonic_minor" => Mode::HarmonicMinor,
            "melodic_minor" => Mode::MelodicMinor,
            "pentatonic" | "major_pentatonic" => Mode::MajorPentatonic,
            "minor_pentatonic" => Mode::MinorPentatonic,
            "blues" => Mode::Blues,
            _ => return Err(Error::Document(format!("unknown mode '{}'", s))),
        };
        Ok(mode)
    }
}

/// Raw key as written in a project document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeySpec {
    pub root: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "major".to_string()
}

/// A resolved key: root pitch class plus mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "KeySpec")]
pub struct Key {
    pub root: PitchClass,
    pub mode: Mode,
}

impl Key {
    pub fn new(root: PitchClass, mode: Mode) -> Self {
        Self { root, mode }
    }

    /// Absolute MIDI pitch of a scale degree in this key.
    ///
    /// `None` when the pitch does not fit in an `i32`.
    pub fn degree_to_pitch(&self, degree: i32) -> Option<i32> {
        let intervals = self.mode.intervals();
        let len = intervals.len() as i32;
        let octave = degree.div_euclid(len);
        let step = degree.rem_euclid(len) as usize;
        octave
            .checked_mul(12)?
            .checked_add(MIDDLE_C + self.root.semitone() + intervals[step])
    }
}

impl Default for Key {
    fn default() -> Self {
        Self::new(PitchClass::new(0), Mode::Major)
    }
}

impl TryFrom<KeySpec> for Key {
    type Error = Error;

    fn try_from(spec: KeySpec) -> Result<Self, Self::Error> {
        Ok(Self {
            root: spec.root.parse()?,
            mode: spec.mode.parse()?,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.root, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pitch_class() {
        assert_eq!("C".parse::<PitchClass>().unwrap().semitone(), 0);
        assert_eq!("f#".parse::<PitchClass>().unwrap().semitone(), 6);
        assert_eq!("Bb".parse::<PitchClass>().unwrap().semitone(), 10);
        assert_eq!("Cb".parse::<PitchClass>().unwrap().semitone(), 11);
        assert!("H".parse::<PitchClass>().is_err());
        assert!("C4".parse::<PitchClass>().is_err());
    }

    #[test]
    fn test_parse_mode_by_name_and_index() {
        assert_eq!("Minor".parse::<Mode>().unwrap(), Mode::Minor);
        assert_eq!("aeolian".parse::<Mode>().unwrap(), Mode::Minor);
        assert_eq!("1".parse::<Mode>().unwrap(), Mode::Dorian);
        assert_eq!("5".parse::<Mode>().unwrap(), Mode::Minor);
        assert!("7".parse::<Mode>().is_err());
        assert!("bebop".parse::<Mode>().is_err());
    }

    #[test]
    fn test_degree_to_pitch_c_major() {
        let key = Key::default();
        assert_eq!(key.degree_to_pitch(0), Some(60));
        assert_eq!(key.degree_to_pitch(2), Some(64));
        assert_eq!(key.degree_to_pitch(7), Some(72));
        assert_eq!(key.degree_to_pitch(-1), Some(59));
        assert_eq!(key.degree_to_pitch(-7), Some(48));
    }

    #[test]
    fn test_degree_to_pitch_other_keys() {
        let a_minor = Key::new("A".parse().unwrap(), Mode::Minor);
        assert_eq!(a_minor.degree_to_pitch(0), Some(69));
        assert_eq!(a_minor.degree_to_pitch(2), Some(72));

        let pentatonic = Key::new(PitchClass::new(0), Mode::MajorPentatonic);
        assert_eq!(pentatonic.degree_to_pitch(5), Some(72));
        assert_eq!(pentatonic.degree_to_pitch(-1), Some(57));
    }

    #[test]
    fn test_degree_to_pitch_out_of_range() {
        let key = Key::new(PitchClass::new(11), Mode::Major);
        assert_eq!(key.degree_to_pitch(i32::MAX), None);
        assert_eq!(key.degree_to_pitch(i32::MIN), None);
        assert!(Key::new(PitchClass::new(0), Mode::Blues)
            .degree_to_pitch(-1_000_000)
            .is_some());
    }

    #[test]
    fn test_key_from_key_spec() {
        let key: Key = toml::from_str::<KeySpec>("root = \"D\"\nmode = \"dorian\"")
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(key, Key::new(PitchClass::new(2), Mode::Dorian));
    }
}
