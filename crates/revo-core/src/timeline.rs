//! Timeline arithmetic: bars, whole notes, meter and key changes.
//!
//! Placements are written in bars, while every note position is a whole
//! note. The mapping between the two depends on the meter in force at each
//! point of the timeline, so it is always derived from the full list of
//! [`Change`]s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::key::Key;

/// Musical meter (numerator/denominator).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Meter {
    pub numerator: u8,
    pub denominator: u8,
}

impl Meter {
    /// Create a new meter. Both parts must be non-zero.
    pub fn new(numerator: u8, denominator: u8) -> Result<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(Error::Document(format!(
                "invalid meter {}/{}",
                numerator, denominator
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Length of one bar in whole notes.
    ///
    /// For 4/4: 1.0
    /// For 3/4: 0.75
    /// For 6/8: 0.75
    pub fn whole_notes_per_bar(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl FromStr for Meter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (numerator, denominator) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::Document(format!("meter '{}': '/' is missing", s)))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u8>()
                .map_err(|e| Error::Document(format!("meter '{}': {}", s, e)))
        };
        Meter::new(parse(numerator)?, parse(denominator)?)
    }
}

impl TryFrom<String> for Meter {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Meter> for String {
    fn from(meter: Meter) -> Self {
        meter.to_string()
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// A timeline breakpoint where key, meter or tempo take new values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Change {
    /// Position of the change in bars.
    pub bar_start: f64,
    /// Position of the change in whole notes, derived from preceding changes.
    pub note_start: f64,
    pub key: Key,
    pub meter: Meter,
    /// Quarter notes per minute.
    pub tempo: f64,
}

impl Change {
    pub fn new(bar_start: f64, key: Key, meter: Meter, tempo: f64) -> Self {
        Self {
            bar_start,
            note_start: 0.0,
            key,
            meter,
            tempo,
        }
    }
}

/// Ordered, non-empty list of changes with derived whole-note positions.
///
/// Immutable once built; one is constructed per interpretation cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Changes {
    changes: Vec<Change>,
}

impl Changes {
    /// Build the change list from an initial state and later breakpoints.
    ///
    /// The initial change is forced to bar 0. Later changes are ordered by
    /// bar, and each change's `note_start` is computed against the changes
    /// before it.
    pub fn new(initial: Change, later: Vec<Change>) -> Result<Self> {
        let mut changes = Vec::with_capacity(later.len() + 1);
        changes.push(Change {
            bar_start: 0.0,
            ..initial
        });

        let mut later = later;
        if let Some(bad) = later.iter().find(|c| c.bar_start < 0.0 || c.bar_start.is_nan()) {
            return Err(Error::Document(format!(
                "change at bar {} is before the start of the timeline",
                bad.bar_start
            )));
        }
        later.sort_by(|a, b| a.bar_start.total_cmp(&b.bar_start));
        changes.extend(later);

        for i in 0..changes.len() {
            changes[i].note_start = bar_to_whole_note(changes[i].bar_start, &changes[..i]);
        }

        Ok(Self { changes })
    }

    /// A single change covering the whole timeline.
    pub fn constant(key: Key, meter: Meter, tempo: f64) -> Self {
        Self {
            changes: vec![Change::new(0.0, key, meter, tempo)],
        }
    }

    pub fn as_slice(&self) -> &[Change] {
        &self.changes
    }

    pub fn first(&self) -> &Change {
        &self.changes[0]
    }

    /// Convert a bar position to whole notes.
    pub fn bar_to_whole_note(&self, bar: f64) -> f64 {
        bar_to_whole_note(bar, &self.changes)
    }

    /// The change in force at whole-note position `note_start`.
    pub fn at(&self, note_start: f64) -> &Change {
        let index = self
            .changes
            .partition_point(|c| c.note_start <= note_start)
            .saturating_sub(1);
        &self.changes[index]
    }

    /// Key in force at whole-note position `note_start`.
    pub fn resolve_key(&self, note_start: f64) -> Key {
        self.at(note_start).key
    }

    /// Cursor for resolving keys over notes visited in ascending start order.
    pub fn key_cursor(&self) -> KeyCursor<'_> {
        KeyCursor {
            changes: &self.changes,
            index: 0,
        }
    }
}

/// Integrate whole notes per bar over each change region up to `bar`.
///
/// Regions are visited in ascending order and the walk stops at the first
/// change that starts after `bar`. The last change extends to infinity.
pub fn bar_to_whole_note(bar: f64, changes: &[Change]) -> f64 {
    let mut whole_notes = 0.0;

    for (i, change) in changes.iter().enumerate() {
        if change.bar_start > bar {
            break;
        }
        let end = match changes.get(i + 1) {
            Some(next) => bar.min(next.bar_start),
            None => bar,
        };
        whole_notes += (end - change.bar_start) * change.meter.whole_notes_per_bar();
    }

    whole_notes
}

/// Monotone key lookup for notes sorted by start.
///
/// Keeps a single index into the change list instead of searching per note.
pub struct KeyCursor<'a> {
    changes: &'a [Change],
    index: usize,
}

impl KeyCursor<'_> {
    /// Key in force at `note_start`. Calls must use non-decreasing positions.
    pub fn key_at(&mut self, note_start: f64) -> Key {
        while let Some(next) = self.changes.get(self.index + 1) {
            if note_start >= next.note_start {
                self.index += 1;
            } else {
                break;
            }
        }
        self.changes[self.index].key
    }
}
