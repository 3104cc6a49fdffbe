//! Modifier target selectors.
//!
//! A selector names the channels and tracks a modifier placement applies to:
//!
//! ```text
//! ch(0-2, 4)/tr(0,1)
//! ```
//!
//! Lists are comma separated integers or inclusive `a-b` ranges. Whitespace
//! is ignored.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use regex::Regex;

use crate::error::{Error, Result};
use crate::note::Note;

const LIST: &str = r"\d+(?:\s*-\s*\d+)?(?:\s*,\s*\d+(?:\s*-\s*\d+)?)*";

/// A set of channel or track numbers, kept as sorted disjoint ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection(Vec<RangeInclusive<usize>>);

impl Selection {
    fn new(mut ranges: Vec<RangeInclusive<usize>>) -> Self {
        ranges.sort_by_key(|range| *range.start());

        let mut merged: Vec<RangeInclusive<usize>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if *range.start() <= last.end().saturating_add(1) => {
                    if range.end() > last.end() {
                        *last = *last.start()..=*range.end();
                    }
                }
                _ => merged.push(range),
            }
        }
        Self(merged)
    }

    pub fn contains(&self, value: usize) -> bool {
        let index = self.0.partition_point(|range| *range.end() < value);
        self.0.get(index).is_some_and(|range| range.contains(&value))
    }

    pub fn ranges(&self) -> &[RangeInclusive<usize>] {
        &self.0
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if range.start() == range.end() {
                write!(f, "{}", range.start())?;
            } else {
                write!(f, "{}-{}", range.start(), range.end())?;
            }
        }
        Ok(())
    }
}

/// Channel and track sets selected by a modifier placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub channels: Selection,
    pub tracks: Selection,
}

impl Target {
    /// True when both the note's channel and track are selected.
    pub fn selects(&self, note: &Note) -> bool {
        self.channels.contains(note.channel) && self.tracks.contains(note.track)
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let pattern = format!(r"^\s*ch\(\s*({LIST})\s*\)\s*/\s*tr\(\s*({LIST})\s*\)\s*$");
        let re = Regex::new(&pattern)
            .map_err(|e| Error::Document(format!("target pattern: {}", e)))?;

        let caps = re
            .captures(s)
            .ok_or_else(|| Error::Document(format!("invalid target '{}'", s)))?;

        Ok(Self {
            channels: parse_list(s, &caps[1])?,
            tracks: parse_list(s, &caps[2])?,
        })
    }
}

fn parse_list(target: &str, list: &str) -> Result<Selection> {
    let number = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|e| Error::Document(format!("invalid target '{}': {}", target, e)))
    };

    let mut ranges = Vec::new();
    for entry in list.split(',') {
        match entry.split_once('-') {
            Some((from, to)) => {
                let (from, to) = (number(from)?, number(to)?);
                if from > to {
                    return Err(Error::Document(format!(
                        "invalid target '{}': range {}-{} is reversed",
                        target, from, to
                    )));
                }
                ranges.push(from..=to);
            }
            None => {
                let n = number(entry)?;
                ranges.push(n..=n);
            }
        }
    }
    Ok(Selection::new(ranges))
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch({})/tr({})", self.channels, self.tracks)
    }
}
