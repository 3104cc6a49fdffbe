//! Project document model.
//!
//! A project is a `revoproj.toml` file:
//!
//! ```toml
//! tempo = 120
//! meter = "4/4"
//! key = { root = "C", mode = "major" }
//!
//! [[changes]]
//! bar = 8
//! meter = "3/4"
//!
//! [[generators]]
//! id = "melody"
//! component = "walker-1"
//! args = { seed = 3, step = 2 }
//!
//! [[modifiers]]
//! id = "split"
//! component = "halve-1"
//!
//! [[channels]]
//! program = 0
//! [[channels.tracks]]
//! items = [{ ref = "melody", length = 4 }, { length = 1 }, { ref = "melody", length = 2, offset = 4, add = 2 }]
//!
//! [[mod_channels]]
//! [[mod_channels.tracks]]
//! items = [{ ref = "split", length = 2, target = "ch(0)/tr(0)" }]
//! ```
//!
//! Items on a track are laid end to end; an item without `ref` is a rest.
//! Channel and track numbers are positions in their arrays.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::target::Target;
use crate::timeline::{Change, Changes, Meter};

/// File name of the project document inside a project directory.
pub const PROJECT_FILE: &str = "revoproj.toml";

/// Raw project document as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectDocument {
    pub key: Option<Key>,
    pub meter: Option<Meter>,
    pub tempo: Option<f64>,
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
    #[serde(default)]
    pub generators: Vec<Definition>,
    #[serde(default)]
    pub modifiers: Vec<Definition>,
    #[serde(default)]
    pub channels: Vec<GenChannel>,
    #[serde(default)]
    pub mod_channels: Vec<ModChannel>,
}

/// A `[[changes]]` entry. Missing fields inherit from the previous change.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEntry {
    pub bar: f64,
    pub key: Option<Key>,
    pub meter: Option<Meter>,
    pub tempo: Option<f64>,
}

/// A generator or modifier definition: an id bound to a component and its
/// arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Definition {
    pub id: String,
    /// `name-version` tag of the component.
    pub component: String,
    #[serde(default)]
    pub args: BTreeMap<String, toml::Value>,
}

impl Definition {
    /// Argument values ordered by argument name.
    pub fn args(&self) -> Vec<String> {
        self.args.values().map(argument_string).collect()
    }
}

fn argument_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenChannel {
    /// General MIDI program for the channel.
    #[serde(default)]
    pub program: u8,
    #[serde(default)]
    pub tracks: Vec<GenTrack>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenTrack {
    #[serde(default)]
    pub items: Vec<GenItemEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenItemEntry {
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    /// Length in bars.
    pub length: f64,
    /// Position in the generator's own coordinates, in whole notes.
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub add: i32,
    #[serde(default)]
    pub sub: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModChannel {
    #[serde(default)]
    pub tracks: Vec<ModTrack>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModTrack {
    #[serde(default)]
    pub items: Vec<ModItemEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModItemEntry {
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub length: f64,
    #[serde(default)]
    pub target: Option<String>,
}

/// A generator placement on a channel/track timeline.
///
/// Whole-note bounds are filled in by the demand calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenItem {
    pub channel: usize,
    pub track: usize,
    pub bar_start: f64,
    pub bar_end: f64,
    pub note_start: f64,
    pub note_end: f64,
    pub reference: String,
    pub offset: f64,
    pub add: i32,
    pub sub: i32,
}

/// A modifier placement.
#[derive(Debug, Clone, PartialEq)]
pub struct ModItem {
    pub bar_start: f64,
    pub bar_end: f64,
    pub note_start: f64,
    pub note_end: f64,
    pub reference: String,
    pub target: Target,
}

/// Everything one interpretation cycle needs from the document.
#[derive(Debug, Clone)]
pub struct Project {
    pub changes: Changes,
    pub generators: Vec<Definition>,
    pub modifiers: Vec<Definition>,
    pub gen_items: Vec<GenItem>,
    pub mod_items: Vec<ModItem>,
    /// Program per generator channel.
    pub programs: Vec<u8>,
}

impl ProjectDocument {
    /// Read and parse a project document.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Document(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the document and extract definitions and placements.
    pub fn into_project(self) -> Result<Project> {
        let changes = self.build_changes()?;

        check_unique_ids("generator", &self.generators)?;
        check_unique_ids("modifier", &self.modifiers)?;

        let mut gen_items = Vec::new();
        for (channel, gen_channel) in self.channels.iter().enumerate() {
            for (track, gen_track) in gen_channel.tracks.iter().enumerate() {
                let mut bar = 0.0;
                for item in &gen_track.items {
                    let bar_start = bar;
                    bar += checked_length(item.length)?;
                    let Some(reference) = &item.reference else {
                        continue;
                    };
                    gen_items.push(GenItem {
                        channel,
                        track,
                        bar_start,
                        bar_end: bar,
                        note_start: 0.0,
                        note_end: 0.0,
                        reference: reference.clone(),
                        offset: item.offset,
                        add: item.add,
                        sub: item.sub,
                    });
                }
            }
        }

        let mut mod_items = Vec::new();
        for mod_channel in &self.mod_channels {
            for mod_track in &mod_channel.tracks {
                let mut bar = 0.0;
                for item in &mod_track.items {
                    let bar_start = bar;
                    bar += checked_length(item.length)?;
                    let Some(reference) = &item.reference else {
                        continue;
                    };
                    let target = item.target.as_deref().ok_or_else(|| {
                        Error::Document(format!("modifier item '{}' has no target", reference))
                    })?;
                    mod_items.push(ModItem {
                        bar_start,
                        bar_end: bar,
                        note_start: 0.0,
                        note_end: 0.0,
                        reference: reference.clone(),
                        target: target.parse()?,
                    });
                }
            }
        }

        Ok(Project {
            changes,
            programs: self.channels.iter().map(|c| c.program).collect(),
            generators: self.generators,
            modifiers: self.modifiers,
            gen_items,
            mod_items,
        })
    }

    fn build_changes(&self) -> Result<Changes> {
        let key = self
            .key
            .ok_or_else(|| Error::Document("please specify key".to_string()))?;
        let meter = self
            .meter
            .ok_or_else(|| Error::Document("please specify meter".to_string()))?;
        let tempo = checked_tempo(
            self.tempo
                .ok_or_else(|| Error::Document("please specify tempo".to_string()))?,
        )?;

        let mut entries: Vec<&ChangeEntry> = self.changes.iter().collect();
        entries.sort_by(|a, b| a.bar.total_cmp(&b.bar));

        let initial = Change::new(0.0, key, meter, tempo);
        let mut previous = initial;
        let mut later = Vec::with_capacity(entries.len());
        for entry in entries {
            let change = Change::new(
                entry.bar,
                entry.key.unwrap_or(previous.key),
                entry.meter.unwrap_or(previous.meter),
                match entry.tempo {
                    Some(tempo) => checked_tempo(tempo)?,
                    None => previous.tempo,
                },
            );
            later.push(change);
            previous = change;
        }

        Changes::new(initial, later)
    }
}

impl Project {
    /// Definition for a generator id.
    pub fn generator(&self, id: &str) -> Option<&Definition> {
        self.generators.iter().find(|d| d.id == id)
    }

    /// Definition for a modifier id.
    pub fn modifier(&self, id: &str) -> Option<&Definition> {
        self.modifiers.iter().find(|d| d.id == id)
    }
}

fn checked_length(length: f64) -> Result<f64> {
    if length < 0.0 || !length.is_finite() {
        return Err(Error::Document(format!("invalid item length {}", length)));
    }
    Ok(length)
}

fn checked_tempo(tempo: f64) -> Result<f64> {
    if tempo <= 0.0 || !tempo.is_finite() {
        return Err(Error::Document(format!("invalid tempo {}", tempo)));
    }
    Ok(tempo)
}

fn check_unique_ids(kind: &str, definitions: &[Definition]) -> Result<()> {
    let mut seen = HashSet::new();
    for definition in definitions {
        if !seen.insert(definition.id.as_str()) {
            return Err(Error::Document(format!(
                "duplicate {} id '{}'",
                kind, definition.id
            )));
        }
    }
    Ok(())
}
