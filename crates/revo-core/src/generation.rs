//! Generator plugins and their windowed note caches.
//!
//! A generator is a long-lived subprocess that answers index requests with
//! one note each. Index 0 starts at whole note 0 and the sequence extends in
//! both directions: index −1 ends at 0, index −2 ends where −1 starts, and
//! so on.
//!
//! ```text
//!   request:  "<index>\n"
//!   response: "<degree> <duration>\n"
//! ```
//!
//! A [`GenerationManager`] keeps the process alive across interpretation
//! cycles and caches exactly the window the current placements demand.

use crate::error::{Error, Result};
use crate::note::{get_from_to, Note};
use crate::process::{Launch, PluginProcess};

/// Demanded executable identity and whole-note window for one generator id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationSettings {
    pub launch: Launch,
    pub start: f64,
    pub end: f64,
}

impl GenerationSettings {
    pub fn new(launch: Launch, start: f64, end: f64) -> Self {
        Self { launch, start, end }
    }
}

/// Field-by-field comparison of two settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SettingsDiff {
    pub path: bool,
    pub args: bool,
    pub start: bool,
    pub end: bool,
}

impl SettingsDiff {
    pub fn between(old: Option<&GenerationSettings>, new: &GenerationSettings) -> Self {
        match old {
            None => Self {
                path: true,
                args: true,
                start: true,
                end: true,
            },
            Some(old) => Self {
                path: old.launch.path != new.launch.path,
                args: old.launch.args != new.launch.args,
                start: old.start != new.start,
                end: old.end != new.end,
            },
        }
    }

    pub fn launch_changed(&self) -> bool {
        self.path || self.args
    }

    pub fn window_changed(&self) -> bool {
        self.start || self.end
    }
}

/// What an [`GenerationManager::update`] call had to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing changed; the cached window was reused.
    Unchanged,
    /// Same process, new window.
    Regenerated,
    /// Fresh process and new window.
    Respawned,
}

/// Per-id generator state that persists across cycles.
pub struct GenerationManager {
    id: String,
    settings: Option<GenerationSettings>,
    process: Option<PluginProcess>,
    generation: Vec<Note>,
}

impl GenerationManager {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settings: None,
            process: None,
            generation: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Settings of the last successful update.
    pub fn settings(&self) -> Option<&GenerationSettings> {
        self.settings.as_ref()
    }

    /// Cached notes covering exactly `[start, end)` of the current settings.
    pub fn generation(&self) -> &[Note] {
        &self.generation
    }

    /// Bring the cached window in line with `settings`.
    ///
    /// The process is respawned only when the path or arguments change (or
    /// after a failed update); the window is regenerated whenever start or
    /// end move. On error the previous settings and window are kept and the
    /// process is discarded.
    pub fn update(&mut self, settings: GenerationSettings) -> Result<UpdateOutcome> {
        let diff = SettingsDiff::between(self.settings.as_ref(), &settings);
        let respawn = diff.launch_changed() || self.process.is_none();

        if !respawn && !diff.window_changed() {
            log::debug!("[{}] generation unchanged", self.id);
            return Ok(UpdateOutcome::Unchanged);
        }

        let mut process = match self.process.take() {
            Some(process) if !respawn => process,
            old => {
                // The old child is gone before the new one starts
                drop(old);
                log::info!(
                    "[{}] starting generator {} {:?}",
                    self.id,
                    settings.launch.path.display(),
                    settings.launch.args
                );
                PluginProcess::launch(&self.id, &settings.launch)?
            }
        };

        // A failed walk drops the process here; its protocol position is unknown
        let generation = generate_from_to(&mut process, settings.start, settings.end)?;
        self.process = Some(process);

        log::debug!(
            "[{}] generated {} notes for [{}, {})",
            self.id,
            generation.len(),
            settings.start,
            settings.end
        );
        self.generation = generation;
        self.settings = Some(settings);

        Ok(if respawn {
            UpdateOutcome::Respawned
        } else {
            UpdateOutcome::Regenerated
        })
    }
}

/// Notes covering `[from, to)`, clipped to the window.
///
/// Walks the negative side down to `min(from, 0)` and the positive side up
/// to `max(to, 0)`, then slices the concatenation.
pub fn generate_from_to(process: &mut PluginProcess, from: f64, to: f64) -> Result<Vec<Note>> {
    if from >= to || from.is_nan() || to.is_nan() {
        return Ok(Vec::new());
    }

    let mut generation = walk(process, -1, from.min(0.0))?;
    generation.extend(walk(process, 0, to.max(0.0))?);

    Ok(get_from_to(&generation, from, to))
}

/// Request notes index by index until their cumulative duration reaches
/// `length` (negative lengths walk toward more negative indices).
///
/// The result is always in ascending start order.
pub fn walk(process: &mut PluginProcess, start_index: i64, length: f64) -> Result<Vec<Note>> {
    let mut notes = Vec::new();
    if length == 0.0 {
        return Ok(notes);
    }

    let forward = length > 0.0;
    let mut index = start_index;
    let mut cumulative = 0.0;

    loop {
        process.write_line(&index.to_string())?;
        let (degree, duration) = {
            let id = process.id().to_string();
            parse_generator_line(&id, process.expect_line()?)?
        };

        if forward {
            notes.push(Note::new(degree, cumulative, duration));
            cumulative += duration;
            if cumulative >= length {
                break;
            }
            index += 1;
        } else {
            cumulative -= duration;
            notes.push(Note::new(degree, cumulative, duration));
            if cumulative <= length {
                break;
            }
            index -= 1;
        }
    }

    if !forward {
        notes.reverse();
    }
    Ok(notes)
}

/// Parse `"<degree> <duration>"`.
pub fn parse_generator_line(id: &str, line: &str) -> Result<(i32, f64)> {
    let (degree, duration) = line
        .trim()
        .split_once(' ')
        .ok_or_else(|| Error::protocol(id, line, "missing separator"))?;

    let degree = degree
        .trim()
        .parse::<i32>()
        .map_err(|e| Error::protocol(id, line, format!("invalid degree: {}", e)))?;
    let duration = duration
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::protocol(id, line, format!("invalid duration: {}", e)))?;

    if duration <= 0.0 || !duration.is_finite() {
        return Err(Error::protocol(id, line, "duration must be positive"));
    }

    Ok((degree, duration))
}
