//! Modifier plugins and the per-cycle modification cache.
//!
//! A modifier transforms a finite list of notes. Each input note is written
//! as one line and answered by exactly one bracketed group of output notes:
//!
//! ```text
//!   -> {60 0.25 0 1}
//!   <- [{60 0.125 0 1} {62 0.125 0 1}]
//!   -> {64 0.5 0 1}
//!   <- []
//!   -> finish
//!   <- [{67 1 0 1}]          (optional trailing groups until EOF)
//! ```
//!
//! Output notes carry no start; the assembler lays them out back to back.

use crate::error::{Error, Result};
use crate::note::Note;
use crate::process::{Launch, PluginProcess};

/// Sentinel written after the last input note.
pub const FINISH: &str = "finish";

/// One cached modifier invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Modification {
    pub launch: Launch,
    pub input: Vec<Note>,
    pub output: Vec<Note>,
}

impl Modification {
    /// Run the modifier `launch` over `input` (already ordered by channel
    /// and track) and collect its output.
    pub fn invoke(id: &str, launch: &Launch, input: Vec<Note>) -> Result<Self> {
        log::info!(
            "[{}] running modifier {} over {} notes",
            id,
            launch.path.display(),
            input.len()
        );
        let mut process = PluginProcess::launch(id, launch)?;
        let mut output = Vec::new();

        for note in &input {
            process.write_line(&format_note(note))?;
            let line = process.expect_line()?;
            output.extend(parse_group(id, line)?);
        }

        // Plugins without a finishing step may already have exited
        match process.write_line(FINISH) {
            Ok(()) | Err(Error::Pipe { .. }) => {}
            Err(err) => return Err(err),
        }
        process.close_stdin();

        while let Some(line) = process.read_line()? {
            if line.trim().is_empty() {
                continue;
            }
            output.extend(parse_group(id, line)?);
        }

        Ok(Self {
            launch: launch.clone(),
            input,
            output,
        })
    }
}

/// Serialize a note as `{pitch duration channel track}`.
pub fn format_note(note: &Note) -> String {
    format!(
        "{{{} {} {} {}}}",
        note.value, note.duration, note.channel, note.track
    )
}

/// Parse one response line: `[]` or `[{p d c t} {p d c t} ...]`.
pub fn parse_group(id: &str, line: &str) -> Result<Vec<Note>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('[') || !trimmed.ends_with(']') {
        return Err(Error::protocol(id, line, "expected a bracketed note group"));
    }

    let inner = trimmed.trim_matches(|c: char| matches!(c, '[' | ']' | '{' | '}'));
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split("} {")
        .map(|record| parse_record(id, line, record))
        .collect()
}

fn parse_record(id: &str, line: &str, record: &str) -> Result<Note> {
    let fields: Vec<&str> = record.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(Error::protocol(
            id,
            line,
            format!("expected 4 fields in '{}', got {}", record, fields.len()),
        ));
    }

    let int = |field: &str, what: &str| {
        field
            .parse::<i64>()
            .map_err(|e| Error::protocol(id, line, format!("invalid {}: {}", what, e)))
    };
    let index = |field: &str, what: &str| {
        field
            .parse::<usize>()
            .map_err(|e| Error::protocol(id, line, format!("invalid {}: {}", what, e)))
    };

    let pitch = int(fields[0], "pitch")?;
    let pitch = i32::try_from(pitch)
        .map_err(|_| Error::protocol(id, line, "pitch out of range"))?;
    let duration = fields[1]
        .parse::<f64>()
        .map_err(|e| Error::protocol(id, line, format!("invalid duration: {}", e)))?;
    if duration < 0.0 || !duration.is_finite() {
        return Err(Error::protocol(id, line, "duration must not be negative"));
    }

    Ok(Note {
        value: pitch,
        start: 0.0,
        duration,
        channel: index(fields[2], "channel")?,
        track: index(fields[3], "track")?,
    })
}

/// Stable sort by (channel, track), the order modifiers receive their input in.
pub fn sort_by_channel_track(notes: &mut [Note]) {
    notes.sort_by_key(|note| (note.channel, note.track));
}

/// Hit and miss counters for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evicted: usize,
}

struct Entry {
    modification: Modification,
    used: bool,
}

/// Memoized modifier invocations, evicted by disuse at the end of a cycle.
#[derive(Default)]
pub struct ModificationCache {
    entries: Vec<Entry>,
    stats: CacheStats,
}

impl ModificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Output of `launch` over `input`, invoking the plugin only on a miss.
    ///
    /// `input` is put in (channel, track) order before lookup. An empty
    /// input never reaches the plugin.
    pub fn get_or_invoke(
        &mut self,
        id: &str,
        launch: &Launch,
        mut input: Vec<Note>,
    ) -> Result<&[Note]> {
        sort_by_channel_track(&mut input);

        if input.is_empty() {
            return Ok(&[]);
        }

        let found = self
            .entries
            .iter()
            .position(|entry| entry.modification.launch == *launch && entry.modification.input == input);

        let index = match found {
            Some(index) => {
                log::debug!("[{}] modification cache hit", id);
                self.stats.hits += 1;
                index
            }
            None => {
                self.stats.misses += 1;
                let modification = Modification::invoke(id, launch, input)?;
                self.entries.push(Entry {
                    modification,
                    used: false,
                });
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[index];
        entry.used = true;
        Ok(&entry.modification.output)
    }

    /// Forget usage and counters left over by a cycle that never reached
    /// [`end_cycle`](Self::end_cycle). Entries are kept.
    pub fn begin_cycle(&mut self) {
        for entry in &mut self.entries {
            entry.used = false;
        }
        self.stats = CacheStats::default();
    }

    /// Drop entries not used since the previous call and reset the counters.
    pub fn end_cycle(&mut self) -> CacheStats {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.used);
        for entry in &mut self.entries {
            entry.used = false;
        }

        let mut stats = std::mem::take(&mut self.stats);
        stats.evicted = before - self.entries.len();
        log::debug!(
            "modification cache: {} hits, {} misses, {} evicted, {} kept",
            stats.hits,
            stats.misses,
            stats.evicted,
            self.entries.len()
        );
        stats
    }
}
