//! Notes and the shared windowing primitive.
//!
//! All timeline positions are measured in whole notes. Every sequence that
//! is handed to [`binary_search_start`] or [`get_from_to`] must be sorted by
//! ascending `start`.

use std::cmp::Ordering;

/// A single note on the timeline.
///
/// `value` is a scale degree while the note travels through generators and
/// becomes an absolute MIDI pitch once the key has been resolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Note {
    pub value: i32,
    pub start: f64,
    pub duration: f64,
    pub channel: usize,
    pub track: usize,
}

impl Note {
    /// Create a note on channel 0, track 0.
    pub fn new(value: i32, start: f64, duration: f64) -> Self {
        Self {
            value,
            start,
            duration,
            channel: 0,
            track: 0,
        }
    }

    /// Place the note on a channel and track.
    pub fn on(mut self, channel: usize, track: usize) -> Self {
        self.channel = channel;
        self.track = track;
        self
    }

    /// Whole-note position where the note stops sounding.
    #[inline]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Locate `start` in a start-sorted sequence.
///
/// Returns `(index, true)` when a note starts exactly at `start` (the first
/// such note), otherwise `(insertion_index, false)`.
pub fn binary_search_start(notes: &[Note], start: f64) -> (usize, bool) {
    let index = notes.partition_point(|note| note.start < start);
    let exact = notes.get(index).is_some_and(|note| note.start == start);
    (index, exact)
}

/// Index range of the notes sounding during `[from, to)`.
///
/// The lower bound steps back one note when `from` falls inside it, so the
/// note already active at `from` is included. An empty window selects
/// nothing.
pub fn window_range(notes: &[Note], from: f64, to: f64) -> (usize, usize) {
    let (mut i, on_from) = binary_search_start(notes, from);
    if from >= to {
        return (i, i);
    }
    let (j, _) = binary_search_start(notes, to);
    if !on_from && i > 0 && notes[i - 1].end() > from {
        i -= 1;
    }
    (i, j.max(i))
}

/// Copy of the notes sounding during `[from, to)`.
///
/// The first note is moved to start exactly at `from` (keeping its end) and
/// the last note is cut to end at `to`, so for a sequence covering the
/// window the durations sum to `to - from`.
pub fn get_from_to(notes: &[Note], from: f64, to: f64) -> Vec<Note> {
    let (i, j) = window_range(notes, from, to);
    let mut window = notes[i..j].to_vec();

    if let Some(first) = window.first_mut().filter(|first| first.start < from) {
        let end = first.end();
        first.start = from;
        first.duration = end - from;
    }
    if let Some(last) = window.last_mut() {
        if last.end() > to {
            last.duration = to - last.start;
        }
    }

    window
}

/// Stable sort by ascending start.
pub fn sort_by_start(notes: &mut [Note]) {
    notes.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(Ordering::Equal));
}
