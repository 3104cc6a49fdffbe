//! Timeline assembly.
//!
//! Generator windows are copied into one master sequence at their
//! placements, keys turn degrees into pitches, and modifier placements then
//! replace the notes they target with their plugin's output.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::document::{GenItem, ModItem};
use crate::error::{Error, Result};
use crate::note::{binary_search_start, get_from_to, sort_by_start, Note};
use crate::timeline::Changes;

/// Final notes grouped by channel, then track.
pub type ChannelMap = BTreeMap<usize, BTreeMap<usize, Vec<Note>>>;

/// Copy each placement's slice of its generator into timeline position.
///
/// `generation` returns the cached window of a generator id; placements
/// whose id has none are skipped. The result is sorted by start, in degrees.
pub fn splice_generations<'a>(
    items: &[GenItem],
    generation: impl Fn(&str) -> Option<&'a [Note]>,
) -> Result<Vec<Note>> {
    let mut notes = Vec::new();

    for item in items {
        let Some(source) = generation(&item.reference) else {
            log::debug!("no generation for '{}', placement skipped", item.reference);
            continue;
        };

        let length = item.note_end - item.note_start;
        let transpose = item.add.checked_sub(item.sub).ok_or_else(|| {
            Error::OutOfRange(format!(
                "transposition add={} sub={} of '{}'",
                item.add, item.sub, item.reference
            ))
        })?;
        for note in get_from_to(source, item.offset, item.offset + length) {
            let value = note.value.checked_add(transpose).ok_or_else(|| {
                Error::OutOfRange(format!(
                    "degree {} of '{}' transposed by {}",
                    note.value, item.reference, transpose
                ))
            })?;
            notes.push(Note {
                value,
                start: note.start - item.offset + item.note_start,
                duration: note.duration,
                channel: item.channel,
                track: item.track,
            });
        }
    }

    sort_by_start(&mut notes);
    Ok(notes)
}

/// Replace scale degrees with pitches in the key in force at each note.
pub fn resolve_keys(notes: &mut [Note], changes: &Changes) -> Result<()> {
    let mut cursor = changes.key_cursor();
    for note in notes.iter_mut() {
        let key = cursor.key_at(note.start);
        note.value = key.degree_to_pitch(note.value).ok_or_else(|| {
            Error::OutOfRange(format!(
                "degree {} at {} in {}",
                note.value, note.start, key
            ))
        })?;
    }
    Ok(())
}

/// Notes that a modifier placement takes out of the master sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    /// Targeted notes in timeline order.
    pub removed: Vec<Note>,
    /// Start of the first removed note per (channel, track).
    pub starts: HashMap<(usize, usize), f64>,
}

/// Remove the notes a modifier placement targets.
///
/// Targeted notes starting inside the placement are taken, plus, per
/// targeted (channel, track), the note still sounding at the placement
/// start. A pair with a note starting exactly at the placement start takes
/// no earlier note.
pub fn extract_targets(notes: &mut Vec<Note>, item: &ModItem) -> Extraction {
    let mut extraction = Extraction::default();
    if item.note_start >= item.note_end {
        return extraction;
    }

    let (first, _) = binary_search_start(notes, item.note_start);
    let (last, _) = binary_search_start(notes, item.note_end);

    let on_start: HashSet<(usize, usize)> = notes[first..last]
        .iter()
        .take_while(|note| note.start == item.note_start)
        .map(|note| (note.channel, note.track))
        .collect();

    // Latest earlier note per targeted pair
    let mut latest: HashMap<(usize, usize), usize> = HashMap::new();
    for (index, note) in notes[..first].iter().enumerate().rev() {
        let pair = (note.channel, note.track);
        if item.target.selects(note) && !on_start.contains(&pair) {
            latest.entry(pair).or_insert(index);
        }
    }
    let active: HashSet<usize> = latest
        .into_values()
        .filter(|&index| notes[index].end() > item.note_start)
        .collect();

    let mut remaining = Vec::with_capacity(notes.len());
    for (index, note) in notes.drain(..).enumerate() {
        let inside = (first..last).contains(&index) && item.target.selects(&note);
        if inside || active.contains(&index) {
            extraction
                .starts
                .entry((note.channel, note.track))
                .or_insert(note.start);
            extraction.removed.push(note);
        } else {
            remaining.push(note);
        }
    }
    *notes = remaining;

    extraction
}

/// Lay modifier output back to back per (channel, track) and merge it into
/// the master sequence.
///
/// Output for a (channel, track) pair that had no input starts at the
/// placement start.
pub fn insert_output(
    notes: &mut Vec<Note>,
    output: &[Note],
    starts: &HashMap<(usize, usize), f64>,
    item: &ModItem,
) {
    let mut cursors = starts.clone();
    for note in output {
        let cursor = cursors
            .entry((note.channel, note.track))
            .or_insert(item.note_start);
        notes.push(Note {
            start: *cursor,
            ..*note
        });
        *cursor += note.duration;
    }
    sort_by_start(notes);
}

/// Run one modifier placement over the master sequence.
///
/// `modify` receives the targeted notes (start cleared, ordered by channel
/// and track) and returns the plugin output. Returns the number of notes
/// removed and inserted.
pub fn apply_modifier(
    notes: &mut Vec<Note>,
    item: &ModItem,
    modify: impl FnOnce(Vec<Note>) -> Result<Vec<Note>>,
) -> Result<(usize, usize)> {
    let extraction = extract_targets(notes, item);
    let removed = extraction.removed.len();

    let input = extraction
        .removed
        .iter()
        .map(|note| Note { start: 0.0, ..*note })
        .collect();

    let output = match modify(input) {
        Ok(output) => output,
        Err(err) => {
            // Put the targeted notes back so a failed cycle leaves no hole
            notes.extend(extraction.removed);
            sort_by_start(notes);
            return Err(err);
        }
    };

    insert_output(notes, &output, &extraction.starts, item);
    Ok((removed, output.len()))
}

/// Group notes by channel and track, keeping their order.
pub fn channel_map(notes: &[Note]) -> ChannelMap {
    let mut channels = ChannelMap::new();
    for note in notes {
        channels
            .entry(note.channel)
            .or_default()
            .entry(note.track)
            .or_default()
            .push(*note);
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, Mode, PitchClass};
    use crate::timeline::{Change, Meter};

    fn gen_item(reference: &str, channel: usize, note_start: f64, note_end: f64, offset: f64) -> GenItem {
        GenItem {
            channel,
            track: 0,
            bar_start: note_start,
            bar_end: note_end,
            note_start,
            note_end,
            reference: reference.to_string(),
            offset,
            add: 0,
            sub: 0,
        }
    }

    fn mod_item(note_start: f64, note_end: f64, target: &str) -> ModItem {
        ModItem {
            bar_start: note_start,
            bar_end: note_end,
            note_start,
            note_end,
            reference: "m".to_string(),
            target: target.parse().unwrap(),
        }
    }

    fn counting(from: i32, count: i32) -> Vec<Note> {
        (from..from + count)
            .map(|i| Note::new(i, i as f64, 1.0))
            .collect()
    }

    /// ch0/tr0: unit notes 0..4, ch0/tr1: two half notes.
    fn master() -> Vec<Note> {
        let mut notes: Vec<Note> = (0..4)
            .map(|i| Note::new(60 + i, i as f64, 1.0).on(0, 0))
            .collect();
        notes.push(Note::new(48, 0.0, 2.0).on(0, 1));
        notes.push(Note::new(50, 2.0, 2.0).on(0, 1));
        sort_by_start(&mut notes);
        notes
    }

    #[test]
    fn test_splice_shifts_and_transposes() {
        let generation = counting(-2, 8);
        let mut item = gen_item("g", 1, 4.0, 6.0, -1.0);
        item.track = 2;
        item.add = 3;
        item.sub = 1;
        let items = vec![item, gen_item("missing", 0, 0.0, 1.0, 0.0)];

        let notes =
            splice_generations(&items, |id| (id == "g").then_some(generation.as_slice())).unwrap();
        let placed: Vec<(i32, f64)> = notes.iter().map(|n| (n.value, n.start)).collect();
        assert_eq!(placed, vec![(1, 4.0), (2, 5.0)]);
        assert!(notes.iter().all(|n| n.channel == 1 && n.track == 2));
    }

    #[test]
    fn test_splice_clips_partial_notes() {
        let generation = vec![Note::new(0, 0.0, 1.5), Note::new(1, 1.5, 1.5)];
        let items = vec![gen_item("g", 0, 10.0, 11.0, 1.0)];
        let notes = splice_generations(&items, |_| Some(generation.as_slice())).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].start, notes[0].duration), (10.0, 0.5));
        assert_eq!((notes[1].start, notes[1].duration), (10.5, 0.5));
    }

    #[test]
    fn test_resolve_keys_follows_changes() {
        let meter = Meter::default();
        let changes = Changes::new(
            Change::new(0.0, Key::default(), meter, 120.0),
            vec![Change::new(1.0, Key::new(PitchClass::new(9), Mode::Minor), meter, 120.0)],
        )
        .unwrap();
        let mut notes = vec![Note::new(2, 0.0, 1.0), Note::new(2, 1.0, 1.0)];
        resolve_keys(&mut notes, &changes).unwrap();
        assert_eq!(notes[0].value, 64);
        assert_eq!(notes[1].value, 72);
    }

    #[test]
    fn test_extreme_degrees_fail_the_cycle() {
        let changes = Changes::constant(Key::default(), Meter::default(), 120.0);
        let mut notes = vec![Note::new(i32::MAX, 0.0, 1.0)];
        assert!(matches!(
            resolve_keys(&mut notes, &changes),
            Err(Error::OutOfRange(_))
        ));

        let generation = vec![Note::new(i32::MAX - 1, 0.0, 1.0)];
        let mut item = gen_item("g", 0, 0.0, 1.0, 0.0);
        item.add = 5;
        assert!(matches!(
            splice_generations(&[item.clone()], |_| Some(generation.as_slice())),
            Err(Error::OutOfRange(_))
        ));

        item.add = i32::MAX;
        item.sub = -1;
        assert!(matches!(
            splice_generations(&[item], |_| Some(generation.as_slice())),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn test_echo_modifier_keeps_sequence() {
        let original = master();
        let mut notes = original.clone();
        let item = mod_item(1.0, 3.0, "ch(0)/tr(0)");

        let (removed, inserted) = apply_modifier(&mut notes, &item, Ok).unwrap();
        assert_eq!((removed, inserted), (2, 2));
        assert_eq!(notes.len(), original.len());
        for note in &original {
            assert!(notes.contains(note), "{:?} missing after splice", note);
        }
        assert!(notes.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn test_modifier_output_laid_back_to_back() {
        let mut notes = master();
        let item = mod_item(1.0, 3.0, "ch(0)/tr(0)");

        apply_modifier(&mut notes, &item, |input| {
            assert!(input.iter().all(|n| n.start == 0.0));
            Ok(input
                .iter()
                .flat_map(|n| {
                    let half = Note { duration: n.duration / 2.0, ..*n };
                    [half, half]
                })
                .collect())
        })
        .unwrap();

        let track0: Vec<(i32, f64)> = notes
            .iter()
            .filter(|n| n.track == 0)
            .map(|n| (n.value, n.start))
            .collect();
        assert_eq!(
            track0,
            vec![(60, 0.0), (61, 1.0), (61, 1.5), (62, 2.0), (62, 2.5), (63, 3.0)]
        );
        assert_eq!(notes.iter().filter(|n| n.track == 1).count(), 2);
    }

    #[test]
    fn test_modifier_includes_active_note() {
        let mut notes = master();
        let item = mod_item(0.5, 1.0, "ch(0)/tr(1)");
        let mut seen = Vec::new();
        apply_modifier(&mut notes, &item, |input| {
            seen = input.clone();
            Ok(Vec::new())
        })
        .unwrap();
        // The half note at 0.0 sounds at 0.5 and is the candidate stepped back to
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].value, 48);
        assert_eq!(notes.len(), 5);
    }

    #[test]
    fn test_modifier_skips_notes_ended_before_window() {
        let original = vec![Note::new(60, 0.0, 1.0), Note::new(62, 2.0, 1.0)];
        let mut notes = original.clone();
        let item = mod_item(1.5, 3.0, "ch(0)/tr(0)");
        let mut seen = Vec::new();
        apply_modifier(&mut notes, &item, |input| {
            seen = input.iter().map(|n| n.value).collect();
            Ok(input)
        })
        .unwrap();
        assert_eq!(seen, vec![62]);
        assert_eq!(notes, original);
    }

    #[test]
    fn test_active_note_found_per_track() {
        let mut notes = vec![
            Note::new(60, 0.0, 2.0).on(0, 0),
            Note::new(72, 0.5, 0.25).on(1, 0),
        ];
        let item = mod_item(1.0, 2.0, "ch(0)/tr(0)");
        let mut seen = Vec::new();
        apply_modifier(&mut notes, &item, |input| {
            seen = input.clone();
            Ok(Vec::new())
        })
        .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!((seen[0].value, seen[0].channel), (60, 0));
        assert_eq!(notes, vec![Note::new(72, 0.5, 0.25).on(1, 0)]);
    }

    #[test]
    fn test_empty_modifier_window_takes_nothing() {
        let mut notes = master();
        let item = mod_item(0.5, 0.5, "ch(0)/tr(0,1)");
        let extraction = extract_targets(&mut notes, &item);
        assert!(extraction.removed.is_empty());
        assert_eq!(notes, master());
    }

    #[test]
    fn test_failed_modifier_restores_notes() {
        let original = master();
        let mut notes = original.clone();
        let item = mod_item(0.0, 4.0, "ch(0)/tr(0,1)");
        let err = apply_modifier(&mut notes, &item, |_| {
            Err(Error::protocol("m", "", "broken"))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(notes.len(), original.len());
    }

    #[test]
    fn test_channel_map_groups() {
        let notes = vec![
            Note::new(1, 0.0, 1.0).on(1, 0),
            Note::new(2, 0.0, 1.0).on(0, 1),
            Note::new(3, 1.0, 1.0).on(1, 0),
        ];
        let map = channel_map(&notes);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1][&0].len(), 2);
        assert_eq!(map[&0][&1][0].value, 2);
    }
}
