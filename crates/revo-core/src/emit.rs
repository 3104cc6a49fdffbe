//! Emission of finished cycles.
//!
//! A [`NoteSink`] receives the assembled notes grouped by channel and track
//! together with the change list. [`MidiFileSink`] writes them as a format-1
//! Standard MIDI File; [`Player`] plays the written file with an external
//! program.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use crate::assemble::ChannelMap;
use crate::error::{Error, Result};
use crate::timeline::{Change, Changes};

/// The result of one interpretation cycle.
#[derive(Clone, Debug)]
pub struct Composition {
    pub changes: Changes,
    /// Pitched notes by channel, then track.
    pub channels: ChannelMap,
    /// General MIDI program per channel; missing entries use program 0.
    pub programs: Vec<u8>,
}

impl Composition {
    pub fn note_count(&self) -> usize {
        self.channels
            .values()
            .flat_map(|tracks| tracks.values())
            .map(Vec::len)
            .sum()
    }
}

/// Receives every successfully assembled composition.
pub trait NoteSink {
    fn emit(&mut self, composition: &Composition) -> Result<()>;
}

// ============================================================================
// Standard MIDI File
// ============================================================================

/// Writes each composition to a MIDI file, replacing the previous one.
#[derive(Clone, Debug)]
pub struct MidiFileSink {
    path: PathBuf,
    ticks_per_quarter: u16,
    velocity: u8,
}

impl MidiFileSink {
    pub fn new(path: impl Into<PathBuf>, ticks_per_quarter: u16, velocity: u8) -> Self {
        Self {
            path: path.into(),
            ticks_per_quarter: ticks_per_quarter.clamp(1, 0x7fff),
            velocity: velocity.clamp(1, 127),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NoteSink for MidiFileSink {
    fn emit(&mut self, composition: &Composition) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = midi_bytes(composition, self.ticks_per_quarter, self.velocity)?;
        fs::write(&self.path, bytes)?;
        log::info!(
            "Wrote {} notes to {}",
            composition.note_count(),
            self.path.display()
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AbsoluteEvent {
    tick: u64,
    order: u8,
    kind: TrackEventKind<'static>,
}

/// Encode a composition as a format-1 Standard MIDI File.
///
/// Track 0 carries meter and tempo at every change. Every (channel, track)
/// pair gets its own track starting with a program change.
pub fn midi_bytes(composition: &Composition, ticks_per_quarter: u16, velocity: u8) -> Result<Vec<u8>> {
    let ticks_per_whole = f64::from(ticks_per_quarter) * 4.0;
    let to_tick = |whole_notes: f64| (whole_notes * ticks_per_whole).round();

    let mut tracks = vec![conductor_track(composition.changes.as_slice(), &to_tick)];

    for (&channel, channel_tracks) in &composition.channels {
        if channel > 15 {
            log::warn!("channel {} exceeds the 16 MIDI channels, skipped", channel);
            continue;
        }
        let midi_channel = u4::new(channel as u8);
        let program = composition.programs.get(channel).copied().unwrap_or(0);

        for notes in channel_tracks.values() {
            let mut events = Vec::with_capacity(notes.len() * 2);
            for note in notes {
                let start = to_tick(note.start);
                if start < 0.0 {
                    continue;
                }
                let end = to_tick(note.end()).max(start);
                let key = u7::new(note.value.clamp(0, 127) as u8);
                events.push(AbsoluteEvent {
                    tick: start as u64,
                    order: 1,
                    kind: TrackEventKind::Midi {
                        channel: midi_channel,
                        message: MidiMessage::NoteOn {
                            key,
                            vel: u7::new(velocity),
                        },
                    },
                });
                events.push(AbsoluteEvent {
                    tick: end as u64,
                    order: 0,
                    kind: TrackEventKind::Midi {
                        channel: midi_channel,
                        message: MidiMessage::NoteOff {
                            key,
                            vel: u7::new(0),
                        },
                    },
                });
            }
            events.sort_by_key(|event| (event.tick, event.order));

            let mut track = Vec::with_capacity(events.len() + 2);
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel: midi_channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(program.min(127)),
                    },
                },
            });
            push_relative(&mut track, events);
            tracks.push(track);
        }
    }

    let header = Header {
        format: Format::Parallel,
        timing: Timing::Metrical(u15::new(ticks_per_quarter)),
    };

    let mut bytes = Vec::new();
    Smf { header, tracks }
        .write_std(&mut bytes)
        .map_err(|e| Error::Midi(format!("failed to encode midi: {}", e)))?;
    Ok(bytes)
}

fn conductor_track(changes: &[Change], to_tick: &impl Fn(f64) -> f64) -> Vec<TrackEvent<'static>> {
    let mut events = Vec::with_capacity(changes.len() * 2);
    for change in changes {
        let tick = to_tick(change.note_start).max(0.0) as u64;
        let meter = change.meter;
        events.push(AbsoluteEvent {
            tick,
            order: 0,
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
                meter.numerator,
                denominator_power(meter.denominator),
                24,
                8,
            )),
        });
        let micros_per_quarter = (60_000_000.0 / change.tempo).round().clamp(1.0, 16_777_215.0);
        events.push(AbsoluteEvent {
            tick,
            order: 1,
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros_per_quarter as u32))),
        });
    }

    let mut track = Vec::with_capacity(events.len() + 1);
    push_relative(&mut track, events);
    track
}

/// Append absolute-tick events as delta-timed track events plus end of track.
fn push_relative(track: &mut Vec<TrackEvent<'static>>, events: Vec<AbsoluteEvent>) {
    let mut previous_tick = 0_u64;
    for event in events {
        let delta = event
            .tick
            .saturating_sub(previous_tick)
            .min(0x0fff_ffff) as u32;
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: event.kind,
        });
        previous_tick = event.tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
}

/// Time signature denominators are stored as a power of two.
fn denominator_power(denominator: u8) -> u8 {
    (f64::from(denominator).log2().round() as u8).min(7)
}

// ============================================================================
// External Player
// ============================================================================

/// Plays written files with an external program, one instance at a time.
pub struct Player {
    command: PathBuf,
    args: Vec<String>,
    current: Option<Child>,
}

impl Player {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            current: None,
        }
    }

    /// Start playing `file`, then stop the previous instance.
    pub fn play(&mut self, file: &Path) -> Result<()> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::Spawn {
                id: "player".to_string(),
                path: self.command.clone(),
                source,
            })?;
        log::debug!("player started with pid {}", child.id());

        if let Some(mut previous) = self.current.replace(child) {
            let _ = previous.kill();
            let _ = previous.wait();
        }
        Ok(())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(mut child) = self.current.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
