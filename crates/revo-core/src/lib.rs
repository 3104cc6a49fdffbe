//! revo-core - live-coding music interpretation engine
//!
//! A project document places generators and modifiers on a bar timeline.
//! Generators and modifiers are external plugin processes speaking a small
//! line protocol. Every time the document changes the interpreter:
//!
//! - syncs the registered-component schema with the document
//! - asks each generator for exactly the whole-note window its placements need
//! - splices the generated degrees into one timeline and resolves them to pitches
//! - runs modifiers over the notes they target, memoizing their output
//! - hands the result to a sink (a Standard MIDI File by default)
//!
//! Generator processes and modifier results persist between cycles, so an
//! edit only re-runs the plugins it affects.
//!
//! # Usage as a Library
//!
//! ```no_run
//! use revo_core::{DirectoryResolver, Interpreter, MidiFileSink};
//!
//! let resolver = DirectoryResolver::new("/opt/revo");
//! let sink = MidiFileSink::new("song/output.mid", 96, 64);
//! let mut interpreter = Interpreter::new("song", Box::new(resolver), Box::new(sink))?;
//! let report = interpreter.run_cycle()?;
//! println!("{} notes", report.notes);
//! # Ok::<(), revo_core::Error>(())
//! ```

pub mod assemble;
pub mod component;
pub mod config;
pub mod demand;
pub mod document;
pub mod emit;
pub mod error;
pub mod generation;
pub mod interpreter;
pub mod key;
pub mod modification;
pub mod note;
pub mod process;
pub mod schema;
pub mod target;
pub mod timeline;
pub mod watch;

// Re-export main types
pub use component::{ComponentKind, ComponentResolver, DirectoryResolver};
pub use config::Config;
pub use document::{Project, ProjectDocument, PROJECT_FILE};
pub use emit::{Composition, MidiFileSink, NoteSink, Player};
pub use error::{Error, Result};
pub use generation::{GenerationManager, GenerationSettings, UpdateOutcome};
pub use interpreter::{CycleReport, Interpreter};
pub use key::Key;
pub use modification::ModificationCache;
pub use note::Note;
pub use process::Launch;
pub use schema::{SchemaDocument, SCHEMA_FILE};
pub use timeline::{Change, Changes, Meter};
pub use watch::{spawn_watcher, ChangeEvent};
