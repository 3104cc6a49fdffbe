//! The interpretation cycle.
//!
//! [`Interpreter`] owns every piece of state that outlives a cycle: one
//! [`GenerationManager`] per generator id, the [`ModificationCache`], and the
//! registered-component schema. Each change event runs one cycle:
//!
//! ```text
//!   load document -> sync schema -> demand -> generate (one thread per id)
//!        -> splice + resolve keys -> modifiers (in order) -> emit
//! ```
//!
//! Any error aborts the cycle. Managers that failed keep their previous
//! window and the next change event is the retry.

use crossbeam_channel::{select, Receiver};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::assemble::{apply_modifier, channel_map, resolve_keys, splice_generations};
use crate::component::{ComponentKind, ComponentResolver};
use crate::demand::{generator_demand, modifier_demand};
use crate::document::{Definition, Project, ProjectDocument, PROJECT_FILE};
use crate::emit::{Composition, NoteSink, Player};
use crate::error::{Error, Result};
use crate::generation::{GenerationManager, GenerationSettings, UpdateOutcome};
use crate::modification::{CacheStats, ModificationCache};
use crate::note::Note;
use crate::process::Launch;
use crate::schema::{wanted_components, SchemaDocument, SyncReport, SCHEMA_FILE};
use crate::watch::ChangeEvent;

/// Summary of one successful cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    pub schema: SyncReport,
    /// Update outcome per generator id.
    pub generators: BTreeMap<String, UpdateOutcome>,
    pub cache: CacheStats,
    /// Notes handed to the sink.
    pub notes: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    fn log(&self) {
        let count = |outcome: UpdateOutcome| {
            self.generators
                .values()
                .filter(|&&o| o == outcome)
                .count()
        };
        log::info!(
            "Cycle done in {:.1?}: {} notes, generators {} respawned / {} regenerated / {} unchanged, modifications {} hits / {} misses / {} evicted",
            self.elapsed,
            self.notes,
            count(UpdateOutcome::Respawned),
            count(UpdateOutcome::Regenerated),
            count(UpdateOutcome::Unchanged),
            self.cache.hits,
            self.cache.misses,
            self.cache.evicted,
        );
        if self.schema.changed() {
            log::info!(
                "Schema: added {:?}, removed {:?}",
                self.schema.added,
                self.schema.removed
            );
        }
    }
}

/// Cycle-persistent interpreter state for one project directory.
pub struct Interpreter {
    project_dir: PathBuf,
    schema: SchemaDocument,
    resolver: Box<dyn ComponentResolver>,
    sink: Box<dyn NoteSink>,
    player: Option<(Player, PathBuf)>,
    generators: HashMap<String, GenerationManager>,
    cache: ModificationCache,
}

impl Interpreter {
    /// Prepare an interpreter for `project_dir`, loading its schema document.
    pub fn new(
        project_dir: impl Into<PathBuf>,
        resolver: Box<dyn ComponentResolver>,
        sink: Box<dyn NoteSink>,
    ) -> Result<Self> {
        let project_dir = project_dir.into();
        let schema = SchemaDocument::load(&project_dir.join(SCHEMA_FILE))?;
        Ok(Self {
            project_dir,
            schema,
            resolver,
            sink,
            player: None,
            generators: HashMap::new(),
            cache: ModificationCache::new(),
        })
    }

    /// Play `file` with `player` after every emitted cycle.
    pub fn with_player(mut self, player: Player, file: impl Into<PathBuf>) -> Self {
        self.player = Some((player, file.into()));
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn document_path(&self) -> PathBuf {
        self.project_dir.join(PROJECT_FILE)
    }

    pub fn schema(&self) -> &SchemaDocument {
        &self.schema
    }

    /// Generator ids with live state.
    pub fn generator_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Run a cycle for every received event until the event stream closes
    /// or `shutdown` fires.
    ///
    /// Events arriving during a cycle wait in the channel. A failed cycle is
    /// logged and the loop keeps waiting.
    pub fn run(&mut self, events: &Receiver<ChangeEvent>, shutdown: &Receiver<()>) {
        loop {
            select! {
                recv(events) -> event => {
                    let Ok(event) = event else {
                        log::debug!("change event stream closed");
                        break;
                    };
                    log::info!("{} changed, interpreting", event.path.display());
                    if let Err(e) = self.run_cycle() {
                        log::error!("Cycle aborted: {}", e);
                    }
                }
                recv(shutdown) -> _ => {
                    log::info!("Shutting down interpreter");
                    break;
                }
            }
        }
    }

    /// Interpret the project document once.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        let started = Instant::now();

        // Loading
        let mut project = ProjectDocument::load(&self.document_path())?.into_project()?;

        // Syncing schema
        let schema_report = self.schema.sync(
            &wanted_components(&project),
            self.resolver.as_ref(),
            &self.project_dir.join(SCHEMA_FILE),
        )?;

        // Computing demand
        let demand = generator_demand(&mut project.gen_items, &project.changes);
        for (id, window) in modifier_demand(&mut project.mod_items, &project.changes) {
            log::debug!("[{}] modifies [{}, {})", id, window.start, window.end);
        }

        let mut settings = HashMap::new();
        for (id, window) in demand {
            let Some(definition) = project.generator(&id) else {
                log::warn!("No generator named '{}', its placements are skipped", id);
                continue;
            };
            let Some(launch) = self
                .schema
                .launch(&definition.component, ComponentKind::Generator)
            else {
                log::warn!(
                    "Generator '{}' uses unregistered component '{}', its placements are skipped",
                    id,
                    definition.component
                );
                continue;
            };
            settings.insert(
                id,
                GenerationSettings::new(with_arguments(launch, definition), window.start, window.end),
            );
        }

        // Generating
        let outcomes = self.update_generators(settings)?;

        // Assembling
        let generators = &self.generators;
        let mut notes = splice_generations(&project.gen_items, |id| {
            generators.get(id).map(GenerationManager::generation)
        })?;
        resolve_keys(&mut notes, &project.changes)?;

        // Modifying
        self.cache.begin_cycle();
        self.apply_modifiers(&project, &mut notes)?;
        let cache = self.cache.end_cycle();

        // Emitting
        let composition = Composition {
            changes: project.changes,
            channels: channel_map(&notes),
            programs: project.programs,
        };
        self.sink.emit(&composition)?;

        if let Some((player, file)) = self.player.as_mut() {
            if let Err(e) = player.play(file) {
                log::warn!("Could not start player: {}", e);
            }
        }

        let report = CycleReport {
            schema: schema_report,
            generators: outcomes,
            cache,
            notes: composition.note_count(),
            elapsed: started.elapsed(),
        };
        report.log();
        Ok(report)
    }

    // ========================================================================
    // Generating
    // ========================================================================

    /// Update every wanted generator on its own thread and wait for all.
    ///
    /// Managers for ids no longer wanted are dropped, which stops their
    /// processes.
    fn update_generators(
        &mut self,
        mut settings: HashMap<String, GenerationSettings>,
    ) -> Result<BTreeMap<String, UpdateOutcome>> {
        self.generators.retain(|id, _| {
            let keep = settings.contains_key(id);
            if !keep {
                log::info!("[{}] no longer referenced, stopping generator", id);
            }
            keep
        });
        for id in settings.keys() {
            self.generators
                .entry(id.clone())
                .or_insert_with(|| GenerationManager::new(id.clone()));
        }

        let results: Vec<(String, Result<UpdateOutcome>)> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .generators
                .iter_mut()
                .filter_map(|(id, manager)| {
                    let wanted = settings.remove(id)?;
                    let handle = thread::Builder::new()
                        .name(format!("revo-gen-{}", id))
                        .spawn_scoped(scope, move || manager.update(wanted));
                    Some((id.clone(), handle))
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    let result = match handle {
                        Ok(handle) => handle.join().unwrap_or_else(|_| {
                            Err(Error::protocol(&id, "", "generator thread panicked"))
                        }),
                        Err(e) => Err(Error::Io(e)),
                    };
                    (id, result)
                })
                .collect()
        });

        let mut outcomes = BTreeMap::new();
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(outcome) => {
                    outcomes.insert(id, outcome);
                }
                Err(e) => failures.push((id, e)),
            }
        }

        if failures.is_empty() {
            Ok(outcomes)
        } else {
            failures.sort_by(|a, b| a.0.cmp(&b.0));
            Err(Error::Generation { failures })
        }
    }

    // ========================================================================
    // Modifying
    // ========================================================================

    fn apply_modifiers(&mut self, project: &Project, notes: &mut Vec<Note>) -> Result<()> {
        for item in &project.mod_items {
            let Some(definition) = project.modifier(&item.reference) else {
                log::warn!("No modifier named '{}', placement skipped", item.reference);
                continue;
            };
            let Some(launch) = self
                .schema
                .launch(&definition.component, ComponentKind::Modifier)
            else {
                log::warn!(
                    "Modifier '{}' uses unregistered component '{}', placement skipped",
                    item.reference,
                    definition.component
                );
                continue;
            };
            let launch = with_arguments(launch, definition);

            let cache = &mut self.cache;
            let (removed, inserted) = apply_modifier(notes, item, |input| {
                cache
                    .get_or_invoke(&item.reference, &launch, input)
                    .map(<[Note]>::to_vec)
            })?;
            log::debug!(
                "[{}] {} on [{}, {}): {} notes replaced by {}",
                item.reference,
                item.target,
                item.note_start,
                item.note_end,
                removed,
                inserted
            );
        }
        Ok(())
    }
}

/// Registered launch followed by the definition's own arguments.
fn with_arguments(mut launch: Launch, definition: &Definition) -> Launch {
    launch.args.extend(definition.args());
    launch
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::component::tests::TableResolver;
    use crate::process::tests::shell_plugin;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;

    /// Answers every index with degree `$1` lasting a quarter note.
    const PULSE: &str = r#"echo spawn >> "$(dirname "$0")/gen_spawns"
while read -r i; do echo "$1 0.25"; done
"#;

    /// Replaces every note by two eighth notes.
    const HALVE: &str = r#"echo spawn >> "$(dirname "$0")/mod_spawns"
while read -r line; do
  [ "$line" = finish ] && break
  set -- $(echo "$line" | tr -d '{}')
  echo "[{$1 0.125 $3 $4} {$1 0.125 $3 $4}]"
done
"#;

    const BROKEN: &str = "while read -r i; do echo \"nonsense\"; done\n";

    /// `project` plus the `BROKEN` script as a modifier over the first two bars.
    fn project_with_broken_modifier(step: u32) -> String {
        let project = project(step).replace(
            "[[channels]]",
            "[[modifiers]]\nid = \"broken\"\ncomponent = \"broken-1\"\n\n[[channels]]",
        );
        format!(
            "{}\n[[mod_channels.tracks]]\nitems = [{{ ref = \"broken\", length = 2, target = \"ch(0)/tr(0)\" }}]\n",
            project
        )
    }

    fn project(step: u32) -> String {
        format!(
            r#"
tempo = 120
meter = "4/4"
key = {{ root = "C", mode = "major" }}

[[generators]]
id = "pulse"
component = "pulse-1"
args = {{ step = {step} }}

[[modifiers]]
id = "halve"
component = "halve-1"

[[channels]]
program = 5
[[channels.tracks]]
items = [{{ ref = "pulse", length = 2 }}]

[[mod_channels]]
[[mod_channels.tracks]]
items = [{{ length = 1 }}, {{ ref = "halve", length = 1, target = "ch(0)/tr(0)" }}]
"#
        )
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        compositions: Rc<RefCell<Vec<Composition>>>,
    }

    impl NoteSink for RecordingSink {
        fn emit(&mut self, composition: &Composition) -> Result<()> {
            self.compositions.borrow_mut().push(composition.clone());
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        sink: RecordingSink,
    }

    impl Fixture {
        /// A project directory with both plugins registered in the resolver.
        fn new(generator: &str) -> (Self, Interpreter) {
            let _ = env_logger::builder().is_test(true).try_init();
            let dir = tempfile::tempdir().unwrap();
            let mut resolver = TableResolver::default();
            resolver.insert(
                "pulse-1",
                ComponentKind::Generator,
                shell_plugin(dir.path(), "pulse.sh", generator),
            );
            resolver.insert(
                "halve-1",
                ComponentKind::Modifier,
                shell_plugin(dir.path(), "halve.sh", HALVE),
            );
            resolver.insert(
                "broken-1",
                ComponentKind::Modifier,
                shell_plugin(dir.path(), "broken.sh", BROKEN),
            );
            let sink = RecordingSink::default();
            let interpreter =
                Interpreter::new(dir.path(), Box::new(resolver), Box::new(sink.clone())).unwrap();
            (Self { dir, sink }, interpreter)
        }

        fn write(&self, content: &str) {
            fs::write(self.dir.path().join(PROJECT_FILE), content).unwrap();
        }

        fn spawns(&self, name: &str) -> usize {
            fs::read_to_string(self.dir.path().join(name))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }

        fn last_track(&self) -> Vec<Note> {
            let compositions = self.sink.compositions.borrow();
            compositions.last().unwrap().channels[&0][&0].clone()
        }
    }

    #[test]
    fn test_full_cycle() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2));

        let report = interpreter.run_cycle().unwrap();
        assert_eq!(report.schema.added, vec!["halve-1", "pulse-1"]);
        assert_eq!(report.generators["pulse"], UpdateOutcome::Respawned);
        assert_eq!(report.cache.misses, 1);
        // Four quarters in bar 0, four quarters split into eight eighths in bar 1
        assert_eq!(report.notes, 12);

        let compositions = fixture.sink.compositions.borrow();
        let composition = compositions.last().unwrap();
        assert_eq!(composition.programs, vec![5]);
        let track = &composition.channels[&0][&0];
        assert!(track.iter().all(|n| n.value == 64));
        let starts: Vec<f64> = track.iter().map(|n| n.start).collect();
        assert_eq!(
            starts,
            vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.125, 1.25, 1.375, 1.5, 1.625, 1.75, 1.875]
        );
        assert!(fixture.dir.path().join(SCHEMA_FILE).exists());
    }

    #[test]
    fn test_unchanged_cycle_reuses_state() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2));
        interpreter.run_cycle().unwrap();

        let report = interpreter.run_cycle().unwrap();
        assert!(!report.schema.changed());
        assert_eq!(report.generators["pulse"], UpdateOutcome::Unchanged);
        assert_eq!((report.cache.hits, report.cache.misses), (1, 0));
        assert_eq!(fixture.spawns("gen_spawns"), 1);
        assert_eq!(fixture.spawns("mod_spawns"), 1);
    }

    #[test]
    fn test_changed_arguments_respawn_and_evict() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2));
        interpreter.run_cycle().unwrap();

        fixture.write(&project(3));
        let report = interpreter.run_cycle().unwrap();
        assert_eq!(report.generators["pulse"], UpdateOutcome::Respawned);
        assert_eq!(report.cache.misses, 1);
        assert_eq!(report.cache.evicted, 1);
        assert_eq!(fixture.spawns("gen_spawns"), 2);
        assert!(fixture.last_track().iter().all(|n| n.value == 65));
    }

    #[test]
    fn test_malformed_document_spawns_nothing() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2).replace("tempo = 120", ""));

        let err = interpreter.run_cycle().unwrap_err();
        assert!(matches!(err, Error::Document(_)));
        assert_eq!(fixture.spawns("gen_spawns"), 0);
        assert!(fixture.sink.compositions.borrow().is_empty());
    }

    #[test]
    fn test_protocol_violation_aborts_cycle() {
        let (fixture, mut interpreter) = Fixture::new(BROKEN);
        fixture.write(&project(2));

        match interpreter.run_cycle().unwrap_err() {
            Error::Generation { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "pulse");
                assert!(matches!(failures[0].1, Error::Protocol { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(fixture.sink.compositions.borrow().is_empty());
    }

    #[test]
    fn test_unregistered_generator_is_skipped() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2).replace("pulse-1", "ghost-1"));

        let report = interpreter.run_cycle().unwrap();
        assert_eq!(report.schema.skipped, vec!["ghost-1"]);
        assert!(report.generators.is_empty());
        assert_eq!(report.notes, 0);
        assert!(interpreter.generator_ids().is_empty());
    }

    #[test]
    fn test_run_until_events_close() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2));

        let (events_tx, events) = crossbeam_channel::unbounded();
        let (_shutdown_tx, shutdown) = crossbeam_channel::bounded(1);
        for _ in 0..2 {
            events_tx
                .send(ChangeEvent {
                    path: interpreter.document_path(),
                    modified: None,
                })
                .unwrap();
        }
        drop(events_tx);

        interpreter.run(&events, &shutdown);
        assert_eq!(fixture.sink.compositions.borrow().len(), 2);
        assert_eq!(fixture.spawns("gen_spawns"), 1);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);

        let (_events_tx, events) = crossbeam_channel::unbounded::<ChangeEvent>();
        let (shutdown_tx, shutdown) = crossbeam_channel::bounded(1);
        shutdown_tx.send(()).unwrap();

        interpreter.run(&events, &shutdown);
        assert!(fixture.sink.compositions.borrow().is_empty());
    }

    #[test]
    fn test_unreferenced_generator_is_dropped() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2));
        interpreter.run_cycle().unwrap();
        assert_eq!(interpreter.generator_ids(), vec!["pulse"]);

        fixture.write(&project(2).replace(r#"{ ref = "pulse", length = 2 }"#, "{ length = 2 }"));
        let report = interpreter.run_cycle().unwrap();
        assert!(interpreter.generator_ids().is_empty());
        assert_eq!(report.notes, 0);
        assert_eq!(report.cache.evicted, 1);
    }

    #[test]
    fn test_out_of_range_degree_fails_only_the_cycle() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(i32::MAX as u32));

        let err = interpreter.run_cycle().unwrap_err();
        assert!(matches!(err, Error::OutOfRange(_)), "unexpected error: {}", err);
        assert!(fixture.sink.compositions.borrow().is_empty());
        assert_eq!(fixture.spawns("mod_spawns"), 0);

        fixture.write(&project(2));
        let report = interpreter.run_cycle().unwrap();
        assert_eq!(report.notes, 12);
    }

    #[test]
    fn test_aborted_modifying_leaves_no_cache_state() {
        let (fixture, mut interpreter) = Fixture::new(PULSE);
        fixture.write(&project(2));
        interpreter.run_cycle().unwrap();

        fixture.write(&project_with_broken_modifier(2));
        let err = interpreter.run_cycle().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "unexpected error: {}", err);

        fixture.write(&project(2).replace(
            r#"{ ref = "halve", length = 1, target = "ch(0)/tr(0)" }"#,
            "{ length = 1 }",
        ));
        let report = interpreter.run_cycle().unwrap();
        assert_eq!((report.cache.hits, report.cache.misses), (0, 0));
        assert_eq!(report.cache.evicted, 1);
        assert_eq!(report.notes, 8);
    }
}
