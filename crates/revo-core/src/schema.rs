//! Registered-component schema.
//!
//! The schema document (`.revoschema.toml` in the project directory) records
//! every component tag the project currently references, with its kind and
//! the resolved launch. Each cycle diffs the tags the document wants against
//! the tags already registered:
//!
//! ```text
//!   wanted      registered     instruction
//!   a-1         -              ADD    (resolve, then register)
//!   b-2         b-2            none
//!   -           c-3            REMOVE
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::component::{ComponentKind, ComponentResolver, ComponentTag};
use crate::document::Project;
use crate::error::{Error, Result};
use crate::process::Launch;

/// File name of the schema document inside a project directory.
pub const SCHEMA_FILE: &str = ".revoschema.toml";

// ============================================================================
// Instructions
// ============================================================================

/// A change to apply to the schema document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaInstruction {
    Add { tag: String, kind: ComponentKind },
    Remove { tag: String, kind: ComponentKind },
}

impl SchemaInstruction {
    pub fn tag(&self) -> &str {
        match self {
            SchemaInstruction::Add { tag, .. } => tag,
            SchemaInstruction::Remove { tag, .. } => tag,
        }
    }
}

/// Component tags wanted by the document's definitions.
///
/// A tag used by both a generator and a modifier keeps the modifier kind.
pub fn wanted_components(project: &Project) -> BTreeMap<String, ComponentKind> {
    let mut wanted = BTreeMap::new();
    for definition in &project.generators {
        wanted.insert(definition.component.clone(), ComponentKind::Generator);
    }
    for definition in &project.modifiers {
        wanted.insert(definition.component.clone(), ComponentKind::Modifier);
    }
    wanted
}

/// Instructions turning `added` into `wanted`.
///
/// Removals come first. A tag registered under another kind is removed and
/// added again.
pub fn diff(
    wanted: &BTreeMap<String, ComponentKind>,
    added: &BTreeMap<String, ComponentKind>,
) -> Vec<SchemaInstruction> {
    let mut instructions = Vec::new();

    for (tag, &kind) in added {
        if wanted.get(tag) != Some(&kind) {
            instructions.push(SchemaInstruction::Remove {
                tag: tag.clone(),
                kind,
            });
        }
    }

    for (tag, &kind) in wanted {
        if added.get(tag) != Some(&kind) {
            instructions.push(SchemaInstruction::Add {
                tag: tag.clone(),
                kind,
            });
        }
    }

    instructions
}

// ============================================================================
// Schema Document
// ============================================================================

/// One registered component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisteredComponent {
    pub kind: ComponentKind,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl RegisteredComponent {
    pub fn launch(&self) -> Launch {
        Launch::new(self.path.clone(), self.args.clone())
    }
}

/// Outcome of applying instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Tags that could not be registered (no version or not found).
    pub skipped: Vec<String>,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub components: BTreeMap<String, RegisteredComponent>,
}

impl SchemaDocument {
    /// Load the schema document; a missing file is an empty schema.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Registered tags and their kinds.
    pub fn added(&self) -> BTreeMap<String, ComponentKind> {
        self.components
            .iter()
            .map(|(tag, component)| (tag.clone(), component.kind))
            .collect()
    }

    /// Launch for a registered tag of the given kind.
    pub fn launch(&self, tag: &str, kind: ComponentKind) -> Option<Launch> {
        self.components
            .get(tag)
            .filter(|component| component.kind == kind)
            .map(RegisteredComponent::launch)
    }

    /// Apply instructions, resolving added tags through `resolver`.
    ///
    /// Tags without a version and tags the resolver cannot find are logged
    /// and skipped.
    pub fn apply(
        &mut self,
        instructions: &[SchemaInstruction],
        resolver: &dyn ComponentResolver,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for instruction in instructions {
            match instruction {
                SchemaInstruction::Remove { tag, .. } => {
                    if self.components.remove(tag).is_some() {
                        log::info!("Removed component {}", tag);
                        report.removed.push(tag.clone());
                    }
                }
                SchemaInstruction::Add { tag, kind } => {
                    let Some(parsed) = ComponentTag::parse(tag) else {
                        log::warn!("Please specify a version for component '{}'", tag);
                        report.skipped.push(tag.clone());
                        continue;
                    };
                    match resolver.find_component(parsed.name, *kind, parsed.version) {
                        Some(launch) => {
                            log::info!("Added {} {} ({})", kind, tag, launch.path.display());
                            self.components.insert(
                                tag.clone(),
                                RegisteredComponent {
                                    kind: *kind,
                                    path: launch.path,
                                    args: launch.args,
                                },
                            );
                            report.added.push(tag.clone());
                        }
                        None => {
                            log::warn!("{}", Error::Unresolved { tag: tag.clone() });
                            report.skipped.push(tag.clone());
                        }
                    }
                }
            }
        }

        report
    }

    /// Diff against `wanted`, apply, and persist to `path` when anything changed.
    pub fn sync(
        &mut self,
        wanted: &BTreeMap<String, ComponentKind>,
        resolver: &dyn ComponentResolver,
        path: &Path,
    ) -> Result<SyncReport> {
        let instructions = diff(wanted, &self.added());
        let report = self.apply(&instructions, resolver);
        if report.changed() || !path.exists() {
            self.save(path)?;
        }
        Ok(report)
    }
}
