//! Component resolution.
//!
//! Definitions name their plugin with a `name-version` tag. A
//! [`ComponentResolver`] turns that tag into a [`Launch`]; the
//! [`DirectoryResolver`] does so by asking every `.revocomp` executable under
//! a resource directory to describe itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::process::Launch;

/// File extension of compiled components.
pub const COMPONENT_EXTENSION: &str = "revocomp";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Generator,
    Modifier,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Generator => f.write_str("generator"),
            ComponentKind::Modifier => f.write_str("modifier"),
        }
    }
}

/// A `name-version` component tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentTag<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

impl<'a> ComponentTag<'a> {
    /// Split at the first `-`. Returns `None` when no version is given.
    pub fn parse(tag: &'a str) -> Option<Self> {
        let (name, version) = tag.split_once('-')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self { name, version })
    }
}

/// Self-description printed by a component run with `info`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Locates the executable behind a component tag.
pub trait ComponentResolver: Send + Sync {
    fn find_component(&self, name: &str, kind: ComponentKind, version: &str) -> Option<Launch>;
}

/// Resolves components found under `<resource_directory>/components`.
#[derive(Clone, Debug)]
pub struct DirectoryResolver {
    root: PathBuf,
    interpreter: Option<Launch>,
}

impl DirectoryResolver {
    pub fn new(resource_directory: impl AsRef<Path>) -> Self {
        Self {
            root: resource_directory.as_ref().join("components"),
            interpreter: None,
        }
    }

    /// Run candidates through `interpreter` instead of executing them
    /// directly, e.g. `/bin/sh` for script components.
    pub fn with_interpreter(mut self, interpreter: Launch) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every component file below the root, in a stable order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_components(&self.root, &mut found);
        found.sort();
        found
    }

    /// Launch for a component file.
    pub fn launch_for(&self, component: &Path) -> Launch {
        let component = component.to_string_lossy().into_owned();
        match &self.interpreter {
            Some(interpreter) => {
                let mut args = interpreter.args.clone();
                args.push(component);
                Launch::new(interpreter.path.clone(), args)
            }
            None => Launch::new(component, Vec::new()),
        }
    }

    /// Ask a component to describe itself.
    pub fn info(&self, component: &Path) -> Result<ComponentInfo> {
        let launch = self.launch_for(component);
        let id = component.to_string_lossy();
        let output = Command::new(&launch.path)
            .args(&launch.args)
            .arg("info")
            .output()
            .map_err(|source| Error::Spawn {
                id: id.to_string(),
                path: launch.path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(Error::protocol(
                &id,
                "",
                format!("info exited with {}", output.status),
            ));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

fn collect_components(dir: &Path, found: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_components(&path, found);
            } else if path.extension().is_some_and(|e| e == COMPONENT_EXTENSION) {
                found.push(path);
            }
        }
    }
}

impl ComponentResolver for DirectoryResolver {
    fn find_component(&self, name: &str, kind: ComponentKind, version: &str) -> Option<Launch> {
        self.candidates().into_iter().find_map(|candidate| {
            let info = match self.info(&candidate) {
                Ok(info) => info,
                Err(e) => {
                    log::debug!("Skipping candidate {}: {}", candidate.display(), e);
                    return None;
                }
            };
            (info.name == name && info.kind == kind && info.version == version)
                .then(|| self.launch_for(&candidate))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    /// Resolver backed by a fixed table, for tests that do not need a
    /// resource directory.
    #[derive(Default)]
    pub(crate) struct TableResolver {
        pub(crate) table: HashMap<(String, ComponentKind, String), Launch>,
    }

    impl TableResolver {
        pub(crate) fn insert(&mut self, tag: &str, kind: ComponentKind, launch: Launch) {
            let parsed = ComponentTag::parse(tag).unwrap();
            self.table.insert(
                (parsed.name.to_string(), kind, parsed.version.to_string()),
                launch,
            );
        }
    }

    impl ComponentResolver for TableResolver {
        fn find_component(&self, name: &str, kind: ComponentKind, version: &str) -> Option<Launch> {
            self.table
                .get(&(name.to_string(), kind, version.to_string()))
                .cloned()
        }
    }

    fn write_component(dir: &Path, file: &str, info: &str) -> PathBuf {
        let path = dir.join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(
            &path,
            format!("if [ \"$1\" = info ]; then echo '{}'; exit 0; fi\nexit 1\n", info),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_component_tag() {
        assert_eq!(
            ComponentTag::parse("walker-1.2-beta"),
            Some(ComponentTag {
                name: "walker",
                version: "1.2-beta"
            })
        );
        assert_eq!(ComponentTag::parse("walker"), None);
        assert_eq!(ComponentTag::parse("-1"), None);
        assert_eq!(ComponentTag::parse("walker-"), None);
    }

    #[test]
    fn test_info_json() {
        let info: ComponentInfo = serde_json::from_str(
            r#"{"name": "walker", "type": "generator", "version": "1", "author": "me"}"#,
        )
        .unwrap();
        assert_eq!(info.kind, ComponentKind::Generator);
        assert_eq!(info.author.as_deref(), Some("me"));
        assert!(info.description.is_none());
        assert!(serde_json::from_str::<ComponentInfo>(r#"{"name": "x", "type": "effect", "version": "1"}"#).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_resolver_matches_name_kind_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let components = dir.path().join("components");
        write_component(
            &components,
            "walker-1.revocomp",
            r#"{"name":"walker","type":"generator","version":"1"}"#,
        );
        let nested = write_component(
            &components,
            "nested/walker-2.revocomp",
            r#"{"name":"walker","type":"generator","version":"2"}"#,
        );
        write_component(
            &components,
            "halve.revocomp",
            r#"{"name":"halve","type":"modifier","version":"1"}"#,
        );
        write_component(&components, "broken.revocomp", "not json");
        fs::write(components.join("notes.txt"), "ignored").unwrap();
        let broken = components.join("broken.revocomp");

        let resolver = DirectoryResolver::new(dir.path())
            .with_interpreter(Launch::new("/bin/sh", Vec::new()));
        assert_eq!(resolver.candidates().len(), 4);
        assert!(matches!(resolver.info(&broken), Err(Error::Json(_))));

        let launch = resolver
            .find_component("walker", ComponentKind::Generator, "2")
            .unwrap();
        assert_eq!(launch.path, PathBuf::from("/bin/sh"));
        assert_eq!(launch.args, vec![nested.to_string_lossy().into_owned()]);

        assert!(resolver.find_component("halve", ComponentKind::Modifier, "1").is_some());
        assert!(resolver.find_component("halve", ComponentKind::Generator, "1").is_none());
        assert!(resolver.find_component("walker", ComponentKind::Generator, "3").is_none());
    }

    #[test]
    fn test_missing_resource_directory() {
        let resolver = DirectoryResolver::new("/definitely/not/a/resource/dir");
        assert!(resolver.candidates().is_empty());
        assert!(resolver.find_component("a", ComponentKind::Generator, "1").is_none());
    }
}
