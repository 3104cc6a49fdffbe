//! Error types for revo-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for revo-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while interpreting a project.
///
/// Every variant is fatal to the current interpretation cycle only. The
/// watch loop keeps running and the next saved edit is the retry.
#[derive(Debug, Error)]
pub enum Error {
    /// A plugin wrote a line the core could not parse.
    #[error("Protocol violation from '{id}': {reason} (line: {line:?})")]
    Protocol {
        id: String,
        line: String,
        reason: String,
    },

    /// A plugin executable could not be started.
    #[error("Failed to launch '{id}' at {}: {source}", path.display())]
    Spawn {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to a plugin pipe failed.
    #[error("Pipe error talking to '{id}': {source}")]
    Pipe {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// A referenced component could not be located.
    #[error("Failed to locate component '{tag}'")]
    Unresolved { tag: String },

    /// One or more generators failed during the parallel update phase.
    #[error("{} generator(s) failed: {}", failures.len(), summarize(failures))]
    Generation { failures: Vec<(String, Error)> },

    /// The project document is missing or has invalid required fields.
    #[error("Malformed document: {0}")]
    Document(String),

    /// A degree or pitch left the representable range.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// MIDI encoding error
    #[error("MIDI error: {0}")]
    Midi(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON parsing error (component info replies)
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a protocol violation for the plugin `id`.
    pub fn protocol(id: &str, line: &str, reason: impl Into<String>) -> Self {
        Error::Protocol {
            id: id.to_string(),
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// The reference id this error is attributed to, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Error::Protocol { id, .. } | Error::Spawn { id, .. } | Error::Pipe { id, .. } => {
                Some(id)
            }
            Error::Unresolved { tag } => Some(tag),
            _ => None,
        }
    }
}

fn summarize(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(id, err)| format!("[{}] {}", id, err))
        .collect::<Vec<_>>()
        .join("; ")
}
