//! Plugin subprocess management.
//!
//! Generators and modifiers are external executables that speak a
//! newline-terminated text protocol over stdin/stdout. [`PluginProcess`]
//! owns one such child, forwards its stderr to the log, and terminates it
//! when dropped.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::{Error, Result};

/// Executable identity of a plugin: path plus ordered argument list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Launch {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl Launch {
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }
}

/// A running plugin with line-oriented pipes.
///
/// When dropped, the child is killed and reaped.
pub struct PluginProcess {
    id: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl PluginProcess {
    /// Spawn `path` with `args`, piping stdin and stdout.
    ///
    /// `id` names the plugin reference in logs and errors.
    pub fn spawn(id: &str, path: &Path, args: &[String]) -> Result<Self> {
        log::debug!("[{}] spawning {} {:?}", id, path.display(), args);

        let spawn_error = |source| Error::Spawn {
            id: id.to_string(),
            path: path.to_path_buf(),
            source,
        };

        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let missing = |what: &str| {
            spawn_error(std::io::Error::new(
                ErrorKind::Other,
                format!("{} was not captured", what),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        // Plugins report diagnostics on stderr; surface them in our log
        if let Some(stderr) = child.stderr.take() {
            let tag = id.to_string();
            std::thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(std::result::Result::ok) {
                    log::warn!("[{}] {}", tag, line);
                }
            });
        }

        Ok(Self {
            id: id.to_string(),
            child: Some(child),
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }

    /// Spawn from a [`Launch`].
    pub fn launch(id: &str, launch: &Launch) -> Result<Self> {
        Self::spawn(id, &launch.path, &launch.args)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write one request line; the newline is appended.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| Error::Pipe {
            id: self.id.clone(),
            source: std::io::Error::new(ErrorKind::BrokenPipe, "stdin already closed"),
        })?;
        stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
            .map_err(|source| Error::Pipe {
                id: self.id.clone(),
                source,
            })
    }

    /// Read one response line without its terminator.
    ///
    /// Returns `None` once the plugin has closed its stdout.
    pub fn read_line(&mut self) -> Result<Option<&str>> {
        self.line.clear();
        let read = self
            .stdout
            .read_line(&mut self.line)
            .map_err(|source| Error::Pipe {
                id: self.id.clone(),
                source,
            })?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end_matches(['\n', '\r'])))
    }

    /// Read one response line, treating end of output as a protocol violation.
    pub fn expect_line(&mut self) -> Result<&str> {
        let id = self.id.clone();
        self.read_line()?
            .ok_or_else(|| Error::protocol(&id, "", "unexpected end of output"))
    }

    /// Close stdin so the plugin sees end of input.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("[{}] exited with {}", self.id, status);
                }
                _ => {
                    log::debug!("[{}] stopping plugin", self.id);
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}
