//! Polling file watcher.
//!
//! The project document is watched by polling its modification time. Every
//! observed change, plus one initial event, is sent as a [`ChangeEvent`] on a
//! crossbeam channel that the interpreter drains one event at a time.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::error::Result;

/// The watched document changed (or watching just started).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

/// Poll `path` every `interval` on a background thread.
///
/// The thread stops once the receiver is dropped.
pub fn spawn_watcher(
    path: impl Into<PathBuf>,
    interval: Duration,
) -> Result<(Receiver<ChangeEvent>, JoinHandle<()>)> {
    let (tx, rx) = unbounded();
    let path = path.into();
    let handle = thread::Builder::new()
        .name("revo-watch".to_string())
        .spawn(move || poll(path, interval, tx))?;
    Ok((rx, handle))
}

fn poll(path: PathBuf, interval: Duration, tx: Sender<ChangeEvent>) {
    let mut last_modified = modified(&path);
    log::debug!("watching {}", path.display());

    if tx
        .send(ChangeEvent {
            path: path.clone(),
            modified: last_modified,
        })
        .is_err()
    {
        return;
    }

    loop {
        thread::sleep(interval);

        let current_modified = modified(&path);
        if current_modified != last_modified {
            last_modified = current_modified;
            log::debug!("{} changed", path.display());
            let event = ChangeEvent {
                path: path.clone(),
                modified: current_modified,
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    }
}
