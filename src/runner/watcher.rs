// mos65gen - A 6502/65C02 code generator emitting 64tass assembly
// Copyright (C) 2026  Marcel Joachim Kloubert <marcel@kloubert.dev>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Watching program files so the CLI can recompile on every save.
//!
//! Editors save either by writing the file in place or by writing a
//! temporary file and renaming it over the original. Watching the parent
//! directory and matching file names catches both.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use log::debug;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::RunnerError;

/// Changes arriving within this window count as one.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches program tree files for changes.
pub struct ProgramWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    files: Vec<PathBuf>,
}

impl ProgramWatcher {
    /// Watch `files`; every file must exist.
    pub fn new(files: &[PathBuf]) -> Result<Self, RunnerError> {
        let (sender, events) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(sender)
            .map_err(|e| RunnerError::WatchError(format!("cannot create watcher: {}", e)))?;

        let mut directories = HashSet::new();
        let mut canonical = Vec::with_capacity(files.len());
        for file in files {
            let path = file.canonicalize().map_err(|e| {
                RunnerError::WatchError(format!("cannot resolve {}: {}", file.display(), e))
            })?;
            if let Some(parent) = path.parent() {
                if directories.insert(parent.to_path_buf()) {
                    watcher.watch(parent, RecursiveMode::NonRecursive).map_err(|e| {
                        RunnerError::WatchError(format!("cannot watch {}: {}", parent.display(), e))
                    })?;
                }
            }
            canonical.push(path);
        }
        debug!("watching {} file(s)", canonical.len());

        Ok(Self {
            _watcher: watcher,
            events,
            files: canonical,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Block until a watched file changes.
    pub fn wait_for_change(&self) -> Result<(), RunnerError> {
        loop {
            let event = self
                .events
                .recv()
                .map_err(|e| RunnerError::WatchError(format!("watch channel closed: {}", e)))?;
            if self.accept(event)? {
                return Ok(());
            }
        }
    }

    /// Wait at most `timeout` for a change; `false` when none came.
    pub fn wait_for_change_timeout(&self, timeout: Duration) -> Result<bool, RunnerError> {
        loop {
            match self.events.recv_timeout(timeout) {
                Ok(event) => {
                    if self.accept(event)? {
                        return Ok(true);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RunnerError::WatchError("watch channel closed".to_string()))
                }
            }
        }
    }

    /// True when `event` touches a watched file; drains the debounce window.
    fn accept(&self, event: notify::Result<Event>) -> Result<bool, RunnerError> {
        let event = event.map_err(|e| RunnerError::WatchError(e.to_string()))?;
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return Ok(false);
        }
        if !event.paths.iter().any(|path| is_watched(path, &self.files)) {
            return Ok(false);
        }
        std::thread::sleep(DEBOUNCE);
        while self.events.try_recv().is_ok() {}
        Ok(true)
    }
}

/// True when `path` names one of `files`, also after a rename over it.
pub fn is_watched(path: &Path, files: &[PathBuf]) -> bool {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    files.iter().any(|file| {
        *file == path || (file.file_name() == path.file_name() && file.parent() == path.parent())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_watch_existing_files() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("main.p8t");
        let second = dir.path().join("lib.p8t");
        fs::write(&first, "main {}").unwrap();
        fs::write(&second, "lib {}").unwrap();

        let watcher = ProgramWatcher::new(&[first, second]).unwrap();
        assert_eq!(watcher.files().len(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ProgramWatcher::new(&[PathBuf::from("/nonexistent/main.p8t")]);
        assert!(matches!(result, Err(RunnerError::WatchError(_))));
    }

    #[test]
    fn test_is_watched_matches_by_name_in_same_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("main.p8t");
        fs::write(&file, "").unwrap();
        let files = vec![file.canonicalize().unwrap()];

        assert!(is_watched(&file, &files));
        assert!(!is_watched(&dir.path().join("other.p8t"), &files));
    }

    #[test]
    fn test_no_change_times_out() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("main.p8t");
        fs::write(&file, "").unwrap();
        let watcher = ProgramWatcher::new(&[file]).unwrap();
        assert!(!watcher.wait_for_change_timeout(Duration::from_millis(50)).unwrap());
    }
}
