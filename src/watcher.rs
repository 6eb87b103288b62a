// Config hot reload
//
// Watches the directory holding the config file rather than the file itself:
// editors that save by rename would otherwise detach the watch.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use crate::config::Config;

pub struct ConfigWatcher {
    path: PathBuf,
    file_name: OsString,
    events: Receiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .context("Config path has no file name")?
            .to_os_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, events) = channel();
        let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;

        log::info!("Watching {:?} for changes", path);
        Ok(Self {
            path,
            file_name,
            events,
            _watcher: watcher,
        })
    }

    /// Drain pending events; reload when any of them touched the config file.
    ///
    /// A file that fails to parse is logged and ignored, keeping the running
    /// configuration.
    pub fn poll(&self) -> Option<Config> {
        let mut changed = false;
        for event in self.events.try_iter() {
            match event {
                Ok(event) => changed |= touches_file(&event, &self.file_name),
                Err(e) => log::warn!("File watcher error: {}", e),
            }
        }
        if !changed {
            return None;
        }

        match Config::load_from_path(&self.path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Ignoring config change: {:#}", e);
                None
            }
        }
    }
}

fn touches_file(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
