//! Hot reload of style settings.
//!
//! Polls the settings store's modification time and re-reads it when it moves
//! forward. A notification is sent only when color or font actually changed.

use crate::style::settings::{read_settings, StoreRead, StyleSettings};
use crate::timer::RecurringTimer;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches the settings store written by the external editor.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    defaults: StyleSettings,
    applied: StyleSettings,
    last_modified: Option<SystemTime>,
    last_error: Option<String>,
}

impl ConfigWatcher {
    /// Create a watcher whose currently-applied settings are `defaults`.
    pub fn new<P: AsRef<Path>>(path: P, defaults: StyleSettings) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            applied: defaults.clone(),
            defaults,
            last_modified: None,
            last_error: None,
        }
    }

    /// Treat `settings` as already on screen, so only later edits are reported.
    pub fn with_applied(mut self, settings: StyleSettings) -> Self {
        self.applied = settings;
        self
    }

    /// Returns the path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The settings most recently reported as applied.
    pub fn applied(&self) -> &StyleSettings {
        &self.applied
    }

    /// The last read or parse error, if the previous check failed.
    pub fn error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn modified_time(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).ok()?.modified().ok()
    }

    /// Run one check. Returns the full new settings if they differ from the applied ones.
    ///
    /// A store that cannot be read or parsed counts as "no change yet": its
    /// modification time is not recorded, so it is read again on the next check.
    pub fn poll(&mut self) -> Option<StyleSettings> {
        let current = self.modified_time()?;

        let changed = match self.last_modified {
            None => true,
            Some(last) => current > last,
        };
        if !changed {
            return None;
        }

        match read_settings(&self.path, &self.defaults) {
            Ok(StoreRead::Loaded(settings)) => {
                self.last_modified = Some(current);
                self.last_error = None;
                if settings == self.applied {
                    debug!("Settings store touched without a style change");
                    return None;
                }
                self.applied = settings.clone();
                Some(settings)
            }
            Ok(StoreRead::NotReady) => {
                debug!("Settings store not ready, retrying next check");
                None
            }
            Ok(StoreRead::Missing) => None,
            Err(e) => {
                let message = e.to_string();
                if self.last_error.as_deref() != Some(message.as_str()) {
                    warn!("Ignoring unreadable settings store {}: {}", self.path.display(), message);
                }
                self.last_error = Some(message);
                None
            }
        }
    }

    /// Check every `poll_interval` until `cancel` fires, passing each change to `on_change`.
    pub fn watch<F>(mut self, poll_interval: Duration, cancel: CancellationToken, mut on_change: F) -> JoinHandle<()>
    where
        F: FnMut(StyleSettings) + Send + 'static,
    {
        tokio::spawn(async move {
            info!("Watching {} every {:?}", self.path.display(), poll_interval);
            let mut timer = RecurringTimer::new(poll_interval, cancel);
            while timer.tick().await {
                if let Some(settings) = self.poll() {
                    info!(
                        "Style changed: color {}, font {}",
                        settings.color, settings.font_family
                    );
                    on_change(settings);
                }
            }
            debug!("Settings watcher stopped");
        })
    }
}
