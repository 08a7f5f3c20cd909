//! Style settings and the INI store written by the color/font editor.
//!
//! The store looks like:
//!
//! ```ini
//! [Settings]
//! font_color = #00FF00
//! font = Georgia
//! ```

use crate::error::{OverlayError, Result};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Presentation settings for the overlay label. Color and font always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSettings {
    /// Label color, e.g. `#FFFFFF`
    pub color: String,
    /// Font family name, e.g. `Georgia`
    pub font_family: String,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            color: crate::DEFAULT_COLOR.to_string(),
            font_family: crate::DEFAULT_FONT.to_string(),
        }
    }
}

impl StyleSettings {
    pub fn new(color: impl Into<String>, font_family: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            font_family: font_family.into(),
        }
    }

    /// Render in the store's INI format.
    pub fn to_ini(&self) -> String {
        format!(
            "[Settings]\nfont_color = {}\nfont = {}\n",
            self.color, self.font_family
        )
    }

    /// Replace the store at `path` with these settings.
    ///
    /// Writes a sibling file first and renames it over the store, so readers
    /// never observe a half-written file from this writer.
    pub fn write_ini(&self, path: &Path) -> Result<()> {
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        fs::write(&staging, self.to_ini())?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

/// Outcome of reading the settings store once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRead {
    /// No store on disk
    Missing,
    /// The store exists but has no settings section yet (typically mid-write)
    NotReady,
    Loaded(StyleSettings),
}

#[derive(Debug, Deserialize)]
struct SettingsFile {
    #[serde(default, alias = "Settings")]
    settings: Option<SettingsSection>,
}

#[derive(Debug, Deserialize)]
struct SettingsSection {
    #[serde(default)]
    font_color: Option<String>,
    #[serde(default)]
    font: Option<String>,
}

/// Parse the store's text. Absent or blank fields take the value from `defaults`.
pub fn parse_settings(text: &str, defaults: &StyleSettings) -> Result<StoreRead> {
    if text.trim().is_empty() {
        return Ok(StoreRead::NotReady);
    }

    let file: SettingsFile = Config::builder()
        .add_source(File::from_str(text, FileFormat::Ini))
        .build()
        .and_then(|config| config.try_deserialize::<SettingsFile>())
        .map_err(|e| OverlayError::parse_error(format!("settings store: {}", e)))?;

    let Some(section) = file.settings else {
        return Ok(StoreRead::NotReady);
    };

    let pick = |value: Option<String>, fallback: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };

    Ok(StoreRead::Loaded(StyleSettings {
        color: pick(section.font_color, &defaults.color),
        font_family: pick(section.font, &defaults.font_family),
    }))
}

/// Read the store at `path` once.
pub fn read_settings(path: &Path, defaults: &StyleSettings) -> Result<StoreRead> {
    match fs::read_to_string(path) {
        Ok(text) => parse_settings(&text, defaults),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoreRead::Missing),
        Err(e) => Err(e.into()),
    }
}

/// The settings that would be applied right now: the store's content, or
/// `defaults` if the store is missing, incomplete or unreadable.
pub fn load_current(path: &Path, defaults: &StyleSettings) -> StyleSettings {
    match read_settings(path, defaults) {
        Ok(StoreRead::Loaded(settings)) => settings,
        Ok(_) => defaults.clone(),
        Err(e) => {
            tracing::warn!("Using default style, settings store unreadable: {}", e);
            defaults.clone()
        }
    }
}
