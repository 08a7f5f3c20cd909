//! Label styling: the persisted color/font settings and their hot reload.

pub mod settings;
pub mod watcher;

pub use settings::{load_current, parse_settings, read_settings, StoreRead, StyleSettings};
pub use watcher::ConfigWatcher;
