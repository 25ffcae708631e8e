//! Per-user file locations.

use std::path::PathBuf;

/// `$XDG_CONFIG_HOME/vidpaper`, falling back to `$HOME/.config/vidpaper`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vidpaper"))
}

/// Processes that pause playback while running.
pub fn pause_list_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("pauselist"))
}

/// Processes that stop playback (and hand off to the holder) while running.
pub fn stop_list_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("stoplist"))
}
