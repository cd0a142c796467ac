//! Editor configuration.
//!
//! A small record of recognized options plus TOML load/save helpers so a
//! consuming shell can persist user preferences alongside its own settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How the editor talks to the terminal.
///
/// `Unset` is resolved on session start: a non-tty stdin/stderr pair selects
/// `NonInteractive`, a tty whose `TERM` starts with `xterm` selects `Full`,
/// and any other tty selects `NoEscapeSequences`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperationMode {
    /// Auto-detect on first use.
    #[default]
    Unset,
    /// Full inline editing with escape sequences.
    Full,
    /// Line-at-a-time input with a visible prompt but no escape sequences.
    NoEscapeSequences,
    /// Plain buffered reads, no prompt, no editing.
    NonInteractive,
}

/// When the display is reconciled with the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshBehaviour {
    /// Force a full refresh after every keystroke.
    Eager,
    /// Refresh only when the model actually changed.
    #[default]
    Lazy,
}

/// Recognized editor options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Terminal interaction mode.
    pub operation_mode: OperationMode,
    /// Refresh strategy.
    pub refresh_behaviour: RefreshBehaviour,
    /// Maximum number of history entries kept in memory. The oldest entry is
    /// dropped once the capacity is exceeded.
    pub history_capacity: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            operation_mode: OperationMode::Unset,
            refresh_behaviour: RefreshBehaviour::Lazy,
            history_capacity: 1024,
        }
    }
}

impl EditorConfig {
    /// Configuration for an eagerly refreshing editor (used by the
    /// incremental-search sub-editor).
    pub fn eager() -> Self {
        Self {
            refresh_behaviour: RefreshBehaviour::Eager,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read editor config file")?;
        let config: Self = toml::from_str(&content).context("Failed to parse editor config file")?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize editor config")?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content).context("Failed to write editor config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_lazy_and_unset() {
        let config = EditorConfig::default();
        assert_eq!(config.operation_mode, OperationMode::Unset);
        assert_eq!(config.refresh_behaviour, RefreshBehaviour::Lazy);
        assert_eq!(config.history_capacity, 1024);
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("editor.toml");

        let config = EditorConfig {
            operation_mode: OperationMode::Full,
            refresh_behaviour: RefreshBehaviour::Eager,
            history_capacity: 64,
        };
        config.save_to_file(&path).expect("save");

        let loaded = EditorConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded.operation_mode, OperationMode::Full);
        assert_eq!(loaded.refresh_behaviour, RefreshBehaviour::Eager);
        assert_eq!(loaded.history_capacity, 64);
    }
}
