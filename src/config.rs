// src/config.rs

//! Defines the configuration for `wlterm`.
//!
//! Two kinds of settings live here. The grid geometry and the font are fixed
//! at compile time: the glyph atlas and the vertex buffer are sized from them,
//! so changing them at runtime would mean reallocating both. Everything else
//! (window, shell, pacing, colors) is a serde-backed `Config` that is read once
//! from a JSON file into the `CONFIG` static, falling back to defaults.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// --- Compile-time constants ---

/// Number of character columns in the terminal grid.
pub const GRID_COLS: usize = 80;
/// Number of character rows in the terminal grid.
pub const GRID_ROWS: usize = 25;

/// Font used for the glyph atlas.
pub const FONT_PATH: &str = "/usr/share/fonts/TTF/Inconsolata-Regular.ttf";
/// Pixel height requested from the rasterizer.
pub const FONT_PIXEL_SIZE: u32 = 24;

/// First codepoint placed in the atlas (space).
pub const FIRST_GLYPH: u8 = 32;
/// Last codepoint placed in the atlas (tilde).
pub const LAST_GLYPH: u8 = 126;
/// Number of atlas slots, one per printable ASCII codepoint.
pub const GLYPH_COUNT: usize = (LAST_GLYPH - FIRST_GLYPH) as usize + 1;

const CONFIG_DIR_NAME: &str = "wlterm";
const CONFIG_FILE_NAME: &str = "config.json";

/// Process-wide configuration, loaded on first access.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

// --- Top-Level Configuration Structure ---

/// Represents the complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Initial window geometry and identity.
    pub window: WindowConfig,
    /// Shell launched on the pty.
    pub shell: ShellConfig,
    /// Event loop pacing.
    pub performance: PerformanceConfig,
    /// Clear and text colors.
    pub colors: ColorConfig,
}

impl Config {
    /// Loads the configuration file if one exists, otherwise returns defaults.
    ///
    /// A malformed file is not fatal: it is reported and the defaults are used.
    pub fn load_or_default() -> Self {
        let Some(path) = config_file_path() else {
            debug!("Config: no config directory available, using defaults.");
            return Config::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match Config::from_json(&contents) {
                Ok(config) => {
                    info!("Config: loaded {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "Config: failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Config::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config: {} not found, using defaults.", path.display());
                Config::default()
            }
            Err(e) => {
                warn!(
                    "Config: failed to read {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Config::default()
            }
        }
    }

    /// Parses a configuration from JSON text. Missing fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// `$XDG_CONFIG_HOME/wlterm/config.json`, or `$HOME/.config/wlterm/config.json`.
fn config_file_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

// --- Window Configuration ---

/// Initial window settings. The compositor may override the size at any time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub width: i32,
    pub height: i32,
    pub title: String,
    pub app_id: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 800,
            height: 800,
            title: "wlterm".to_string(),
            app_id: "wlterm".to_string(),
        }
    }
}

// --- Shell Configuration ---

/// Settings for the child process attached to the pty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Path to the shell executable.
    pub program: PathBuf,
    /// Launch as a login shell (argv[0] prefixed with `-`).
    pub login: bool,
    /// Value for the TERM environment variable. The grid interprets no escape
    /// sequences, so anything other than `dumb` invites garbage on screen.
    pub term_env_var: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        ShellConfig {
            program: PathBuf::from("/bin/bash"),
            login: true,
            term_env_var: "dumb".to_string(),
        }
    }
}

// --- Performance Configuration ---

/// Event loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Upper bound on a single readiness wait, in milliseconds.
    pub poll_timeout_ms: u32,
    /// Maximum number of bytes taken from the pty per readiness notification.
    pub pty_read_chunk: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            poll_timeout_ms: 500,
            pty_read_chunk: 4096,
        }
    }
}

// --- Color Configuration ---

/// RGBA colors in the 0.0..=1.0 range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColorConfig {
    pub clear: [f32; 4],
    pub text: [f32; 4],
}

impl Default for ColorConfig {
    fn default() -> Self {
        ColorConfig {
            clear: [1.0, 1.0, 1.0, 1.0],
            text: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn glyph_count_covers_printable_ascii() {
        assert_eq!(GLYPH_COUNT, 95);
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let config = Config::from_json(r#"{ "window": { "width": 1024 } }"#).unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 800);
        assert_eq!(config.shell, ShellConfig::default());
        assert_eq!(config.performance.poll_timeout_ms, 500);
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Config::from_json("{ window: ").is_err());
    }
}
