//! Application-level configuration loading: board geometry, cooldown and palette.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::board::{
    Board, Colour, DEFAULT_BACKGROUND, DEFAULT_PALETTE, DEFAULT_SELECTED_INDEX,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PIXEL_CANVAS_CONFIG_PATH";

const DEFAULT_BOARD_SIZE: u32 = 1000;
const DEFAULT_COOLDOWN_MS: u64 = 1000;
const DEFAULT_SEED_SIZE: u32 = 25;
const DEFAULT_SHAKE_MS: u64 = 250;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    board: Board,
    cooldown: Duration,
    palette: Vec<Colour>,
    selected: Colour,
    default_colour: Colour,
    seed_size: u32,
    shake: Duration,
    mirror_history: bool,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        width = app_config.board.width(),
                        height = app_config.board.height(),
                        cooldown_ms = app_config.cooldown.as_millis() as u64,
                        "loaded canvas configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document; absent fields keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        Ok(raw.into())
    }

    pub fn board(&self) -> Board {
        self.board
    }

    /// Minimum time between two placements of the same identity.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn palette(&self) -> &[Colour] {
        &self.palette
    }

    /// Colour selected when a session starts.
    pub fn initial_colour(&self) -> &Colour {
        &self.selected
    }

    /// Colour of coordinates nobody has written.
    pub fn default_colour(&self) -> &Colour {
        &self.default_colour
    }

    /// Edge length of the square seeded with default cells at startup.
    pub fn seed_size(&self) -> u32 {
        self.seed_size
    }

    pub fn shake_duration(&self) -> Duration {
        self.shake
    }

    /// Whether this process also mirrors placements into per-cell history.
    pub fn mirror_history(&self) -> bool {
        self.mirror_history
    }

    /// Override the cooldown interval.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Override the board geometry.
    pub fn with_board(mut self, board: Board) -> Self {
        self.board = board;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    board_width: Option<u32>,
    board_height: Option<u32>,
    cooldown_ms: Option<u64>,
    palette: Option<Vec<Colour>>,
    selected_index: Option<usize>,
    default_colour: Option<Colour>,
    seed_size: Option<u32>,
    shake_ms: Option<u64>,
    mirror_history: Option<bool>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let palette = value
            .palette
            .filter(|palette| !palette.is_empty())
            .unwrap_or_else(default_palette);
        let selected = value
            .selected_index
            .and_then(|index| palette.get(index))
            .or_else(|| palette.get(DEFAULT_SELECTED_INDEX))
            .unwrap_or(&palette[0])
            .clone();
        Self {
            board: Board::new(
                value.board_width.unwrap_or(DEFAULT_BOARD_SIZE),
                value.board_height.unwrap_or(DEFAULT_BOARD_SIZE),
            ),
            cooldown: Duration::from_millis(value.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS)),
            selected,
            palette,
            default_colour: value.default_colour.unwrap_or_else(default_background),
            seed_size: value.seed_size.unwrap_or(DEFAULT_SEED_SIZE),
            shake: Duration::from_millis(value.shake_ms.unwrap_or(DEFAULT_SHAKE_MS)),
            mirror_history: value.mirror_history.unwrap_or(true),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in palette shipped with the binary.
fn default_palette() -> Vec<Colour> {
    DEFAULT_PALETTE
        .iter()
        .filter_map(|entry| entry.parse().ok())
        .collect()
}

fn default_background() -> Colour {
    DEFAULT_BACKGROUND
        .parse()
        .unwrap_or_else(|_| default_palette().swap_remove(0))
}
