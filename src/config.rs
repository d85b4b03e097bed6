use crate::encoder::EncoderConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Station configuration. Loaded once at startup; every path defaults to a
/// location under the data directory (`~/.skywave`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_schedule_file")]
    pub schedule_file: PathBuf,
    #[serde(default = "default_music_dirs")]
    pub music_dirs: Vec<PathBuf>,
    #[serde(default = "default_segments_dir")]
    pub segments_dir: PathBuf,
    #[serde(default)]
    pub podcasts_dir: Option<PathBuf>,
    /// Reserved always-available station ID; validated at startup.
    #[serde(default = "default_evergreen_file")]
    pub evergreen_file: PathBuf,
    #[serde(default = "default_messages_file")]
    pub messages_file: PathBuf,
    #[serde(default = "default_now_playing_file")]
    pub now_playing_file: PathBuf,
    #[serde(default = "default_requests_file")]
    pub requests_file: PathBuf,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    #[serde(default = "default_inventory_state_file")]
    pub inventory_state_file: PathBuf,
    #[serde(default = "default_command_file")]
    pub command_file: PathBuf,
    /// Crossfade between consecutive units, in seconds (0 = butt joins).
    #[serde(default = "default_crossfade")]
    pub crossfade_secs: f32,
    /// Repeat-avoidance: a unit within the last N plays is ineligible.
    #[serde(default = "default_lookback_plays")]
    pub lookback_plays: usize,
    /// Repeat-avoidance: a unit within the last T minutes is ineligible.
    /// The effective window is whichever of the two covers more plays.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,
    /// Fresh-unit floor per bucket before a restock signal fires.
    #[serde(default = "default_low_stock_floor")]
    pub low_stock_floor: usize,
    #[serde(default)]
    pub encoder: EncoderConfig,
}

/// Data directory for state files: `~/.skywave`, or the working directory
/// when no home is available.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".skywave"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_schedule_file() -> PathBuf {
    data_dir().join("schedule.json")
}

fn default_music_dirs() -> Vec<PathBuf> {
    vec![data_dir().join("music")]
}

fn default_segments_dir() -> PathBuf {
    data_dir().join("segments")
}

fn default_evergreen_file() -> PathBuf {
    data_dir().join("evergreen_station_id.mp3")
}

fn default_messages_file() -> PathBuf {
    data_dir().join("messages.json")
}

fn default_now_playing_file() -> PathBuf {
    data_dir().join("now_playing.json")
}

fn default_requests_file() -> PathBuf {
    data_dir().join("generation_requests.log")
}

fn default_history_file() -> PathBuf {
    data_dir().join("history.log")
}

fn default_inventory_state_file() -> PathBuf {
    data_dir().join("inventory_state.json")
}

fn default_command_file() -> PathBuf {
    data_dir().join("command.txt")
}

fn default_crossfade() -> f32 {
    0.5
}

fn default_lookback_plays() -> usize {
    50
}

fn default_lookback_minutes() -> i64 {
    240
}

fn default_low_stock_floor() -> usize {
    10
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            schedule_file: default_schedule_file(),
            music_dirs: default_music_dirs(),
            segments_dir: default_segments_dir(),
            podcasts_dir: None,
            evergreen_file: default_evergreen_file(),
            messages_file: default_messages_file(),
            now_playing_file: default_now_playing_file(),
            requests_file: default_requests_file(),
            history_file: default_history_file(),
            inventory_state_file: default_inventory_state_file(),
            command_file: default_command_file(),
            crossfade_secs: default_crossfade(),
            lookback_plays: default_lookback_plays(),
            lookback_minutes: default_lookback_minutes(),
            low_stock_floor: default_low_stock_floor(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl StationConfig {
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Load configuration. A missing file yields defaults; a malformed one
    /// is fatal — silent misconfiguration is worse than refusing to start.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(StationConfig::default());
        }
        let data = fs::read_to_string(path)
            .map_err(|e| format!("Cannot read config '{}': {}", path.display(), e))?;
        serde_json::from_str(&data)
            .map_err(|e| format!("Malformed config '{}': {}", path.display(), e))
    }

    /// Persist current configuration to JSON.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| format!("Serialize error: {}", e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Cannot create '{}': {}", parent.display(), e))?;
        }
        fs::write(path, json).map_err(|e| format!("Write error: {}", e))
    }
}
