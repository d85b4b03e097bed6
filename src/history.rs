use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// How many events the fast-access tail keeps in memory. The on-disk log
/// is unbounded; only this tail serves repeat-avoidance.
const MAX_RECENT: usize = 512;

/// What kind of unit a playback event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Track,
    Segment,
    Podcast,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitKind::Track => write!(f, "track"),
            UnitKind::Segment => write!(f, "segment"),
            UnitKind::Podcast => write!(f, "podcast"),
        }
    }
}

/// Immutable record of one fed unit. Appended strictly in feed order;
/// timestamps never decrease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub path: String,
    pub name: String,
    pub kind: UnitKind,
    pub timestamp: i64,
    pub show: String,
}

/// Variety statistics over a recent window.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    pub total: usize,
    pub unique: usize,
    /// unique / total (1.0 = no repeats at all).
    pub variety: f32,
    /// repeated plays / total.
    pub repeat_rate: f32,
}

/// Append-only playback history with a bounded in-memory tail.
///
/// The log file holds one JSON event per line. An unreadable log degrades
/// to an empty history (variety suffers, playback does not stop).
pub struct PlaybackHistory {
    log_path: Option<PathBuf>,
    recent: VecDeque<PlaybackEvent>,
    lookback_plays: usize,
    lookback_minutes: i64,
}

impl PlaybackHistory {
    /// Open history backed by a log file, loading the recent tail.
    pub fn open(path: &Path, lookback_plays: usize, lookback_minutes: i64) -> Self {
        let recent = load_tail(path);
        PlaybackHistory {
            log_path: Some(path.to_path_buf()),
            recent,
            lookback_plays,
            lookback_minutes,
        }
    }

    /// History with no backing file (tests, dry runs).
    pub fn in_memory(lookback_plays: usize, lookback_minutes: i64) -> Self {
        PlaybackHistory {
            log_path: None,
            recent: VecDeque::new(),
            lookback_plays,
            lookback_minutes,
        }
    }

    /// Append an event. Clamps the timestamp so the sequence stays
    /// monotonically increasing even if the wall clock steps backwards.
    pub fn record(&mut self, mut event: PlaybackEvent) {
        if let Some(last) = self.recent.back() {
            if event.timestamp < last.timestamp {
                event.timestamp = last.timestamp;
            }
        }
        if let Some(path) = &self.log_path {
            if let Err(e) = append_line(path, &event) {
                crate::log_warn(&format!("Could not append history: {}", e));
            }
        }
        self.recent.push_back(event);
        while self.recent.len() > MAX_RECENT {
            self.recent.pop_front();
        }
    }

    /// Hard repeat filter: was this unit fed within the lookback window?
    /// The window is the larger of the last N plays and the last T minutes.
    pub fn recently_played(&self, path: &Path, now_ts: i64) -> bool {
        let path = path.to_string_lossy();
        let cutoff = now_ts - self.lookback_minutes * 60;
        let by_time = self
            .recent
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .count();
        let window = self.lookback_plays.max(by_time);
        self.recent
            .iter()
            .rev()
            .take(window)
            .any(|e| e.path == path)
    }

    /// Was this unit fed within the given number of seconds? Used for the
    /// longer podcast rotation window.
    pub fn played_within(&self, path: &Path, secs: i64, now_ts: i64) -> bool {
        let path = path.to_string_lossy();
        let cutoff = now_ts - secs;
        self.recent
            .iter()
            .rev()
            .take_while(|e| e.timestamp >= cutoff)
            .any(|e| e.path == path)
    }

    /// Variety statistics over the last `window_minutes`.
    pub fn stats(&self, window_minutes: i64, now_ts: i64) -> HistoryStats {
        let cutoff = now_ts - window_minutes * 60;
        let events: Vec<&PlaybackEvent> = self
            .recent
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect();
        let total = events.len();
        let unique = {
            let mut paths: Vec<&str> = events.iter().map(|e| e.path.as_str()).collect();
            paths.sort_unstable();
            paths.dedup();
            paths.len()
        };
        let (variety, repeat_rate) = if total == 0 {
            (1.0, 0.0)
        } else {
            (
                unique as f32 / total as f32,
                (total - unique) as f32 / total as f32,
            )
        };
        HistoryStats {
            total,
            unique,
            variety,
            repeat_rate,
        }
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&PlaybackEvent> {
        self.recent.iter().rev().take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

fn append_line(path: &Path, event: &PlaybackEvent) -> Result<(), String> {
    let json = serde_json::to_string(event).map_err(|e| format!("serialize: {}", e))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("open '{}': {}", path.display(), e))?;
    writeln!(file, "{}", json).map_err(|e| format!("write '{}': {}", path.display(), e))
}

/// Load the recent tail from the log. A missing file is a fresh start; an
/// unreadable one degrades loudly to empty rather than stopping playback.
fn load_tail(path: &Path) -> VecDeque<PlaybackEvent> {
    if !path.exists() {
        return VecDeque::new();
    }
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            crate::log_warn(&format!(
                "History log '{}' unreadable, treating history as empty: {}",
                path.display(),
                e
            ));
            return VecDeque::new();
        }
    };
    let mut events = VecDeque::new();
    let mut bad_lines = 0usize;
    for line in data.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PlaybackEvent>(line) {
            Ok(event) => {
                events.push_back(event);
                if events.len() > MAX_RECENT {
                    events.pop_front();
                }
            }
            Err(_) => bad_lines += 1,
        }
    }
    if bad_lines > 0 {
        crate::log_warn(&format!(
            "History log '{}': skipped {} corrupt lines",
            path.display(),
            bad_lines
        ));
    }
    events
}
