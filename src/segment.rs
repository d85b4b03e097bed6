use crate::bucket::TimeBucket;
use crate::music::collect_audio_files;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A unit older than this with no recent play no longer counts as "fresh"
/// for low-stock purposes.
const STALE_AFTER_SECS: i64 = 24 * 3600;

/// Kind of a pre-produced spoken-audio artifact, parsed from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    StationId,
    HourMarker,
    SongIntro,
    Dedication,
    Weather,
    Reflection,
    Transition,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 7] = [
        SegmentKind::StationId,
        SegmentKind::HourMarker,
        SegmentKind::SongIntro,
        SegmentKind::Dedication,
        SegmentKind::Weather,
        SegmentKind::Reflection,
        SegmentKind::Transition,
    ];

    /// Filename token identifying this kind (e.g. `station_id_003.mp3`).
    pub fn token(&self) -> &'static str {
        match self {
            SegmentKind::StationId => "station_id",
            SegmentKind::HourMarker => "hour_marker",
            SegmentKind::SongIntro => "song_intro",
            SegmentKind::Dedication => "dedication",
            SegmentKind::Weather => "weather",
            SegmentKind::Reflection => "reflection",
            SegmentKind::Transition => "transition",
        }
    }

    /// Extract the kind from a filename. Longest token match wins so that
    /// e.g. a file named `weather_dedication` is not misread.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        SegmentKind::ALL
            .iter()
            .filter(|k| lower.contains(k.token()))
            .max_by_key(|k| k.token().len())
            .copied()
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// A spoken-audio artifact on disk. Created by the external generation
/// pipeline; only play counters are mutated here, never the file.
#[derive(Debug, Clone)]
pub struct SegmentUnit {
    pub path: PathBuf,
    pub kind: SegmentKind,
    pub bucket: TimeBucket,
    /// File mtime (unix seconds) — creation order for rotation.
    pub created: i64,
    pub play_count: u32,
    pub last_played: Option<i64>,
    /// Set when the backing file failed to open; cleared by rescan.
    pub missing: bool,
}

impl SegmentUnit {
    /// On-air display name for the status snapshot.
    pub fn display_name(&self) -> String {
        match self.kind {
            SegmentKind::StationId => "Station ID".to_string(),
            SegmentKind::HourMarker => "The Top of the Hour".to_string(),
            SegmentKind::SongIntro => "Song Intro".to_string(),
            SegmentKind::Dedication => "Dedication".to_string(),
            SegmentKind::Weather => "Conditions Report".to_string(),
            SegmentKind::Reflection => "Late Night Reflection".to_string(),
            SegmentKind::Transition => "Transmission".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PlayState {
    play_count: u32,
    last_played: Option<i64>,
}

/// Advisory restock request emitted when a bucket runs low. Consumed
/// asynchronously by the external generation pipeline; never awaited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub bucket: TimeBucket,
    pub kind: SegmentKind,
    pub count_needed: usize,
    pub requested_at: i64,
}

/// Inventory of spoken segments, organized on disk as
/// `segments/<bucket>/<kind>_*.<ext>`. File existence is the source of
/// truth for availability; play counters persist across restarts in a
/// JSON state file keyed by path.
#[derive(Debug)]
pub struct SegmentInventory {
    root: PathBuf,
    state_path: PathBuf,
    evergreen: PathBuf,
    low_stock_floor: usize,
    units: Vec<SegmentUnit>,
    state: HashMap<String, PlayState>,
}

impl SegmentInventory {
    /// Open the inventory. The reserved evergreen unit must exist — a
    /// station without its terminal fallback refuses to start.
    pub fn open(
        root: &Path,
        state_path: &Path,
        evergreen: &Path,
        low_stock_floor: usize,
    ) -> Result<Self, String> {
        if !evergreen.is_file() {
            return Err(format!(
                "Evergreen fallback unit missing: '{}'",
                evergreen.display()
            ));
        }
        let state = load_state(state_path);
        let mut inv = SegmentInventory {
            root: root.to_path_buf(),
            state_path: state_path.to_path_buf(),
            evergreen: evergreen.to_path_buf(),
            low_stock_floor,
            units: Vec::new(),
            state,
        };
        inv.rescan();
        Ok(inv)
    }

    /// Re-walk the inventory directories. Units whose files reappeared are
    /// re-verified (the missing flag does not survive a rescan).
    pub fn rescan(&mut self) {
        let mut units = Vec::new();
        for bucket in TimeBucket::ALL {
            let dir = self.root.join(bucket.dir_name());
            for path in collect_audio_files(&dir, false) {
                let name = match path.file_name() {
                    Some(n) => n.to_string_lossy().to_string(),
                    None => continue,
                };
                let kind = match SegmentKind::from_name(&name) {
                    Some(k) => k,
                    None => continue,
                };
                let created = file_mtime(&path);
                let st = self
                    .state
                    .get(&path.to_string_lossy().to_string())
                    .cloned()
                    .unwrap_or_default();
                units.push(SegmentUnit {
                    path,
                    kind,
                    bucket,
                    created,
                    play_count: st.play_count,
                    last_played: st.last_played,
                    missing: false,
                });
            }
        }
        self.units = units;
    }

    /// Eligible units for a bucket (and optionally a kind), ordered by
    /// fitness: never-played first, then least-recently-played, then fewest
    /// total plays. The chain guarantees eventual rotation through the full
    /// inventory rather than starvation of older units.
    pub fn eligible(&self, bucket: TimeBucket, kind: Option<SegmentKind>) -> Vec<&SegmentUnit> {
        let mut matches: Vec<&SegmentUnit> = self
            .units
            .iter()
            .filter(|u| !u.missing && u.bucket == bucket && kind.is_none_or(|k| u.kind == k))
            .collect();
        matches.sort_by_key(|u| {
            (
                u.play_count > 0,
                u.last_played.unwrap_or(u.created),
                u.play_count,
            )
        });
        matches
    }

    /// Record a successful play. Counters persist so rotation order
    /// survives restarts.
    pub fn record_play(&mut self, path: &Path, now_ts: i64) {
        if let Some(unit) = self.units.iter_mut().find(|u| u.path == path) {
            unit.play_count += 1;
            unit.last_played = Some(now_ts);
        }
        let entry = self
            .state
            .entry(path.to_string_lossy().to_string())
            .or_default();
        entry.play_count += 1;
        entry.last_played = Some(now_ts);
        self.save_state();
    }

    /// Exclude a unit whose backing file failed to open. It stays excluded
    /// until a rescan sees the file again.
    pub fn mark_missing(&mut self, path: &Path) {
        if let Some(unit) = self.units.iter_mut().find(|u| u.path == path) {
            unit.missing = true;
        }
    }

    /// True when the bucket's fresh (unplayed or not-recently-played) count
    /// has fallen below the configured floor. Advisory output only; the
    /// core never blocks waiting for new inventory.
    pub fn low_stock(&self, bucket: TimeBucket, now_ts: i64) -> bool {
        self.fresh_count(bucket, now_ts) < self.low_stock_floor
    }

    fn fresh_count(&self, bucket: TimeBucket, now_ts: i64) -> usize {
        self.units
            .iter()
            .filter(|u| !u.missing && u.bucket == bucket)
            .filter(|u| match u.last_played {
                None => true,
                Some(ts) => now_ts - ts >= STALE_AFTER_SECS,
            })
            .count()
    }

    /// (total, fresh) counts per bucket for the status snapshot.
    pub fn counts(&self, now_ts: i64) -> Vec<(TimeBucket, usize, usize)> {
        TimeBucket::ALL
            .iter()
            .map(|&b| {
                let total = self
                    .units
                    .iter()
                    .filter(|u| !u.missing && u.bucket == b)
                    .count();
                (b, total, self.fresh_count(b, now_ts))
            })
            .collect()
    }

    /// Build a restock request for the most depleted kind of a bucket.
    pub fn restock_request(&self, bucket: TimeBucket, now_ts: i64) -> GenerationRequest {
        let kind = SegmentKind::ALL
            .iter()
            .filter(|k| **k != SegmentKind::Transition)
            .min_by_key(|k| self.eligible(bucket, Some(**k)).len())
            .copied()
            .unwrap_or(SegmentKind::StationId);
        let have = self.fresh_count(bucket, now_ts);
        GenerationRequest {
            bucket,
            kind,
            count_needed: self.low_stock_floor.saturating_sub(have),
            requested_at: now_ts,
        }
    }

    /// The reserved always-available station-ID unit, used when no
    /// category-specific unit exists. Never silence.
    pub fn evergreen_unit(&self, bucket: TimeBucket) -> SegmentUnit {
        SegmentUnit {
            path: self.evergreen.clone(),
            kind: SegmentKind::StationId,
            bucket,
            created: 0,
            play_count: 0,
            last_played: None,
            missing: false,
        }
    }

    pub fn evergreen_path(&self) -> &Path {
        &self.evergreen
    }

    fn save_state(&self) {
        match serde_json::to_string_pretty(&self.state) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.state_path, json) {
                    crate::log_warn(&format!("Could not save inventory state: {}", e));
                }
            }
            Err(e) => crate::log_warn(&format!("Could not serialize inventory state: {}", e)),
        }
    }
}

fn load_state(path: &Path) -> HashMap<String, PlayState> {
    if !path.exists() {
        return HashMap::new();
    }
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(state) => state,
            Err(e) => {
                crate::log_warn(&format!(
                    "Corrupt inventory state '{}', starting fresh: {}",
                    path.display(),
                    e
                ));
                HashMap::new()
            }
        },
        Err(e) => {
            crate::log_warn(&format!("Could not read inventory state: {}", e));
            HashMap::new()
        }
    }
}

/// File mtime as unix seconds (0 when unavailable).
pub fn file_mtime(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
