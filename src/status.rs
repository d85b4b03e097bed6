use crate::bucket::TimeBucket;
use crate::history::UnitKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Most degraded-condition notes kept in the snapshot.
const MAX_DEGRADED_NOTES: usize = 20;
/// Recent plays carried in the snapshot.
const MAX_RECENT_PLAYS: usize = 20;

/// One recently fed unit, for the status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentPlay {
    pub name: String,
    pub kind: UnitKind,
    pub timestamp: i64,
}

/// Inventory counts for one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketCount {
    pub bucket: TimeBucket,
    pub total: usize,
    pub fresh: usize,
}

/// Read-only snapshot of the stream state, for health checks and logging
/// tooling. Built by the decision loop; readers only ever see clones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationStatus {
    pub show_id: String,
    pub show_name: String,
    pub bucket: Option<TimeBucket>,
    pub now_playing: Option<String>,
    pub unit_kind: Option<UnitKind>,
    /// Unix timestamp of the last completed feed.
    pub last_fed: Option<i64>,
    pub encoder_connected: bool,
    pub inventory: Vec<BucketCount>,
    pub recent: Vec<RecentPlay>,
    pub degraded: Vec<String>,
}

/// Shared status cell. The station loop is the only writer; concurrent
/// readers (health check, CLI) take cloned snapshots and never hold the
/// lock across any other work.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<StationStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        StatusBoard::default()
    }

    /// Mutate the status from the station loop.
    pub fn update(&self, f: impl FnOnce(&mut StationStatus)) {
        if let Ok(mut status) = self.inner.lock() {
            f(&mut status);
        }
    }

    /// Clone the current status. Never blocks the writer beyond the copy.
    pub fn snapshot(&self) -> StationStatus {
        self.inner
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Record a degraded-but-live condition (bounded list, newest last).
    pub fn note_degraded(&self, note: &str) {
        let stamped = format!(
            "{} {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            note
        );
        self.update(|s| {
            s.degraded.push(stamped);
            if s.degraded.len() > MAX_DEGRADED_NOTES {
                let excess = s.degraded.len() - MAX_DEGRADED_NOTES;
                s.degraded.drain(..excess);
            }
        });
    }

    /// Push a recent play onto the snapshot (bounded, newest first).
    pub fn note_play(&self, play: RecentPlay) {
        self.update(|s| {
            s.recent.insert(0, play);
            s.recent.truncate(MAX_RECENT_PLAYS);
        });
    }

    /// Export the snapshot to a JSON file (atomic replace).
    pub fn export(&self, path: &Path) -> Result<(), String> {
        write_json_atomic(path, &self.snapshot())
    }
}

/// Write JSON atomically (temp file + rename) to avoid partial reads by
/// external consumers.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| format!("Serialize error: {}", e))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| format!("Cannot create '{}': {}", parent.display(), e))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("Invalid export path '{}'", path.display()))?;
    let tmp = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp, json).map_err(|e| format!("Write '{}': {}", tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| format!("Rename to '{}': {}", path.display(), e))
}
