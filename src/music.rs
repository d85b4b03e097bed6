use crate::schedule::MusicProfile;
use crate::track::Track;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supported audio extensions for library and inventory scans.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "aac", "m4a", "opus"];

/// Tracks longer than this are chopped to a window instead of played whole.
pub const MAX_TRACK_SECS: f32 = 150.0;
/// Minimum chopped window length.
pub const CHUNK_MIN_SECS: f32 = 90.0;
/// Maximum chopped window length.
pub const CHUNK_MAX_SECS: f32 = 150.0;

/// Energy/warmth/vibe classification of a music track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMood {
    /// 0.0 (ambient/quiet) to 1.0 (high energy/danceable).
    pub energy: f32,
    /// 0.0 (cold/electronic) to 1.0 (warm/organic).
    pub warmth: f32,
    /// Category tag for grouping and profile matching.
    pub vibe: String,
}

impl Default for TrackMood {
    fn default() -> Self {
        TrackMood {
            energy: 0.5,
            warmth: 0.5,
            vibe: "unknown".to_string(),
        }
    }
}

/// Keyword signatures mapping artists/genres found in a file path to a mood.
/// Longer matches win (more specific).
const MOOD_SIGNATURES: &[(&str, f32, f32, &str)] = &[
    ("ambient", 0.15, 0.5, "ambient"),
    ("brian eno", 0.1, 0.6, "ambient"),
    ("boards of canada", 0.25, 0.7, "ambient"),
    ("tycho", 0.3, 0.6, "ambient"),
    ("jazz", 0.35, 0.9, "jazz"),
    ("coltrane", 0.5, 0.9, "jazz"),
    ("miles davis", 0.4, 0.85, "jazz"),
    ("bill evans", 0.25, 0.95, "jazz"),
    ("thelonious monk", 0.4, 0.85, "jazz"),
    ("nujabes", 0.35, 0.8, "jazz"),
    ("classical", 0.25, 0.8, "classical"),
    ("chopin", 0.2, 0.9, "classical"),
    ("debussy", 0.2, 0.85, "classical"),
    ("satie", 0.15, 0.85, "classical"),
    ("bach", 0.3, 0.8, "classical"),
    ("soul", 0.5, 0.95, "soul"),
    ("al green", 0.45, 0.95, "soul"),
    ("marvin gaye", 0.5, 0.95, "soul"),
    ("stevie wonder", 0.6, 0.95, "soul"),
    ("sade", 0.35, 0.9, "soul_slow"),
    ("frank ocean", 0.35, 0.85, "soul_slow"),
    ("funk", 0.75, 0.85, "funk"),
    ("james brown", 0.8, 0.9, "funk"),
    ("parliament", 0.75, 0.85, "funk"),
    ("vulfpeck", 0.65, 0.9, "funk"),
    ("disco", 0.8, 0.7, "disco"),
    ("chic", 0.8, 0.75, "disco"),
    ("donna summer", 0.85, 0.7, "disco"),
    ("j dilla", 0.45, 0.85, "hiphop_chill"),
    ("tribe called quest", 0.55, 0.8, "hiphop_chill"),
    ("mf doom", 0.45, 0.7, "hiphop_chill"),
    ("kendrick", 0.65, 0.75, "hiphop"),
    ("outkast", 0.7, 0.8, "hiphop"),
    ("bossa", 0.3, 0.95, "bossa"),
    ("jobim", 0.3, 0.95, "bossa"),
    ("gilberto", 0.3, 0.95, "bossa"),
    ("dub", 0.4, 0.75, "dub"),
    ("king tubby", 0.4, 0.7, "dub"),
    ("augustus pablo", 0.35, 0.8, "dub"),
    ("downtempo", 0.35, 0.6, "downtempo"),
    ("massive attack", 0.45, 0.5, "downtempo"),
    ("portishead", 0.35, 0.4, "downtempo"),
    ("nightmares on wax", 0.4, 0.7, "downtempo"),
    ("lofi", 0.25, 0.7, "downtempo"),
    ("lo-fi", 0.25, 0.7, "downtempo"),
    ("radiohead", 0.5, 0.5, "indie"),
    ("beach house", 0.35, 0.6, "indie"),
    ("khruangbin", 0.45, 0.8, "indie"),
    ("bon iver", 0.3, 0.75, "indie"),
    ("electronic", 0.7, 0.3, "electronic"),
    ("techno", 0.8, 0.2, "electronic"),
    ("daft punk", 0.75, 0.5, "electronic"),
    ("four tet", 0.5, 0.55, "electronic_chill"),
    ("nicolas jaar", 0.45, 0.55, "electronic_chill"),
    ("world", 0.5, 0.9, "world"),
    ("fela kuti", 0.65, 0.9, "world"),
    ("tinariwen", 0.5, 0.85, "world"),
    ("mulatu", 0.45, 0.9, "world"),
    ("fairuz", 0.35, 0.95, "world"),
    ("rock", 0.7, 0.6, "rock"),
    ("pink floyd", 0.45, 0.6, "rock"),
    ("fleetwood mac", 0.55, 0.75, "rock"),
    ("steely dan", 0.5, 0.8, "rock"),
];

/// Classify a track from its file path against the keyword signatures.
/// Prefers the longest matching keyword; unknown paths get a neutral mood.
pub fn classify_path(path: &Path) -> TrackMood {
    let name = path.to_string_lossy().to_lowercase();
    let mut best: Option<&(&str, f32, f32, &str)> = None;
    for sig in MOOD_SIGNATURES {
        if name.contains(sig.0) {
            match best {
                Some(b) if sig.0.len() <= b.0.len() => {}
                _ => best = Some(sig),
            }
        }
    }
    match best {
        Some(&(_, energy, warmth, vibe)) => TrackMood {
            energy,
            warmth,
            vibe: vibe.to_string(),
        },
        None => TrackMood::default(),
    }
}

/// Collect audio files under a directory, optionally recursing.
pub fn collect_audio_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    stack.push(path);
                }
                continue;
            }
            let ext = match path.extension() {
                Some(e) => e.to_string_lossy().to_lowercase(),
                None => continue,
            };
            if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Score how well a track fits a show's music profile.
/// Energy fit up to 40 points, warmth fit up to 30, vibe match up to 30,
/// plus a small random factor for variety.
pub fn score_track(track: &Track, profile: &MusicProfile) -> f32 {
    let mood = &track.mood;
    let mut score = 0.0;

    let [min_energy, max_energy] = profile.energy_range;
    if mood.energy >= min_energy && mood.energy <= max_energy {
        score += 40.0;
    } else if mood.energy < min_energy {
        score += (30.0 - (min_energy - mood.energy) * 50.0).max(0.0);
    } else {
        score += (30.0 - (mood.energy - max_energy) * 50.0).max(0.0);
    }

    let warmth_diff = (mood.warmth - profile.prefer_warmth).abs();
    score += (30.0 - warmth_diff * 40.0).max(0.0);

    if let Some(idx) = profile.vibes.iter().position(|v| v == &mood.vibe) {
        score += 30.0 - (idx as f32 * 3.0);
    }

    score + fastrand::f32() * 10.0
}

/// The external music library, scanned from configured directories.
pub struct MusicLibrary {
    tracks: Vec<Track>,
}

impl MusicLibrary {
    /// Scan the configured music directories. Unreadable files are skipped
    /// with a single summary warning; the library owns no files.
    pub fn scan(dirs: &[PathBuf]) -> Self {
        let mut tracks = Vec::new();
        let mut skipped = 0usize;
        for dir in dirs {
            let files = collect_audio_files(dir, true);
            crate::log_line(&format!("Found {} tracks in {}", files.len(), dir.display()));
            for file in files {
                match Track::from_path(&file) {
                    Ok(t) => tracks.push(t),
                    Err(_) => skipped += 1,
                }
            }
        }
        if skipped > 0 {
            crate::log_warn(&format!("Skipped {} unreadable music files", skipped));
        }
        MusicLibrary { tracks }
    }

    /// Build a library from pre-made tracks (tests, fixtures).
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        MusicLibrary { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Pick the next track for a profile. `recently_played` is the history
    /// filter; when it leaves too few candidates the filter is relaxed so a
    /// thin library still rotates instead of stalling. Avoids repeating the
    /// previous vibe back-to-back when an alternative scores close.
    pub fn pick(
        &self,
        profile: &MusicProfile,
        recently_played: &dyn Fn(&Path) -> bool,
        last_vibe: Option<&str>,
    ) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }

        let mut fresh: Vec<&Track> = self
            .tracks
            .iter()
            .filter(|t| !recently_played(&t.path))
            .collect();
        if fresh.len() < 3 {
            fresh = self.tracks.iter().collect();
        }

        let mut scored: Vec<(&Track, f32)> = fresh
            .into_iter()
            .map(|t| (t, score_track(t, profile)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Choose among the top candidates, dodging a repeated vibe when we can.
        let pool = scored.len().min(8);
        let top = &scored[..pool];
        if let Some(last) = last_vibe {
            let different: Vec<&(&Track, f32)> =
                top.iter().filter(|(t, _)| t.mood.vibe != last).collect();
            if !different.is_empty() {
                let idx = fastrand::usize(..different.len());
                return Some(different[idx].0.clone());
            }
        }
        let idx = fastrand::usize(..pool);
        Some(top[idx].0.clone())
    }
}

/// For tracks longer than the chop threshold, pick a random playback window
/// `(start_secs, length_secs)`. The first ten seconds are skipped (often an
/// intro) and a ten-second buffer is left at the end.
pub fn chop_window(duration: Duration) -> Option<(f32, f32)> {
    let total = duration.as_secs_f32();
    if total <= MAX_TRACK_SECS {
        return None;
    }
    let length = CHUNK_MIN_SECS + fastrand::f32() * (CHUNK_MAX_SECS - CHUNK_MIN_SECS);
    let max_start = total - length - 10.0;
    let start = if max_start > 10.0 {
        10.0 + fastrand::f32() * (max_start - 10.0)
    } else {
        0.0
    };
    Some((start, length))
}
