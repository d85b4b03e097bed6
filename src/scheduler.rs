//! The continuous decision loop's brain: given the current time, the active
//! show, recent history, and available inventory, decide the next unit.
//!
//! All entry points take `now` explicitly so every rule is testable with an
//! injected clock. The scheduler never stalls: every tick yields a unit,
//! degrading through category fallbacks down to the reserved evergreen.

use crate::bucket::TimeBucket;
use crate::history::{PlaybackEvent, PlaybackHistory, UnitKind};
use crate::messages::MessageStore;
use crate::music::{chop_window, collect_audio_files, MusicLibrary};
use crate::schedule::{ActiveShow, StationSchedule};
use crate::segment::{file_mtime, SegmentInventory, SegmentKind, SegmentUnit};
use crate::track::Track;
use chrono::{NaiveDateTime, Timelike};
use std::path::{Path, PathBuf};

/// Rolling per-hour spoken-category targets.
pub const SONG_INTRO_TARGET: u32 = 4;
pub const STATION_ID_TARGET: u32 = 3;
pub const HOUR_MARKER_TARGET: u32 = 1;
pub const DEDICATION_TARGET: u32 = 1;
pub const REFLECTION_TARGET: u32 = 1;
/// Weather at most once per this many hours.
pub const WEATHER_EVERY_HOURS: i64 = 3;
/// A podcast is not repeated within this window.
const PODCAST_REPEAT_SECS: i64 = 24 * 3600;

/// Budgeted categories in deficit tie-break order (highest priority first).
pub const CATEGORY_PRIORITY: [SegmentKind; 6] = [
    SegmentKind::HourMarker,
    SegmentKind::StationId,
    SegmentKind::SongIntro,
    SegmentKind::Dedication,
    SegmentKind::Weather,
    SegmentKind::Reflection,
];

fn slot(kind: SegmentKind) -> Option<usize> {
    CATEGORY_PRIORITY.iter().position(|&k| k == kind)
}

/// Per-hour emission ledger. Rolls at each hour boundary; the category with
/// the largest (target − emitted) deficit is picked next, ties broken by
/// the fixed priority order above.
#[derive(Debug, Clone, Default)]
pub struct HourBudget {
    hour_key: Option<i64>,
    emitted: [u32; 6],
    /// Dedications borrowed from future hours (listener-message overdraft).
    debt: u32,
    /// Dedication budget withheld this hour to repay debt.
    withheld: u32,
    hour_marker_due: bool,
}

impl HourBudget {
    /// Advance to the hour containing `hour_key`. Crossing a boundary
    /// resets the ledger, applies dedication debt, and makes the hour
    /// marker due. Returns true when a boundary was crossed.
    pub fn roll(&mut self, hour_key: i64) -> bool {
        if self.hour_key == Some(hour_key) {
            return false;
        }
        let first = self.hour_key.is_none();
        self.hour_key = Some(hour_key);
        self.emitted = [0; 6];
        self.withheld = self.debt.min(DEDICATION_TARGET);
        self.debt -= self.withheld;
        if !first {
            self.hour_marker_due = true;
        }
        !first
    }

    pub fn hour_marker_due(&self) -> bool {
        self.hour_marker_due
    }

    pub fn clear_hour_marker_due(&mut self) {
        self.hour_marker_due = false;
    }

    pub fn emitted(&self, kind: SegmentKind) -> u32 {
        slot(kind).map(|i| self.emitted[i]).unwrap_or(0)
    }

    pub fn note_emitted(&mut self, kind: SegmentKind) {
        if let Some(i) = slot(kind) {
            self.emitted[i] += 1;
        }
        if kind == SegmentKind::HourMarker {
            self.hour_marker_due = false;
        }
    }

    /// This hour's dedication allowance after debt repayment.
    pub fn dedication_allowance(&self) -> u32 {
        DEDICATION_TARGET.saturating_sub(self.withheld)
    }

    /// Record a dedication emitted beyond the hour's allowance; the excess
    /// is repaid out of the next hour's target.
    pub fn note_overdraft(&mut self) {
        self.debt += 1;
    }

    fn target(&self, kind: SegmentKind, bucket: TimeBucket, weather_ok: bool, unread: bool) -> u32 {
        match kind {
            SegmentKind::HourMarker => HOUR_MARKER_TARGET,
            SegmentKind::StationId => STATION_ID_TARGET,
            SegmentKind::SongIntro => SONG_INTRO_TARGET,
            SegmentKind::Dedication => {
                let nominal = self.dedication_allowance();
                if unread {
                    // A waiting listener message always justifies one more.
                    nominal.max(self.emitted(kind) + 1)
                } else {
                    nominal
                }
            }
            SegmentKind::Weather => u32::from(weather_ok),
            SegmentKind::Reflection => {
                if bucket == TimeBucket::LateNight {
                    REFLECTION_TARGET
                } else {
                    0
                }
            }
            SegmentKind::Transition => 0,
        }
    }

    /// Category with the largest positive deficit, excluding `exclude`.
    pub fn pick_category(
        &self,
        bucket: TimeBucket,
        weather_ok: bool,
        unread: bool,
        exclude: &[SegmentKind],
    ) -> Option<SegmentKind> {
        let mut best: Option<(SegmentKind, i64)> = None;
        for (i, &kind) in CATEGORY_PRIORITY.iter().enumerate() {
            if exclude.contains(&kind) {
                continue;
            }
            let deficit = self.target(kind, bucket, weather_ok, unread) as i64 - self.emitted[i] as i64;
            if deficit <= 0 {
                continue;
            }
            match best {
                // Strict comparison keeps the earlier (higher priority)
                // category on ties.
                Some((_, d)) if d >= deficit => {}
                _ => best = Some((kind, deficit)),
            }
        }
        best.map(|(k, _)| k)
    }
}

/// What to feed next. Every tick produces exactly one of these.
#[derive(Debug, Clone)]
pub enum Decision {
    Music {
        track: Track,
        /// (start_secs, length_secs) window for chopped long tracks.
        window: Option<(f32, f32)>,
    },
    Spoken {
        unit: SegmentUnit,
        /// Listener message index this dedication answers, to mark read.
        message: Option<usize>,
    },
    Podcast {
        path: PathBuf,
    },
    /// Reserved always-available fallback. The stream is never silent.
    Evergreen {
        unit: SegmentUnit,
    },
}

impl Decision {
    pub fn path(&self) -> &Path {
        match self {
            Decision::Music { track, .. } => &track.path,
            Decision::Spoken { unit, .. } => &unit.path,
            Decision::Podcast { path } => path,
            Decision::Evergreen { unit } => &unit.path,
        }
    }

    pub fn unit_kind(&self) -> UnitKind {
        match self {
            Decision::Music { .. } => UnitKind::Track,
            Decision::Podcast { .. } => UnitKind::Podcast,
            Decision::Spoken { .. } | Decision::Evergreen { .. } => UnitKind::Segment,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Decision::Music { track, .. } => track.display_name(),
            Decision::Spoken { unit, .. } => unit.display_name(),
            Decision::Podcast { path } => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Podcast".to_string()),
            Decision::Evergreen { .. } => "Station ID".to_string(),
        }
    }
}

/// The core decision state machine. Owns inventory, history, library, and
/// message access; mutated only by the single station loop.
pub struct PlaybackScheduler {
    schedule: StationSchedule,
    pub inventory: SegmentInventory,
    pub library: MusicLibrary,
    pub history: PlaybackHistory,
    pub messages: MessageStore,
    podcasts_dir: Option<PathBuf>,
    budget: HourBudget,
    current: Option<ActiveShow>,
    cached_minute: Option<i64>,
    transition_due: bool,
    force_spoken: bool,
    tracks_since_segment: u32,
    last_weather_ts: Option<i64>,
    last_podcast_hour: Option<i64>,
    last_vibe: Option<String>,
}

impl PlaybackScheduler {
    pub fn new(
        schedule: StationSchedule,
        inventory: SegmentInventory,
        library: MusicLibrary,
        history: PlaybackHistory,
        messages: MessageStore,
        podcasts_dir: Option<PathBuf>,
    ) -> Self {
        PlaybackScheduler {
            schedule,
            inventory,
            library,
            history,
            messages,
            podcasts_dir,
            budget: HourBudget::default(),
            current: None,
            cached_minute: None,
            transition_due: false,
            force_spoken: false,
            tracks_since_segment: 0,
            last_weather_ts: None,
            last_podcast_hour: None,
            last_vibe: None,
        }
    }

    pub fn current_show(&self) -> Option<&ActiveShow> {
        self.current.as_ref()
    }

    pub fn schedule(&self) -> &StationSchedule {
        &self.schedule
    }

    /// Swap in a freshly loaded (already validated) schedule.
    pub fn replace_schedule(&mut self, schedule: StationSchedule) {
        self.schedule = schedule;
        self.cached_minute = None;
    }

    /// Operator request: play a spoken unit at the next boundary.
    pub fn force_segment(&mut self) {
        self.force_spoken = true;
    }

    /// Resolve the active show, cached until the minute changes. A show
    /// change queues a boundary cue for the next unit slot.
    fn resolve_cached(&mut self, now: NaiveDateTime) -> Option<ActiveShow> {
        let minute_key = now.and_utc().timestamp().div_euclid(60);
        if self.cached_minute == Some(minute_key) && self.current.is_some() {
            return self.current.clone();
        }
        self.cached_minute = Some(minute_key);
        match self.schedule.resolve(now) {
            Ok(active) => {
                if let Some(cur) = &self.current {
                    if cur.id != active.id {
                        crate::log_line(&format!(
                            "Show transition: {} -> {}",
                            cur.show.name, active.show.name
                        ));
                        self.transition_due = true;
                    }
                }
                self.current = Some(active.clone());
                Some(active)
            }
            Err(e) => {
                crate::log_warn(&e);
                self.current.clone()
            }
        }
    }

    /// One decision tick. Never stalls: the worst case is the evergreen.
    pub fn tick(&mut self, now: NaiveDateTime) -> Decision {
        let ts = now.and_utc().timestamp();
        let active = match self.resolve_cached(now) {
            Some(a) => a,
            None => {
                // Validated schedules always resolve; keep the stream alive
                // regardless.
                let bucket = TimeBucket::from_hour(now.hour());
                return Decision::Evergreen {
                    unit: self.inventory.evergreen_unit(bucket),
                };
            }
        };
        let bucket = active.show.bucket;
        self.budget.roll(ts.div_euclid(3600));

        // Show boundary cue at the first unit slot after the change —
        // never mid-unit, since ticks only happen between units.
        if self.transition_due {
            self.transition_due = false;
            if let Some(unit) = self.pick_segment(bucket, SegmentKind::Transition, ts, false) {
                return Decision::Spoken {
                    unit,
                    message: None,
                };
            }
            if let Some(unit) = self.pick_segment(bucket, SegmentKind::StationId, ts, false) {
                return Decision::Spoken {
                    unit,
                    message: None,
                };
            }
            if self.inventory.eligible(bucket, None).is_empty() {
                // Transition and hard inventory failure coincide: terminal
                // fallback, never empty output.
                return Decision::Evergreen {
                    unit: self.inventory.evergreen_unit(bucket),
                };
            }
        }

        // Scheduled long-form slot.
        if let Some(path) = self.podcast_due(&active, now, ts) {
            return Decision::Podcast { path };
        }

        // Spoken unit, when pacing allows or something is overdue.
        let unread = self.messages.next_unread().map(|(i, _)| i);
        let dedication_ready = unread.is_some()
            && !self
                .inventory
                .eligible(bucket, Some(SegmentKind::Dedication))
                .is_empty();
        let spoken_due = self.force_spoken
            || self.budget.hour_marker_due()
            || dedication_ready
            || self.tracks_since_segment >= active.show.segment_after_tracks;
        let mut spoken_attempted = false;
        if spoken_due {
            spoken_attempted = true;
            let marker_attempt = self.budget.hour_marker_due();
            let decision = self.pick_spoken(bucket, ts, unread.filter(|_| dedication_ready));
            if marker_attempt {
                // One forced attempt per boundary; the deficit keeps the
                // marker prioritized if inventory shows up later.
                self.budget.clear_hour_marker_due();
            }
            if let Some(decision) = decision {
                return decision;
            }
        }

        // Music filtered by the show's energy profile and recent history.
        let history = &self.history;
        if let Some(track) = self.library.pick(
            &active.show.music,
            &|path| history.recently_played(path, ts),
            self.last_vibe.as_deref(),
        ) {
            let window = chop_window(track.duration);
            return Decision::Music { track, window };
        }

        // No eligible music: spoken units fill the airtime even though the
        // pacing interval has not elapsed.
        if !spoken_attempted {
            if let Some(decision) =
                self.pick_spoken(bucket, ts, unread.filter(|_| dedication_ready))
            {
                return decision;
            }
        }

        // Nothing eligible in any category: reserved fallback, never silence.
        Decision::Evergreen {
            unit: self.inventory.evergreen_unit(bucket),
        }
    }

    /// Walk the deficit chain until a category has an eligible unit. The
    /// hour marker outranks the deficit comparison entirely, and a waiting
    /// listener message tries the dedication category first.
    fn pick_spoken(
        &mut self,
        bucket: TimeBucket,
        ts: i64,
        unread: Option<usize>,
    ) -> Option<Decision> {
        if self.budget.hour_marker_due() {
            if let Some(unit) = self.pick_segment(bucket, SegmentKind::HourMarker, ts, false) {
                return Some(Decision::Spoken {
                    unit,
                    message: None,
                });
            }
        }

        if let Some(idx) = unread {
            if let Some(unit) = self.pick_segment(bucket, SegmentKind::Dedication, ts, true) {
                return Some(Decision::Spoken {
                    unit,
                    message: Some(idx),
                });
            }
        }

        let weather_ok = match self.last_weather_ts {
            None => true,
            Some(last) => ts - last >= WEATHER_EVERY_HOURS * 3600,
        };
        let mut excluded: Vec<SegmentKind> = vec![];
        while let Some(kind) =
            self.budget
                .pick_category(bucket, weather_ok, unread.is_some(), &excluded)
        {
            if let Some(unit) = self.pick_segment(bucket, kind, ts, false) {
                return Some(Decision::Spoken {
                    unit,
                    message: None,
                });
            }
            excluded.push(kind);
        }
        None
    }

    /// Best segment of a kind for a bucket: fitness-ordered, minus recent
    /// repeats. When every candidate was played recently the
    /// least-recently-played one is returned anyway — a thin bucket rotates
    /// rather than stalls. `prefer_newest` biases toward freshly generated
    /// content (listener dedications).
    fn pick_segment(
        &self,
        bucket: TimeBucket,
        kind: SegmentKind,
        ts: i64,
        prefer_newest: bool,
    ) -> Option<SegmentUnit> {
        let candidates = self.inventory.eligible(bucket, Some(kind));
        if candidates.is_empty() {
            return None;
        }
        if prefer_newest {
            if let Some(unit) = candidates
                .iter()
                .filter(|u| u.play_count == 0)
                .max_by_key(|u| u.created)
            {
                return Some((*unit).clone());
            }
        }
        candidates
            .iter()
            .find(|u| !self.history.recently_played(&u.path, ts))
            .or_else(|| candidates.first())
            .map(|u| (*u).clone())
    }

    /// Newest podcast not heard in the rotation window, when the current
    /// hour is a podcast slot the show participates in.
    fn podcast_due(&self, active: &ActiveShow, now: NaiveDateTime, ts: i64) -> Option<PathBuf> {
        if !active.show.podcasts_enabled {
            return None;
        }
        let dir = self.podcasts_dir.as_ref()?;
        if !self.schedule.podcast_hours.contains(&now.hour()) {
            return None;
        }
        if self.last_podcast_hour == Some(ts.div_euclid(3600)) {
            return None;
        }
        let mut files = collect_audio_files(dir, false);
        files.sort_by_key(|p| std::cmp::Reverse(file_mtime(p)));
        files
            .into_iter()
            .find(|p| !self.history.played_within(p, PODCAST_REPEAT_SECS, ts))
    }

    /// Post-feed bookkeeping. Called only after the unit actually went out
    /// (completed or cleanly truncated), strictly in feed order, so
    /// PlaybackEvents are never reordered.
    pub fn confirm(&mut self, decision: &Decision, now: NaiveDateTime) {
        let ts = now.and_utc().timestamp();
        let show = self
            .current
            .as_ref()
            .map(|a| a.id.clone())
            .unwrap_or_default();
        match decision {
            Decision::Music { track, .. } => {
                self.history.record(PlaybackEvent {
                    path: track.path.to_string_lossy().to_string(),
                    name: track.display_name(),
                    kind: UnitKind::Track,
                    timestamp: ts,
                    show,
                });
                self.tracks_since_segment += 1;
                self.last_vibe = Some(track.mood.vibe.clone());
            }
            Decision::Spoken { unit, message } => {
                self.inventory.record_play(&unit.path, ts);
                self.history.record(PlaybackEvent {
                    path: unit.path.to_string_lossy().to_string(),
                    name: unit.display_name(),
                    kind: UnitKind::Segment,
                    timestamp: ts,
                    show,
                });
                self.tracks_since_segment = 0;
                self.force_spoken = false;
                if unit.kind == SegmentKind::Weather {
                    self.last_weather_ts = Some(ts);
                }
                if unit.kind == SegmentKind::Dedication
                    && self.budget.emitted(SegmentKind::Dedication)
                        >= self.budget.dedication_allowance()
                {
                    self.budget.note_overdraft();
                }
                self.budget.note_emitted(unit.kind);
                if let Some(idx) = message {
                    if let Err(e) = self.messages.mark_read(*idx) {
                        crate::log_warn(&format!("Could not mark message read: {}", e));
                    }
                }
            }
            Decision::Podcast { path } => {
                self.history.record(PlaybackEvent {
                    path: path.to_string_lossy().to_string(),
                    name: decision.display_name(),
                    kind: UnitKind::Podcast,
                    timestamp: ts,
                    show,
                });
                self.last_podcast_hour = Some(ts.div_euclid(3600));
                self.tracks_since_segment = 0;
            }
            Decision::Evergreen { unit } => {
                self.history.record(PlaybackEvent {
                    path: unit.path.to_string_lossy().to_string(),
                    name: "Station ID".to_string(),
                    kind: UnitKind::Segment,
                    timestamp: ts,
                    show,
                });
                self.tracks_since_segment = 0;
                self.force_spoken = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::TrackMood;
    use crate::schedule::{MusicProfile, ScheduleBlock, Show};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::fs;
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        scheduler: PlaybackScheduler,
    }

    fn profile() -> MusicProfile {
        MusicProfile {
            energy_range: [0.0, 1.0],
            prefer_warmth: 0.5,
            vibes: vec!["jazz".to_string()],
        }
    }

    fn show(name: &str, bucket: TimeBucket, pacing: u32) -> Show {
        Show {
            name: name.to_string(),
            description: String::new(),
            bucket,
            voice: "operator".to_string(),
            segment_after_tracks: pacing,
            podcasts_enabled: true,
            music: profile(),
        }
    }

    /// Two shows: "night" (late_night) 22:00–06:00 and "day" (afternoon)
    /// 06:00–22:00. No overrides, podcast hours empty unless set.
    fn schedule() -> StationSchedule {
        let mut shows = HashMap::new();
        shows.insert("night".to_string(), show("Night", TimeBucket::LateNight, 2));
        shows.insert("day".to_string(), show("Day", TimeBucket::Afternoon, 2));
        StationSchedule {
            shows,
            base: vec![
                ScheduleBlock {
                    start_minute: 6 * 60,
                    end_minute: 22 * 60,
                    show_id: "day".to_string(),
                    days: None,
                },
                ScheduleBlock {
                    start_minute: 22 * 60,
                    end_minute: 6 * 60,
                    show_id: "night".to_string(),
                    days: None,
                },
            ],
            overrides: vec![],
            podcast_hours: vec![],
        }
    }

    fn track(name: &str) -> Track {
        Track {
            path: PathBuf::from(format!("{}.mp3", name)),
            title: name.to_string(),
            artist: "X".to_string(),
            duration: Duration::from_secs(120),
            mood: TrackMood {
                energy: 0.5,
                warmth: 0.5,
                vibe: "jazz".to_string(),
            },
        }
    }

    /// Build a scheduler over a temp inventory. `segments` lists
    /// (bucket_dir, filename) pairs; `tracks` seeds the music library.
    fn fixture(segments: &[(&str, &str)], tracks: Vec<Track>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("segments");
        fs::create_dir_all(&root).unwrap();
        for (bucket, name) in segments {
            let sub = root.join(bucket);
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join(name), b"fake audio").unwrap();
        }
        let evergreen = dir.path().join("evergreen_station_id.mp3");
        fs::write(&evergreen, b"fake audio").unwrap();
        let inventory = SegmentInventory::open(
            &root,
            &dir.path().join("inventory_state.json"),
            &evergreen,
            10,
        )
        .unwrap();
        let scheduler = PlaybackScheduler::new(
            schedule(),
            inventory,
            MusicLibrary::from_tracks(tracks),
            PlaybackHistory::in_memory(4, 60),
            MessageStore::new(&dir.path().join("messages.json")),
            None,
        );
        Fixture { dir, scheduler }
    }

    fn at(hh: u32, mm: u32) -> NaiveDateTime {
        // A Tuesday.
        NaiveDate::from_ymd_opt(2026, 8, 4)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    fn spoken_kind(decision: &Decision) -> Option<SegmentKind> {
        match decision {
            Decision::Spoken { unit, .. } => Some(unit.kind),
            _ => None,
        }
    }

    #[test]
    fn empty_inventory_and_library_yields_evergreen_every_tick() {
        let mut f = fixture(&[], vec![]);
        for i in 0..10 {
            let now = at(14, i);
            let decision = f.scheduler.tick(now);
            assert!(
                matches!(decision, Decision::Evergreen { .. }),
                "tick {} did not produce a unit",
                i
            );
            f.scheduler.confirm(&decision, now);
        }
    }

    #[test]
    fn music_plays_between_segments() {
        let mut f = fixture(
            &[("afternoon", "station_id_a.mp3")],
            vec![track("a"), track("b"), track("c"), track("d"), track("e")],
        );
        // First two ticks mid-hour: music (pacing = 2 tracks per segment).
        let now = at(14, 30);
        let d1 = f.scheduler.tick(now);
        assert!(matches!(d1, Decision::Music { .. }));
        f.scheduler.confirm(&d1, now);
        let d2 = f.scheduler.tick(at(14, 32));
        assert!(matches!(d2, Decision::Music { .. }));
        f.scheduler.confirm(&d2, at(14, 32));
        // Pacing reached: spoken next.
        let d3 = f.scheduler.tick(at(14, 34));
        assert_eq!(spoken_kind(&d3), Some(SegmentKind::StationId));
    }

    #[test]
    fn hour_marker_on_first_tick_after_boundary() {
        let mut f = fixture(
            &[
                ("afternoon", "hour_marker_a.mp3"),
                ("afternoon", "station_id_a.mp3"),
            ],
            vec![track("a"), track("b")],
        );
        // Prime the budget inside hour 14.
        let now = at(14, 50);
        let d = f.scheduler.tick(now);
        f.scheduler.confirm(&d, now);
        // First tick at/after the boundary must emit the hour marker.
        let d = f.scheduler.tick(at(15, 0));
        assert_eq!(spoken_kind(&d), Some(SegmentKind::HourMarker));
    }

    #[test]
    fn missing_hour_marker_falls_back_without_stalling() {
        let mut f = fixture(
            &[("afternoon", "station_id_a.mp3")],
            vec![track("a"), track("b")],
        );
        let now = at(14, 50);
        let d = f.scheduler.tick(now);
        f.scheduler.confirm(&d, now);
        let d = f.scheduler.tick(at(15, 0));
        // No hour-marker inventory: next-highest deficit category instead.
        assert_eq!(spoken_kind(&d), Some(SegmentKind::StationId));
    }

    #[test]
    fn category_caps_respected_over_an_hour() {
        let files: Vec<(String, String)> = (0..30)
            .flat_map(|i| {
                vec![
                    ("afternoon".to_string(), format!("station_id_{}.mp3", i)),
                    ("afternoon".to_string(), format!("song_intro_{}.mp3", i)),
                    ("afternoon".to_string(), format!("weather_{}.mp3", i)),
                    ("afternoon".to_string(), format!("hour_marker_{}.mp3", i)),
                    ("afternoon".to_string(), format!("reflection_{}.mp3", i)),
                ]
            })
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(b, n)| (b.as_str(), n.as_str()))
            .collect();
        let tracks: Vec<Track> = (0..40).map(|i| track(&format!("t{}", i))).collect();
        let mut f = fixture(&refs, tracks);

        let mut counts: HashMap<SegmentKind, u32> = HashMap::new();
        // Tick through one full hour, one decision per minute.
        for minute in 0..60 {
            let now = at(14, minute);
            let decision = f.scheduler.tick(now);
            if let Some(kind) = spoken_kind(&decision) {
                *counts.entry(kind).or_default() += 1;
            }
            f.scheduler.confirm(&decision, now);
        }
        assert!(counts.get(&SegmentKind::SongIntro).copied().unwrap_or(0) <= SONG_INTRO_TARGET);
        assert!(counts.get(&SegmentKind::StationId).copied().unwrap_or(0) <= STATION_ID_TARGET);
        assert!(counts.get(&SegmentKind::HourMarker).copied().unwrap_or(0) <= HOUR_MARKER_TARGET);
        assert!(counts.get(&SegmentKind::Weather).copied().unwrap_or(0) <= 1);
        // Reflections never air outside the late-night bucket.
        assert_eq!(counts.get(&SegmentKind::Reflection).copied().unwrap_or(0), 0);
    }

    #[test]
    fn reflections_only_late_night() {
        let files: Vec<(String, String)> = (0..20)
            .map(|i| ("late_night".to_string(), format!("reflection_{}.mp3", i)))
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(b, n)| (b.as_str(), n.as_str()))
            .collect();
        let mut f = fixture(&refs, vec![]);
        let mut reflections = 0;
        for minute in 0..59 {
            let now = at(23, minute);
            let decision = f.scheduler.tick(now);
            if spoken_kind(&decision) == Some(SegmentKind::Reflection) {
                reflections += 1;
            }
            f.scheduler.confirm(&decision, now);
        }
        assert!(reflections >= 1, "late night should air a reflection");
        assert!(reflections <= REFLECTION_TARGET, "reflections stay rare");
    }

    #[test]
    fn weather_respects_multi_hour_spacing() {
        let files: Vec<(String, String)> = (0..10)
            .map(|i| ("afternoon".to_string(), format!("weather_{}.mp3", i)))
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(b, n)| (b.as_str(), n.as_str()))
            .collect();
        let mut f = fixture(&refs, vec![]);
        let mut weather_plays = 0;
        // Two consecutive hours of spoken-only programming.
        for hour in 14..16 {
            for minute in 0..60 {
                let now = at(hour, minute);
                let decision = f.scheduler.tick(now);
                if spoken_kind(&decision) == Some(SegmentKind::Weather) {
                    weather_plays += 1;
                }
                f.scheduler.confirm(&decision, now);
            }
        }
        // One play allowed, then blocked for WEATHER_EVERY_HOURS.
        assert_eq!(weather_plays, 1);
    }

    #[test]
    fn thin_bucket_rotates_lru_instead_of_stalling() {
        let mut f = fixture(
            &[
                ("late_night", "station_id_a.mp3"),
                ("late_night", "station_id_b.mp3"),
                ("late_night", "station_id_c.mp3"),
            ],
            vec![],
        );
        let base = at(23, 0);
        // Play all three units, oldest first.
        let paths: Vec<PathBuf> = f
            .scheduler
            .inventory
            .eligible(TimeBucket::LateNight, None)
            .iter()
            .map(|u| u.path.clone())
            .collect();
        let ts = base.and_utc().timestamp();
        for (i, path) in paths.iter().enumerate() {
            f.scheduler.inventory.record_play(path, ts + i as i64);
            f.scheduler.history.record(PlaybackEvent {
                path: path.to_string_lossy().to_string(),
                name: "id".to_string(),
                kind: UnitKind::Segment,
                timestamp: ts + i as i64,
                show: "night".to_string(),
            });
        }
        // All three played within the last hour; a fourth distinct unit is
        // impossible, so the least-recently-played must come back.
        let picked = f
            .scheduler
            .pick_segment(TimeBucket::LateNight, SegmentKind::StationId, ts + 100, false)
            .unwrap();
        assert_eq!(picked.path, paths[0]);
    }

    #[test]
    fn show_transition_emits_boundary_cue() {
        let mut f = fixture(
            &[
                ("afternoon", "transition_a.mp3"),
                ("afternoon", "station_id_a.mp3"),
                ("late_night", "transition_b.mp3"),
            ],
            vec![track("a"), track("b")],
        );
        let now = at(21, 58);
        let d = f.scheduler.tick(now);
        f.scheduler.confirm(&d, now);
        // 22:00 crosses from "day" into "night".
        let d = f.scheduler.tick(at(22, 0));
        assert_eq!(spoken_kind(&d), Some(SegmentKind::Transition));
        if let Decision::Spoken { unit, .. } = &d {
            assert_eq!(unit.bucket, TimeBucket::LateNight);
        }
    }

    #[test]
    fn transition_with_exhausted_inventory_is_evergreen_not_silence() {
        let mut f = fixture(&[("afternoon", "station_id_a.mp3")], vec![]);
        let now = at(21, 58);
        let d = f.scheduler.tick(now);
        f.scheduler.confirm(&d, now);
        // New bucket (late_night) has zero eligible units of any kind.
        let d = f.scheduler.tick(at(22, 0));
        assert!(matches!(d, Decision::Evergreen { .. }));
    }

    #[test]
    fn listener_message_biases_dedication_and_marks_read() {
        let mut f = fixture(
            &[
                ("afternoon", "dedication_old.mp3"),
                ("afternoon", "dedication_new.mp3"),
            ],
            vec![track("a"), track("b")],
        );
        f.scheduler
            .messages
            .push("for the night owls", "anon")
            .unwrap();
        let now = at(14, 10);
        let d = f.scheduler.tick(now);
        assert_eq!(spoken_kind(&d), Some(SegmentKind::Dedication));
        match &d {
            Decision::Spoken { message, .. } => assert_eq!(*message, Some(0)),
            _ => unreachable!(),
        }
        f.scheduler.confirm(&d, now);
        assert!(f.scheduler.messages.next_unread().is_none());
    }

    #[test]
    fn dedication_overdraft_borrows_from_next_hour() {
        let files: Vec<(String, String)> = (0..6)
            .map(|i| ("afternoon".to_string(), format!("dedication_{}.mp3", i)))
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(b, n)| (b.as_str(), n.as_str()))
            .collect();
        let mut f = fixture(&refs, vec![track("a"), track("b")]);

        // Two listener messages inside the same hour: the second dedication
        // overdraws the budget and borrows from the next hour.
        f.scheduler.messages.push("first", "a").unwrap();
        let now = at(14, 10);
        let d = f.scheduler.tick(now);
        assert_eq!(spoken_kind(&d), Some(SegmentKind::Dedication));
        f.scheduler.confirm(&d, now);

        f.scheduler.messages.push("second", "b").unwrap();
        let now = at(14, 20);
        let d = f.scheduler.tick(now);
        assert_eq!(spoken_kind(&d), Some(SegmentKind::Dedication));
        f.scheduler.confirm(&d, now);
        assert_eq!(f.scheduler.budget.debt, 1);

        // Next hour repays the debt: no dedication allowance left.
        f.scheduler.budget.roll(at(15, 0).and_utc().timestamp().div_euclid(3600));
        assert_eq!(f.scheduler.budget.dedication_allowance(), 0);
        assert!(f
            .scheduler
            .budget
            .pick_category(TimeBucket::Afternoon, false, false, &[
                SegmentKind::HourMarker,
                SegmentKind::StationId,
                SegmentKind::SongIntro,
            ])
            .is_none_or(|k| k != SegmentKind::Dedication));
    }

    #[test]
    fn message_without_dedication_inventory_waits() {
        let mut f = fixture(
            &[("afternoon", "station_id_a.mp3")],
            vec![track("a"), track("b"), track("c")],
        );
        f.scheduler.messages.push("hello", "anon").unwrap();
        // No dedication units exist: normal programming continues and the
        // message stays unread instead of forcing spoken units every tick.
        let now = at(14, 10);
        let d = f.scheduler.tick(now);
        assert!(matches!(d, Decision::Music { .. }));
        f.scheduler.confirm(&d, now);
        assert!(f.scheduler.messages.next_unread().is_some());
    }

    #[test]
    fn podcast_plays_once_per_slot_hour() {
        let dir = tempfile::tempdir().unwrap();
        let pod_dir = dir.path().join("podcasts");
        fs::create_dir_all(&pod_dir).unwrap();
        fs::write(pod_dir.join("deep_dive.mp3"), b"fake").unwrap();

        let mut f = fixture(&[], vec![track("a"), track("b"), track("c")]);
        f.scheduler.podcasts_dir = Some(pod_dir);
        f.scheduler.schedule.podcast_hours = vec![15];

        let now = at(15, 0);
        let d = f.scheduler.tick(now);
        assert!(matches!(d, Decision::Podcast { .. }), "got {:?}", d);
        f.scheduler.confirm(&d, now);

        // Same slot hour: no second podcast.
        let d = f.scheduler.tick(at(15, 10));
        assert!(!matches!(d, Decision::Podcast { .. }));
    }

    #[test]
    fn no_repeat_within_lookback_when_inventory_suffices() {
        // Twelve units per budgeted category: inventory comfortably exceeds
        // the per-hour emission budget, so no repeat is ever forced.
        let files: Vec<(String, String)> = (0..12)
            .flat_map(|i| {
                vec![
                    ("afternoon".to_string(), format!("station_id_{}.mp3", i)),
                    ("afternoon".to_string(), format!("song_intro_{}.mp3", i)),
                    ("afternoon".to_string(), format!("hour_marker_{}.mp3", i)),
                    ("afternoon".to_string(), format!("weather_{}.mp3", i)),
                ]
            })
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(b, n)| (b.as_str(), n.as_str()))
            .collect();
        let mut f = fixture(&refs, vec![]);
        let evergreen = f.scheduler.inventory.evergreen_path().to_path_buf();

        // Two hours of spoken-only programming (evergreen fills once the
        // hour budget is spent — the degraded fallback is exempt from the
        // repeat guarantee by design).
        let mut fed: Vec<(String, i64)> = Vec::new();
        for hour in [14u32, 15u32] {
            for minute in (0..60).step_by(2) {
                let now = at(hour, minute);
                let decision = f.scheduler.tick(now);
                if decision.path() != evergreen {
                    fed.push((
                        decision.path().to_string_lossy().to_string(),
                        now.and_utc().timestamp(),
                    ));
                }
                f.scheduler.confirm(&decision, now);
            }
        }
        assert!(!fed.is_empty());
        for (i, (path, ts)) in fed.iter().enumerate() {
            for (other, other_ts) in fed.iter().skip(i + 1) {
                if other == path {
                    assert!(
                        other_ts - ts > 3600,
                        "unit {} repeated within the lookback window",
                        path
                    );
                }
            }
        }
    }

    #[test]
    fn force_segment_plays_spoken_next() {
        let mut f = fixture(
            &[("afternoon", "station_id_a.mp3")],
            vec![track("a"), track("b"), track("c")],
        );
        let now = at(14, 10);
        let d = f.scheduler.tick(now);
        assert!(matches!(d, Decision::Music { .. }));
        f.scheduler.confirm(&d, now);
        f.scheduler.force_segment();
        let d = f.scheduler.tick(at(14, 12));
        assert_eq!(spoken_kind(&d), Some(SegmentKind::StationId));
    }

    #[test]
    fn budget_tie_break_follows_priority() {
        let budget = HourBudget {
            hour_key: Some(0),
            emitted: [0, 2, 3, 0, 0, 0],
            debt: 0,
            withheld: 0,
            hour_marker_due: false,
        };
        // Deficits: marker 1, station 1, intro 1, dedication 1, weather 1,
        // reflection 0 (afternoon). Tie everywhere: marker wins.
        assert_eq!(
            budget.pick_category(TimeBucket::Afternoon, true, false, &[]),
            Some(SegmentKind::HourMarker)
        );
        // Marker excluded: next in priority order.
        assert_eq!(
            budget.pick_category(TimeBucket::Afternoon, true, false, &[SegmentKind::HourMarker]),
            Some(SegmentKind::StationId)
        );
    }

    #[test]
    fn budget_prefers_largest_deficit() {
        let budget = HourBudget {
            hour_key: Some(0),
            emitted: [1, 3, 0, 1, 0, 0],
            debt: 0,
            withheld: 0,
            hour_marker_due: false,
        };
        // Song intro deficit is 4, everything else <= 1.
        assert_eq!(
            budget.pick_category(TimeBucket::Afternoon, true, false, &[]),
            Some(SegmentKind::SongIntro)
        );
    }

    #[test]
    fn minute_cache_tracks_show_changes() {
        let mut f = fixture(&[], vec![track("a")]);
        let d = f.scheduler.tick(at(21, 59));
        f.scheduler.confirm(&d, at(21, 59));
        assert_eq!(f.scheduler.current_show().unwrap().id, "day");
        let d = f.scheduler.tick(at(22, 0));
        f.scheduler.confirm(&d, at(22, 0));
        assert_eq!(f.scheduler.current_show().unwrap().id, "night");
    }

    #[test]
    fn fixture_dir_outlives_scheduler() {
        // Keep the tempdir alive through the struct; guards against the
        // inventory root disappearing mid-test.
        let f = fixture(&[("morning", "weather_1.mp3")], vec![]);
        assert!(f.dir.path().exists());
        assert_eq!(
            f.scheduler
                .inventory
                .eligible(TimeBucket::Morning, None)
                .len(),
            1
        );
    }
}
