use crate::bucket::TimeBucket;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const MINUTES_PER_DAY: u32 = 1440;

const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Music selection profile attached to a show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicProfile {
    /// Acceptable energy band, 0.0 (ambient) to 1.0 (peak).
    pub energy_range: [f32; 2],
    /// Preferred warmth, 0.0 (cold/electronic) to 1.0 (warm/organic).
    pub prefer_warmth: f32,
    /// Vibe tags in preference order (earlier = better fit).
    pub vibes: Vec<String>,
}

impl MusicProfile {
    fn validate(&self, show_id: &str) -> Result<(), String> {
        let [lo, hi] = self.energy_range;
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
            return Err(format!("Show {}: invalid music.energy_range", show_id));
        }
        if !(0.0..=1.0).contains(&self.prefer_warmth) {
            return Err(format!("Show {}: invalid music.prefer_warmth", show_id));
        }
        if self.vibes.is_empty() || self.vibes.iter().any(|v| v.trim().is_empty()) {
            return Err(format!("Show {}: invalid music.vibes", show_id));
        }
        Ok(())
    }
}

/// A named programming block. Immutable, defined by configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Show {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Segment-period bucket this show draws spoken units from.
    pub bucket: TimeBucket,
    /// Voice identity used by the external generation pipeline.
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Music tracks between spoken segments.
    #[serde(default = "default_segment_after_tracks")]
    pub segment_after_tracks: u32,
    #[serde(default = "default_true")]
    pub podcasts_enabled: bool,
    pub music: MusicProfile,
}

fn default_voice() -> String {
    "operator".to_string()
}

fn default_segment_after_tracks() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// The show resolved as active for some instant.
#[derive(Debug, Clone)]
pub struct ActiveShow {
    pub id: String,
    pub show: Show,
}

/// One time window in the schedule. Base blocks are day-agnostic
/// (`days` is None); overrides carry an explicit day set.
///
/// `end_minute < start_minute` means the window crosses midnight and
/// continues into the following calendar day as one continuous interval.
#[derive(Debug, Clone)]
pub struct ScheduleBlock {
    pub start_minute: u32,
    pub end_minute: u32,
    pub show_id: String,
    /// Mon..Sun membership. None = every day (base clock).
    pub days: Option<[bool; 7]>,
}

impl ScheduleBlock {
    pub fn crosses_midnight(&self) -> bool {
        self.end_minute < self.start_minute
    }

    /// Whether this block covers the given (day, minute-of-day) instant.
    /// A cross-midnight override belongs to its start day and continues
    /// into the next day: Friday 22:00–02:00 owns Saturday 01:00.
    pub fn contains(&self, day_index: usize, minute: u32) -> bool {
        match &self.days {
            None => {
                if self.end_minute > self.start_minute {
                    self.start_minute <= minute && minute < self.end_minute
                } else {
                    minute >= self.start_minute || minute < self.end_minute
                }
            }
            Some(days) => {
                if self.end_minute > self.start_minute {
                    days[day_index] && self.start_minute <= minute && minute < self.end_minute
                } else {
                    let prev = (day_index + 6) % 7;
                    (days[day_index] && minute >= self.start_minute)
                        || (days[prev] && minute < self.end_minute)
                }
            }
        }
    }

    fn time_display(&self) -> String {
        format!(
            "{:02}:{:02}-{:02}:{:02}",
            self.start_minute / 60,
            self.start_minute % 60,
            self.end_minute / 60,
            self.end_minute % 60
        )
    }
}

/// The weekly schedule: daily base clock plus day/time-bounded overrides.
/// Loaded once at startup, re-loaded only on explicit reload.
#[derive(Debug, Clone)]
pub struct StationSchedule {
    pub shows: HashMap<String, Show>,
    pub base: Vec<ScheduleBlock>,
    pub overrides: Vec<ScheduleBlock>,
    /// Hours (0–23) at which long-form podcast units may play.
    pub podcast_hours: Vec<u32>,
}

impl StationSchedule {
    /// Resolve the active show for an instant. Deterministic, no side
    /// effects: overrides win over the base clock, and load-time validation
    /// guarantees at most one override matches any instant.
    pub fn resolve(&self, now: NaiveDateTime) -> Result<ActiveShow, String> {
        let day = now.weekday().num_days_from_monday() as usize;
        let minute = now.hour() * 60 + now.minute();

        for block in self.overrides.iter().chain(self.base.iter()) {
            if block.contains(day, minute) {
                let show = self
                    .shows
                    .get(&block.show_id)
                    .ok_or_else(|| format!("Schedule references unknown show: {}", block.show_id))?;
                return Ok(ActiveShow {
                    id: block.show_id.clone(),
                    show: show.clone(),
                });
            }
        }
        // Unreachable after validation: the base clock covers every minute.
        Err(format!(
            "No schedule block covers {} {:02}:{:02}",
            DAY_NAMES[day],
            now.hour(),
            now.minute()
        ))
    }

    /// Validate the full schedule. Any failure here is fatal at load time;
    /// resolution never has to arbitrate at request time.
    pub fn validate(&self) -> Result<(), String> {
        if self.base.is_empty() {
            return Err("schedule.base is empty".to_string());
        }

        // Base coverage: every minute of the day covered exactly once.
        let mut coverage = [0u8; MINUTES_PER_DAY as usize];
        for block in &self.base {
            if block.start_minute == block.end_minute {
                return Err(format!(
                    "Base block for '{}' has equal start and end",
                    block.show_id
                ));
            }
            for m in expand_minutes(block.start_minute, block.end_minute) {
                coverage[m as usize] += 1;
            }
        }
        if let Some(m) = coverage.iter().position(|&c| c == 0) {
            return Err(format!(
                "schedule.base does not cover the full day (first gap at {:02}:{:02})",
                m / 60,
                m % 60
            ));
        }
        if let Some(m) = coverage.iter().position(|&c| c > 1) {
            return Err(format!(
                "schedule.base overlaps itself (first overlap at {:02}:{:02})",
                m / 60,
                m % 60
            ));
        }

        // Overrides: valid shape, and no two overrides may cover the same
        // instant anywhere in the week grid.
        let mut week = vec![false; 7 * MINUTES_PER_DAY as usize];
        for block in &self.overrides {
            if block.start_minute == block.end_minute {
                return Err(format!(
                    "Override for '{}' has equal start and end",
                    block.show_id
                ));
            }
            let days = block
                .days
                .as_ref()
                .ok_or_else(|| format!("Override for '{}' is missing days", block.show_id))?;
            if !days.iter().any(|&d| d) {
                return Err(format!("Override for '{}' has an empty day set", block.show_id));
            }
            for (day, &active) in days.iter().enumerate() {
                if !active {
                    continue;
                }
                for (d, m) in override_cells(day, block) {
                    let cell = d * MINUTES_PER_DAY as usize + m as usize;
                    if week[cell] {
                        return Err(format!(
                            "Overlapping overrides at {} {:02}:{:02} ('{}' {})",
                            DAY_NAMES[d],
                            m / 60,
                            m % 60,
                            block.show_id,
                            block.time_display()
                        ));
                    }
                    week[cell] = true;
                }
            }
        }

        // All referenced shows exist, and show config is sane.
        for block in self.base.iter().chain(self.overrides.iter()) {
            if !self.shows.contains_key(&block.show_id) {
                return Err(format!(
                    "Schedule references unknown show: '{}'",
                    block.show_id
                ));
            }
        }
        for hour in &self.podcast_hours {
            if *hour > 23 {
                return Err(format!("podcasts.hours contains invalid hour: {}", hour));
            }
        }
        for (id, show) in &self.shows {
            if show.name.trim().is_empty() {
                return Err(format!("Show {}: missing name", id));
            }
            if show.segment_after_tracks < 1 {
                return Err(format!("Show {}: segment_after_tracks must be >= 1", id));
            }
            show.music.validate(id)?;
        }
        Ok(())
    }
}

/// Expand a same-day or cross-midnight range into minute indices.
fn expand_minutes(start: u32, end: u32) -> Vec<u32> {
    if end > start {
        (start..end).collect()
    } else {
        (start..MINUTES_PER_DAY).chain(0..end).collect()
    }
}

/// Week-grid cells an override occupies when started on `day`.
fn override_cells(day: usize, block: &ScheduleBlock) -> Vec<(usize, u32)> {
    let mut cells = Vec::new();
    if block.crosses_midnight() {
        for m in block.start_minute..MINUTES_PER_DAY {
            cells.push((day, m));
        }
        let next = (day + 1) % 7;
        for m in 0..block.end_minute {
            cells.push((next, m));
        }
    } else {
        for m in block.start_minute..block.end_minute {
            cells.push((day, m));
        }
    }
    cells
}

/// Parse a time string in HH:MM format into minutes since midnight.
pub fn parse_minutes(s: &str) -> Result<u32, String> {
    let t = chrono::NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| format!("Invalid time '{}'. Expected HH:MM", s))?;
    Ok(t.hour() * 60 + t.minute())
}

/// Parse a day token list into a Mon..Sun membership array.
/// Accepts 3-letter and full names plus `daily`/`all`, `weekday`, `weekend`.
pub fn parse_days(tokens: &[String]) -> Result<[bool; 7], String> {
    if tokens.is_empty() {
        return Err("days must be a non-empty list".to_string());
    }
    let mut days = [false; 7];
    for raw in tokens {
        let tok = raw.trim().to_lowercase();
        let tok = match tok.as_str() {
            "monday" => "mon",
            "tuesday" => "tue",
            "wednesday" => "wed",
            "thursday" => "thu",
            "friday" => "fri",
            "saturday" => "sat",
            "sunday" => "sun",
            other => other,
        };
        match tok {
            "daily" | "all" => days = [true; 7],
            "weekday" => days[..5].iter_mut().for_each(|d| *d = true),
            "weekend" => {
                days[5] = true;
                days[6] = true;
            }
            _ => {
                let idx = DAY_NAMES
                    .iter()
                    .position(|&d| d == tok)
                    .ok_or_else(|| format!("Invalid day token: '{}'", raw))?;
                days[idx] = true;
            }
        }
    }
    Ok(days)
}

// ── File format ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawBlock {
    start: String,
    end: String,
    show: String,
    #[serde(default)]
    days: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawSchedule {
    base: Vec<RawBlock>,
    #[serde(default)]
    overrides: Vec<RawBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPodcasts {
    #[serde(default)]
    hours: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct ScheduleFile {
    shows: HashMap<String, Show>,
    schedule: RawSchedule,
    #[serde(default)]
    podcasts: RawPodcasts,
}

fn parse_block(raw: &RawBlock, day_aware: bool) -> Result<ScheduleBlock, String> {
    let start_minute = parse_minutes(&raw.start)?;
    let end_minute = parse_minutes(&raw.end)?;
    if raw.show.trim().is_empty() {
        return Err("Schedule block missing 'show'".to_string());
    }
    let days = if day_aware {
        let tokens = raw
            .days
            .as_ref()
            .ok_or_else(|| format!("Override for '{}' is missing days", raw.show))?;
        Some(parse_days(tokens)?)
    } else {
        None
    };
    Ok(ScheduleBlock {
        start_minute,
        end_minute,
        show_id: raw.show.trim().to_string(),
        days,
    })
}

/// Load and validate a schedule file. Any error refuses startup.
pub fn load_schedule(path: &Path) -> Result<StationSchedule, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Cannot read schedule '{}': {}", path.display(), e))?;
    let file: ScheduleFile = serde_json::from_str(&data)
        .map_err(|e| format!("Malformed schedule '{}': {}", path.display(), e))?;

    if file.shows.is_empty() {
        return Err("Schedule defines no shows".to_string());
    }

    let base = file
        .schedule
        .base
        .iter()
        .map(|b| parse_block(b, false))
        .collect::<Result<Vec<_>, _>>()?;
    let overrides = file
        .schedule
        .overrides
        .iter()
        .map(|b| parse_block(b, true))
        .collect::<Result<Vec<_>, _>>()?;

    let schedule = StationSchedule {
        shows: file.shows,
        base,
        overrides,
        podcast_hours: file.podcasts.hours,
    };
    schedule.validate()?;
    Ok(schedule)
}
