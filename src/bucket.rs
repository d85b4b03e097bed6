use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse time-of-day category used to scope spoken-segment eligibility
/// independent of which specific show is airing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    /// 22:00–05:59. The liminal hours.
    LateNight,
    /// 06:00–11:59.
    Morning,
    /// 12:00–17:59.
    Afternoon,
    /// 18:00–21:59.
    Evening,
}

impl TimeBucket {
    pub const ALL: [TimeBucket; 4] = [
        TimeBucket::LateNight,
        TimeBucket::Morning,
        TimeBucket::Afternoon,
        TimeBucket::Evening,
    ];

    /// Bucket that contains the given hour of day (0–23).
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeBucket::Morning,
            12..=17 => TimeBucket::Afternoon,
            18..=21 => TimeBucket::Evening,
            _ => TimeBucket::LateNight,
        }
    }

    /// Directory name used for the inventory layout (`segments/<bucket>/`).
    pub fn dir_name(&self) -> &'static str {
        match self {
            TimeBucket::LateNight => "late_night",
            TimeBucket::Morning => "morning",
            TimeBucket::Afternoon => "afternoon",
            TimeBucket::Evening => "evening",
        }
    }

    /// Parse a bucket name (case-insensitive, accepts hyphens or underscores).
    pub fn from_str_loose(s: &str) -> Result<Self, String> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "late_night" | "latenight" | "night" => Ok(TimeBucket::LateNight),
            "morning" => Ok(TimeBucket::Morning),
            "afternoon" => Ok(TimeBucket::Afternoon),
            "evening" => Ok(TimeBucket::Evening),
            _ => Err(format!(
                "Unknown bucket '{}'. Expected: late_night, morning, afternoon, evening",
                s
            )),
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}
