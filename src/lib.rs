//! skywave — Schedule-aware gapless playback core for an internet radio station.
//!
//! The station runs a single continuous decision+feed loop: resolve the
//! active show from the weekly schedule, pick the next unit (music track,
//! spoken segment, or podcast), and stream its PCM to the encoder pipe with
//! no dead air. Everything else — status snapshots, low-stock signals,
//! listener messages — hangs off that loop through read-only snapshots and
//! fire-and-forget channels.

pub mod bucket;
pub mod config;
pub mod encoder;
pub mod feeder;
pub mod history;
pub mod messages;
pub mod music;
pub mod schedule;
pub mod scheduler;
pub mod segment;
pub mod station;
pub mod status;
pub mod track;

/// Print a timestamped log line to stdout.
pub fn log_line(msg: &str) {
    let ts = chrono::Local::now().format("%H:%M:%S");
    println!("[{}] {}", ts, msg);
}

/// Print a timestamped warning line to stderr.
pub fn log_warn(msg: &str) {
    let ts = chrono::Local::now().format("%H:%M:%S");
    eprintln!("[{}] {}", ts, msg);
}
