//! Station wiring: the single continuous decision+feed loop on a dedicated
//! thread, steered through a command channel (and a command file for other
//! processes), with fire-and-forget restock signals on the side.

use crate::config::StationConfig;
use crate::encoder::{backoff_delay, EncoderConfig, EncoderSink};
use crate::feeder::{apply_fade, decode_unit, decode_window, FeedControls, FeedOutcome, Feeder};
use crate::history::PlaybackHistory;
use crate::messages::MessageStore;
use crate::music::MusicLibrary;
use crate::schedule::load_schedule;
use crate::scheduler::{Decision, PlaybackScheduler};
use crate::segment::{GenerationRequest, SegmentInventory};
use crate::status::{BucketCount, RecentPlay, StationStatus, StatusBoard};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

/// Fade length applied to the edges of chopped music windows.
const WINDOW_FADE: Duration = Duration::from_secs(8);

/// Commands accepted by the station loop. Skip and shutdown travel as
/// atomic flags instead (see `FeedControls`) so they can interrupt a unit
/// mid-feed and stay safe to set from a signal handler.
pub enum StationCmd {
    ForceSegment,
    Reload,
}

/// Factory producing outbound sinks; called again after every pipe loss.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn Write + Send>, String> + Send>;

/// Sink factory for the real encoder child process.
pub fn encoder_sink_factory(config: EncoderConfig) -> SinkFactory {
    Box::new(move || {
        EncoderSink::spawn(&config).map(|sink| Box::new(sink) as Box<dyn Write + Send>)
    })
}

/// Sink factory writing raw PCM to stdout (pipe into any encoder).
pub fn stdout_sink_factory() -> SinkFactory {
    Box::new(|| Ok(Box::new(std::io::stdout()) as Box<dyn Write + Send>))
}

/// Thread-safe handle for steering a running station.
#[derive(Clone)]
pub struct StationHandle {
    tx: mpsc::Sender<StationCmd>,
    controls: FeedControls,
    status: StatusBoard,
}

impl StationHandle {
    /// Truncate the current unit at the next chunk boundary.
    pub fn skip(&self) {
        self.controls.request_skip();
    }

    /// Play a spoken unit at the next boundary.
    pub fn force_segment(&self) {
        let _ = self.tx.send(StationCmd::ForceSegment);
    }

    /// Re-load the schedule file at the next boundary.
    pub fn reload(&self) {
        let _ = self.tx.send(StationCmd::Reload);
    }

    /// Finish (or truncate) the current unit, then stop cleanly. Only
    /// flips an atomic flag, so it is safe to call from a signal handler.
    pub fn shutdown(&self) {
        self.controls.request_shutdown();
    }

    /// Read-only snapshot of the stream state.
    pub fn status(&self) -> StationStatus {
        self.status.snapshot()
    }
}

/// The assembled station. Owns the scheduler; nothing else mutates it.
pub struct Station {
    config: StationConfig,
    scheduler: PlaybackScheduler,
    status: StatusBoard,
    controls: FeedControls,
    rx: mpsc::Receiver<StationCmd>,
    gen_tx: mpsc::Sender<GenerationRequest>,
    low_stock_flagged: HashSet<crate::bucket::TimeBucket>,
}

impl Station {
    /// Load every collaborator. Configuration problems (bad schedule,
    /// missing evergreen) are fatal here, never at runtime.
    pub fn open(config: StationConfig) -> Result<(Station, StationHandle), String> {
        for file in [
            &config.history_file,
            &config.requests_file,
            &config.now_playing_file,
            &config.command_file,
            &config.inventory_state_file,
        ] {
            if let Some(parent) = file.parent() {
                let _ = fs::create_dir_all(parent);
            }
        }

        let schedule = load_schedule(&config.schedule_file)?;
        let inventory = SegmentInventory::open(
            &config.segments_dir,
            &config.inventory_state_file,
            &config.evergreen_file,
            config.low_stock_floor,
        )?;
        let library = MusicLibrary::scan(&config.music_dirs);
        let history = PlaybackHistory::open(
            &config.history_file,
            config.lookback_plays,
            config.lookback_minutes,
        );
        let messages = MessageStore::new(&config.messages_file);
        let scheduler = PlaybackScheduler::new(
            schedule,
            inventory,
            library,
            history,
            messages,
            config.podcasts_dir.clone(),
        );

        let (tx, rx) = mpsc::channel();
        let controls = FeedControls::new();
        let status = StatusBoard::new();
        let gen_tx = spawn_generation_writer(config.requests_file.clone());

        let handle = StationHandle {
            tx,
            controls: controls.clone(),
            status: status.clone(),
        };
        let station = Station {
            config,
            scheduler,
            status,
            controls,
            rx,
            gen_tx,
            low_stock_flagged: HashSet::new(),
        };
        Ok((station, handle))
    }

    /// The continuous decision+feed loop. Blocks only on the outbound pipe
    /// write; returns after a shutdown request.
    pub fn run(mut self, mut sink_factory: SinkFactory) -> Result<(), String> {
        crate::log_line("=== skywave station starting ===");
        let sink = match self.connect(&mut sink_factory) {
            Some(sink) => sink,
            None => return Ok(()), // shut down before first connect
        };
        let crossfade = Duration::from_secs_f32(self.config.crossfade_secs.max(0.0));
        let mut feeder = Feeder::new(sink, crossfade);
        self.status.update(|s| s.encoder_connected = true);

        while !self.controls.is_shutdown() {
            self.drain_commands();
            if self.controls.is_shutdown() {
                break;
            }

            let now = chrono::Local::now().naive_local();
            let decision = self.scheduler.tick(now);

            let samples = match self.decode(&decision) {
                Ok(samples) => samples,
                Err(e) => {
                    // A missing or corrupt unit file never interrupts the
                    // stream: exclude it and pick again.
                    crate::log_warn(&format!("Unit unreadable, skipping: {}", e));
                    self.status.note_degraded(&format!("unit unreadable: {}", e));
                    self.scheduler.inventory.mark_missing(decision.path());
                    if decision.path() == self.scheduler.inventory.evergreen_path() {
                        // Even the evergreen failed; back off so the loop
                        // does not spin while the operator intervenes.
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    continue;
                }
            };

            let name = decision.display_name();
            crate::log_line(&format!("> {}", name));
            self.status.update(|s| {
                s.now_playing = Some(name.clone());
                s.unit_kind = Some(decision.unit_kind());
            });

            match feeder.feed(&samples, &self.controls) {
                FeedOutcome::Completed | FeedOutcome::Truncated => {
                    self.scheduler.confirm(&decision, now);
                    self.after_feed(&decision, now);
                }
                FeedOutcome::PipeLost => {
                    // The unit partially aired: still recorded, never
                    // replayed. Resume with the next scheduled unit.
                    self.scheduler.confirm(&decision, now);
                    self.after_feed(&decision, now);
                    self.status.update(|s| s.encoder_connected = false);
                    self.status.note_degraded("encoder pipe lost");
                    crate::log_warn("Encoder pipe lost, reconnecting...");
                    match self.connect(&mut sink_factory) {
                        Some(sink) => {
                            feeder.replace_sink(sink);
                            self.status.update(|s| s.encoder_connected = true);
                            crate::log_line("Encoder reconnected");
                        }
                        None => break, // shutdown requested during backoff
                    }
                }
            }
        }

        if let Err(e) = feeder.finish() {
            crate::log_warn(&format!("Final feeder flush failed: {}", e));
        }
        self.status.update(|s| s.encoder_connected = false);
        let _ = self.status.export(&self.config.now_playing_file);
        crate::log_line("=== Stream stopped ===");
        Ok(())
    }

    /// Connect (or reconnect) the outbound sink with bounded exponential
    /// backoff. Returns None when shutdown is requested while waiting.
    fn connect(&self, sink_factory: &mut SinkFactory) -> Option<Box<dyn Write + Send>> {
        let mut attempt = 0u32;
        loop {
            if self.controls.is_shutdown() {
                return None;
            }
            match sink_factory() {
                Ok(sink) => return Some(sink),
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    crate::log_warn(&format!(
                        "Encoder connect failed ({}); retrying in {}s",
                        e, delay
                    ));
                    attempt += 1;
                    // Sleep in slices so shutdown stays responsive.
                    let mut slices = delay * 10;
                    while slices > 0 && !self.controls.is_shutdown() {
                        std::thread::sleep(Duration::from_millis(100));
                        slices -= 1;
                    }
                }
            }
        }
    }

    fn decode(&self, decision: &Decision) -> Result<Vec<i16>, String> {
        match decision {
            Decision::Music {
                track,
                window: Some((start, len)),
            } => {
                let mut samples = decode_window(&track.path, *start, *len)?;
                apply_fade(&mut samples, WINDOW_FADE, WINDOW_FADE);
                Ok(samples)
            }
            _ => decode_unit(decision.path()),
        }
    }

    /// Bookkeeping after a unit went out: status snapshot, export, and the
    /// low-stock signal for the active bucket (edge-triggered so one
    /// depletion emits one request).
    fn after_feed(&mut self, decision: &Decision, now: NaiveDateTime) {
        let ts = now.and_utc().timestamp();
        let counts = self.scheduler.inventory.counts(ts);
        let active = self
            .scheduler
            .current_show()
            .map(|a| (a.id.clone(), a.show.name.clone(), a.show.bucket));

        self.status.update(|s| {
            if let Some((id, name, bucket)) = &active {
                s.show_id = id.clone();
                s.show_name = name.clone();
                s.bucket = Some(*bucket);
            }
            s.last_fed = Some(ts);
            s.inventory = counts
                .iter()
                .map(|&(bucket, total, fresh)| BucketCount {
                    bucket,
                    total,
                    fresh,
                })
                .collect();
        });
        self.status.note_play(RecentPlay {
            name: decision.display_name(),
            kind: decision.unit_kind(),
            timestamp: ts,
        });
        if let Err(e) = self.status.export(&self.config.now_playing_file) {
            crate::log_warn(&format!("Status export failed: {}", e));
        }

        if let Some((_, _, bucket)) = active {
            if self.scheduler.inventory.low_stock(bucket, ts) {
                if self.low_stock_flagged.insert(bucket) {
                    let request = self.scheduler.inventory.restock_request(bucket, ts);
                    crate::log_line(&format!(
                        "Low inventory for {}: requesting {} {} unit(s)",
                        bucket, request.count_needed, request.kind
                    ));
                    let _ = self.gen_tx.send(request);
                }
            } else {
                self.low_stock_flagged.remove(&bucket);
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                StationCmd::ForceSegment => self.scheduler.force_segment(),
                StationCmd::Reload => self.reload_schedule(),
            }
        }
        if let Some(cmd) = take_command_file(&self.config.command_file) {
            match cmd.as_str() {
                "skip" => self.controls.request_skip(),
                "segment" => self.scheduler.force_segment(),
                "reload" => self.reload_schedule(),
                "stop" => self.controls.request_shutdown(),
                other => crate::log_warn(&format!("Unknown command '{}'", other)),
            }
        }
    }

    /// Explicit reload only. A reload failure keeps the running schedule —
    /// malformed configuration is fatal at startup, never at runtime.
    fn reload_schedule(&mut self) {
        match load_schedule(&self.config.schedule_file) {
            Ok(schedule) => {
                self.scheduler.replace_schedule(schedule);
                crate::log_line("Schedule reloaded");
            }
            Err(e) => {
                crate::log_warn(&format!("Schedule reload failed: {}", e));
                self.status
                    .note_degraded(&format!("schedule reload failed: {}", e));
            }
        }
    }
}

/// Open a station and run it on a dedicated thread.
pub fn spawn(
    config: StationConfig,
    sink_factory: SinkFactory,
) -> Result<(StationHandle, std::thread::JoinHandle<Result<(), String>>), String> {
    let (station, handle) = Station::open(config)?;
    let join = std::thread::Builder::new()
        .name("station".into())
        .spawn(move || station.run(sink_factory))
        .map_err(|e| format!("Failed to spawn station thread: {}", e))?;
    Ok((handle, join))
}

/// Background writer turning restock signals into JSON lines the external
/// generation pipeline tails. Fire-and-forget: the feed path never waits.
pub fn spawn_generation_writer(path: PathBuf) -> mpsc::Sender<GenerationRequest> {
    let (tx, rx) = mpsc::channel::<GenerationRequest>();
    std::thread::Builder::new()
        .name("generation-writer".into())
        .spawn(move || {
            while let Ok(request) = rx.recv() {
                let json = match serde_json::to_string(&request) {
                    Ok(json) => json,
                    Err(e) => {
                        crate::log_warn(&format!("Bad generation request: {}", e));
                        continue;
                    }
                };
                let result = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .and_then(|mut f| writeln!(f, "{}", json));
                if let Err(e) = result {
                    crate::log_warn(&format!("Could not write generation request: {}", e));
                }
            }
        })
        .expect("failed to spawn generation-writer thread");
    tx
}

/// Read and clear a pending command from the command file.
pub fn take_command_file(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    let cmd = fs::read_to_string(path).ok()?.trim().to_string();
    if cmd.is_empty() {
        return None;
    }
    let _ = fs::write(path, "");
    Some(cmd)
}

/// Write a command for a running station (used by the CLI).
pub fn send_command(path: &Path, cmd: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Cannot create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, cmd).map_err(|e| format!("Cannot write '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::TimeBucket;
    use crate::segment::SegmentKind;

    #[test]
    fn command_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command.txt");
        assert!(take_command_file(&path).is_none());
        send_command(&path, "skip").unwrap();
        assert_eq!(take_command_file(&path).as_deref(), Some("skip"));
        // Consumed: the file is cleared.
        assert!(take_command_file(&path).is_none());
    }

    #[test]
    fn command_file_ignores_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("command.txt");
        fs::write(&path, "  \n").unwrap();
        assert!(take_command_file(&path).is_none());
    }

    #[test]
    fn generation_writer_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.log");
        let tx = spawn_generation_writer(path.clone());
        tx.send(GenerationRequest {
            bucket: TimeBucket::LateNight,
            kind: SegmentKind::StationId,
            count_needed: 5,
            requested_at: 1000,
        })
        .unwrap();
        tx.send(GenerationRequest {
            bucket: TimeBucket::Morning,
            kind: SegmentKind::Weather,
            count_needed: 2,
            requested_at: 2000,
        })
        .unwrap();
        // Give the writer thread time to drain.
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(10));
            if path.exists() && fs::read_to_string(&path).unwrap().lines().count() == 2 {
                break;
            }
        }
        let data = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: GenerationRequest = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.bucket, TimeBucket::LateNight);
        assert_eq!(first.count_needed, 5);
    }

    #[test]
    fn open_rejects_missing_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let config = StationConfig {
            schedule_file: dir.path().join("nope.json"),
            history_file: dir.path().join("history.log"),
            requests_file: dir.path().join("requests.log"),
            now_playing_file: dir.path().join("now_playing.json"),
            command_file: dir.path().join("command.txt"),
            inventory_state_file: dir.path().join("inventory_state.json"),
            segments_dir: dir.path().join("segments"),
            evergreen_file: dir.path().join("evergreen.wav"),
            messages_file: dir.path().join("messages.json"),
            music_dirs: vec![dir.path().join("music")],
            ..StationConfig::default()
        };
        assert!(Station::open(config).is_err());
    }
}
