use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use skywave::bucket::TimeBucket;
use skywave::config::StationConfig;
use skywave::history::PlaybackHistory;
use skywave::messages::MessageStore;
use skywave::schedule::load_schedule;
use skywave::segment::SegmentInventory;
use skywave::station::{self, encoder_sink_factory, stdout_sink_factory, Station};
use skywave::status::StationStatus;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skywave", about = "Schedule-aware gapless radio station core")]
struct Cli {
    /// Path to the station config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the station: decision loop + gapless feed to the encoder
    Run {
        /// Write raw PCM (s16le 44100 Hz stereo) to stdout instead of
        /// spawning the encoder child
        #[arg(long)]
        stdout: bool,
    },
    /// Show the current stream status snapshot
    Status,
    /// Schedule tools
    Schedule {
        #[command(subcommand)]
        action: ScheduleCmd,
    },
    /// Playback history tools
    History {
        #[command(subcommand)]
        action: HistoryCmd,
    },
    /// Show spoken-segment inventory counts per bucket
    Inventory,
    /// Skip the currently playing unit on a running station
    Skip,
    /// Play a spoken segment next on a running station
    Segment,
    /// Reload the schedule file on a running station
    Reload,
    /// Stop a running station cleanly
    Stop,
    /// Queue a listener message for an on-air dedication
    Message {
        /// Message text
        text: String,
        /// Sender name
        #[arg(long, default_value = "anonymous")]
        from: String,
    },
}

#[derive(Subcommand)]
enum ScheduleCmd {
    /// Validate the schedule file and exit
    Validate,
    /// Print the show active now (or at a given instant)
    Now {
        /// Override time, "YYYY-MM-DD HH:MM"
        #[arg(long)]
        at: Option<String>,
    },
}

#[derive(Subcommand)]
enum HistoryCmd {
    /// Variety statistics over a recent window
    Stats {
        /// Window in minutes
        #[arg(long, default_value_t = 240)]
        minutes: i64,
    },
    /// Recently played units, newest first
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(StationConfig::default_path);
    if let Err(e) = run(cli, &config_path) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, config_path: &std::path::Path) -> Result<(), String> {
    let config = StationConfig::load(config_path)?;

    match cli.command {
        Commands::Run { stdout } => {
            let sink_factory = if stdout {
                stdout_sink_factory()
            } else {
                encoder_sink_factory(config.encoder.clone())
            };
            let (station, handle) = Station::open(config)?;
            install_shutdown_handler(handle);
            station.run(sink_factory)
        }
        Commands::Status => {
            let data = std::fs::read_to_string(&config.now_playing_file).map_err(|e| {
                format!(
                    "No status snapshot at '{}' (is the station running?): {}",
                    config.now_playing_file.display(),
                    e
                )
            })?;
            let status: StationStatus =
                serde_json::from_str(&data).map_err(|e| format!("Corrupt status snapshot: {}", e))?;
            print_status(&status);
            Ok(())
        }
        Commands::Schedule { action } => match action {
            ScheduleCmd::Validate => {
                load_schedule(&config.schedule_file)?;
                println!("OK");
                Ok(())
            }
            ScheduleCmd::Now { at } => {
                let schedule = load_schedule(&config.schedule_file)?;
                let when = match at {
                    Some(s) => NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M")
                        .map_err(|e| format!("Invalid --at format: {}", e))?,
                    None => chrono::Local::now().naive_local(),
                };
                let active = schedule.resolve(when)?;
                println!(
                    "{} — {} ({}) [{}]",
                    when.format("%a %H:%M"),
                    active.show.name,
                    active.id,
                    active.show.bucket
                );
                Ok(())
            }
        },
        Commands::History { action } => {
            let history = PlaybackHistory::open(
                &config.history_file,
                config.lookback_plays,
                config.lookback_minutes,
            );
            let now = chrono::Local::now().naive_local().and_utc().timestamp();
            match action {
                HistoryCmd::Stats { minutes } => {
                    let stats = history.stats(minutes, now);
                    println!("Plays (last {} min): {}", minutes, stats.total);
                    println!("Unique units:        {}", stats.unique);
                    println!("Variety:             {:.2}", stats.variety);
                    println!("Repeat rate:         {:.2}", stats.repeat_rate);
                }
                HistoryCmd::Recent { limit } => {
                    for event in history.recent(limit) {
                        let when = chrono::DateTime::from_timestamp(event.timestamp, 0)
                            .map(|t| t.format("%m-%d %H:%M:%S").to_string())
                            .unwrap_or_default();
                        println!("{} [{}] {}", when, event.kind, event.name);
                    }
                }
            }
            Ok(())
        }
        Commands::Inventory => {
            let inventory = SegmentInventory::open(
                &config.segments_dir,
                &config.inventory_state_file,
                &config.evergreen_file,
                config.low_stock_floor,
            )?;
            let now = chrono::Local::now().naive_local().and_utc().timestamp();
            println!("{:<12} {:>6} {:>6}  low?", "bucket", "total", "fresh");
            for bucket in TimeBucket::ALL {
                let (_, total, fresh) = inventory
                    .counts(now)
                    .into_iter()
                    .find(|(b, _, _)| *b == bucket)
                    .unwrap_or((bucket, 0, 0));
                println!(
                    "{:<12} {:>6} {:>6}  {}",
                    bucket.dir_name(),
                    total,
                    fresh,
                    if inventory.low_stock(bucket, now) {
                        "LOW"
                    } else {
                        "ok"
                    }
                );
            }
            Ok(())
        }
        Commands::Skip => station::send_command(&config.command_file, "skip"),
        Commands::Segment => station::send_command(&config.command_file, "segment"),
        Commands::Reload => station::send_command(&config.command_file, "reload"),
        Commands::Stop => station::send_command(&config.command_file, "stop"),
        Commands::Message { text, from } => {
            let store = MessageStore::new(&config.messages_file);
            store.push(&text, &from)?;
            println!("Queued. It might be read on air.");
            Ok(())
        }
    }
}

fn print_status(status: &StationStatus) {
    println!(
        "Show:      {} ({})",
        status.show_name,
        if status.show_id.is_empty() {
            "-"
        } else {
            &status.show_id
        }
    );
    if let Some(bucket) = status.bucket {
        println!("Bucket:    {}", bucket);
    }
    if let Some(now_playing) = &status.now_playing {
        println!("Playing:   {}", now_playing);
    }
    if let Some(last_fed) = status.last_fed {
        let when = chrono::DateTime::from_timestamp(last_fed, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("Last fed:  {}", when);
    }
    println!(
        "Encoder:   {}",
        if status.encoder_connected {
            "connected"
        } else {
            "DISCONNECTED"
        }
    );
    if !status.inventory.is_empty() {
        println!("Inventory:");
        for count in &status.inventory {
            println!("  {:<12} {} total, {} fresh", count.bucket, count.total, count.fresh);
        }
    }
    if !status.degraded.is_empty() {
        println!("Degraded conditions:");
        for note in &status.degraded {
            println!("  {}", note);
        }
    }
    if !status.recent.is_empty() {
        println!("Recent:");
        for play in status.recent.iter().take(10) {
            println!("  [{}] {}", play.kind, play.name);
        }
    }
}

static SHUTDOWN_HANDLE: std::sync::OnceLock<skywave::station::StationHandle> =
    std::sync::OnceLock::new();

#[cfg(unix)]
extern "C" fn on_signal(_sig: libc::c_int) {
    // Atomic store only; the station loop finishes or truncates the
    // current unit and closes the pipe on its own.
    if let Some(handle) = SHUTDOWN_HANDLE.get() {
        handle.shutdown();
    }
}

/// Ctrl-C / SIGTERM end the stream cleanly instead of tearing the pipe.
fn install_shutdown_handler(handle: skywave::station::StationHandle) {
    let _ = SHUTDOWN_HANDLE.set(handle);
    #[cfg(unix)]
    unsafe {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}
