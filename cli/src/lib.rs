//! Command-line front end for autocast.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use autocast_engine::audio::{self, DeviceSelector};
use autocast_engine::monitor::SoundMonitor;
use autocast_engine::{BotEvent, BroadcastSink, Config, Controller, EventSink, StatsSnapshot};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Application-specific environment variable for log filtering (overrides config).
const LOG_ENV_VAR: &str = "AUTOCAST_LOG";

/// How often `listen` prints the input level.
const LEVEL_POLL: Duration = Duration::from_millis(100);

/// Width of the `listen` level meter, in characters.
const METER_WIDTH: usize = 40;

#[derive(Parser)]
#[command(name = "autocast")]
#[command(about = "Listens for the bite, presses the key")]
#[command(version)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot until `q` or Ctrl+C
    Run(RunArgs),
    /// Measure background noise on the input device
    Calibrate {
        /// Seconds to listen
        #[arg(long, default_value_t = 2.0)]
        seconds: f32,
        /// Input device: index or name fragment
        #[arg(long)]
        device: Option<String>,
    },
    /// Show the live input level against the trigger threshold
    Listen {
        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        seconds: Option<f32>,
        /// Input device: index or name fragment
        #[arg(long)]
        device: Option<String>,
    },
    /// List audio input devices
    Devices,
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Input device: index or name fragment
    #[arg(long)]
    device: Option<String>,
    /// Go through the motions without pressing keys
    #[arg(long)]
    dry_run: bool,
    /// Calibrate the noise floor for this many seconds before starting
    #[arg(long, value_name = "SECS")]
    calibrate: Option<f32>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file location
    Path,
    /// Print the effective configuration as JSON
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Entry point for the `autocast` binary.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let (config, load_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let _guard = init_logging(&config)?;
    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {:#}", e);
        eprintln!("warning: {:#}; using defaults", e);
    }

    match cli.command {
        Commands::Run(args) => run_bot(config, args).await,
        Commands::Calibrate { seconds, device } => calibrate(config, seconds, device).await,
        Commands::Listen { seconds, device } => listen(config, seconds, device).await,
        Commands::Devices => {
            print_devices();
            Ok(())
        }
        Commands::Config { action } => config_command(config, cli.config, action),
    }
}

/// Log to `~/.local/state/autocast/autocast.log`, filtered by
/// `AUTOCAST_LOG` or else the configured level.
fn init_logging(config: &Config) -> Result<WorkerGuard> {
    let log_path = autocast_common::dirs::log_path().context("Failed to determine log path")?;
    let log_dir = log_path
        .parent()
        .context("Log path has no parent directory")?;
    let log_filename = log_path.file_name().context("Log path has no file name")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(config.log_level.as_directive().parse()?)
        .from_env()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter)
        .init();

    Ok(guard)
}

async fn run_bot(mut config: Config, args: RunArgs) -> Result<()> {
    if let Some(device) = args.device {
        config.audio_device = Some(device);
    }

    let sink = BroadcastSink::new();
    let events = sink.subscribe();
    let printer = tokio::spawn(print_events(events));

    let controller = Arc::new(
        Controller::new(config, Some(Arc::new(sink) as Arc<dyn EventSink>))
            .context("Failed to set up keyboard input")?,
    );
    if args.dry_run {
        controller.set_keys_enabled(false);
        println!("Dry run: no keys will be pressed");
    }

    if let Some(seconds) = args.calibrate {
        let duration = Duration::try_from_secs_f32(seconds).context("Invalid calibration time")?;
        let calibrating = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || calibrating.calibrate_sound(duration)).await?;
    }

    if !controller.start() {
        printer.abort();
        anyhow::bail!("Could not start: no usable audio input (try `autocast devices`)");
    }
    println!("Running. p + Enter pauses/resumes, q + Enter or Ctrl+C stops.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match line.trim() {
                    "p" => controller.toggle_pause(),
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command {:?} (p = pause/resume, q = quit)", other),
                },
                None => stdin_open = false,
            },
        }
    }

    info!("Shutdown requested");
    let stopping = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    // Let the printer drain what stop() published
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();

    println!("Final: {}", format_stats(&controller.stats()));
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<BotEvent>) {
    loop {
        match events.recv().await {
            Ok(BotEvent::StateChanged { state }) => println!("» {}", state),
            Ok(BotEvent::StatsUpdated { stats }) => println!("  {}", format_stats(&stats)),
            Ok(BotEvent::Log { message }) => println!("{}", message),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn format_stats(stats: &StatsSnapshot) -> String {
    format!(
        "casts {} | hooks {} | timeouts {} | baits {} | success {:.1}% | time {}",
        stats.total_casts,
        stats.successful_hooks,
        stats.timeouts,
        stats.baits_applied,
        stats.success_rate,
        stats.running_time_display()
    )
}

async fn calibrate(mut config: Config, seconds: f32, device: Option<String>) -> Result<()> {
    let duration = Duration::try_from_secs_f32(seconds).context("Invalid calibration time")?;
    let selector = DeviceSelector::from_config(device.as_deref().or(config.audio_device.as_deref()));
    let threshold = config.update_threshold();

    let measured = tokio::task::spawn_blocking(move || -> Result<(f32, f32)> {
        let monitor = SoundMonitor::new(threshold, || {});
        if !monitor.start(&selector) {
            anyhow::bail!("Could not open audio input {}", selector);
        }
        println!("Listening for {:.1}s, keep the game quiet...", duration.as_secs_f32());
        let noise_floor = monitor.calibrate(duration);
        let effective = monitor.effective_threshold();
        monitor.stop();
        Ok((noise_floor, effective))
    })
    .await??;

    let (noise_floor, effective) = measured;
    println!("Noise floor:         {:.4}", noise_floor);
    println!("Threshold:           {:.4}", threshold);
    println!("Effective threshold: {:.4}", effective);
    Ok(())
}

async fn listen(mut config: Config, seconds: Option<f32>, device: Option<String>) -> Result<()> {
    let limit = seconds
        .map(|s| Duration::try_from_secs_f32(s).context("Invalid listen time"))
        .transpose()?;
    let selector = DeviceSelector::from_config(device.as_deref().or(config.audio_device.as_deref()));
    let threshold = config.update_threshold();
    let cooldown = config.trigger_cooldown_duration();

    let triggers = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&triggers);
    let monitor = tokio::task::spawn_blocking(move || -> Result<SoundMonitor> {
        let monitor = SoundMonitor::new(threshold, move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        monitor.set_trigger_cooldown(cooldown);
        if !monitor.start(&selector) {
            anyhow::bail!("Could not open audio input {}", selector);
        }
        Ok(monitor)
    })
    .await??;
    let monitor = Arc::new(monitor);

    println!("Listening. A level reaching the | mark triggers; Ctrl+C stops.");
    let deadline = limit.and_then(|limit| tokio::time::Instant::now().checked_add(limit));
    let mut ticker = tokio::time::interval(LEVEL_POLL);
    let mut seen = 0;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            _ = ticker.tick() => {
                if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                    break;
                }
                if !monitor.is_running() {
                    warn!("Audio input closed while listening");
                    println!("Audio input closed");
                    break;
                }
                let fired = triggers.load(Ordering::Relaxed);
                println!(
                    "{}",
                    format_level(monitor.current_volume(), monitor.effective_threshold(), fired > seen)
                );
                seen = fired;
            }
        }
    }

    let stopping = Arc::clone(&monitor);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;
    println!("Triggers: {}", triggers.load(Ordering::Relaxed));
    Ok(())
}

/// One meter line: the level, a bar scaled so the effective threshold sits
/// at the `|` in the middle, and a mark when the detector fired.
fn format_level(volume: f32, effective: f32, triggered: bool) -> String {
    let full_scale = (effective * 2.0).max(f32::EPSILON);
    let filled = ((volume / full_scale).clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize;
    let mark = METER_WIDTH / 2;

    let meter: String = (0..METER_WIDTH)
        .map(|i| match i {
            i if i == mark => '|',
            i if i < filled => '#',
            _ => '.',
        })
        .collect();

    format!(
        "{:.4} [{}] {:.4}{}",
        volume,
        meter,
        effective,
        if triggered { "  BITE" } else { "" }
    )
}

fn print_devices() {
    let devices = audio::list_input_devices();
    if devices.is_empty() {
        println!("No audio input devices found");
        return;
    }

    let recommended = audio::recommended_device().map(|(index, _)| index);
    for device in &devices {
        let marker = if Some(device.index) == recommended {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:>2}  {}  ({} ch, {} Hz)",
            marker, device.index, device.name, device.channels, device.default_sample_rate
        );
    }
    println!("\n* used when audio_device is not set");
}

fn config_command(config: Config, path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&config)?),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "autocast",
            "--config",
            "/tmp/a.json",
            "run",
            "--device",
            "2",
            "--dry-run",
            "--calibrate",
            "1.5",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.json")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.device.as_deref(), Some("2"));
                assert!(args.dry_run);
                assert_eq!(args.calibrate, Some(1.5));
            }
            _ => panic!("Expected run"),
        }
    }

    #[test]
    fn test_calibrate_defaults_to_two_seconds() {
        let cli = Cli::try_parse_from(["autocast", "calibrate"]).unwrap();
        match cli.command {
            Commands::Calibrate { seconds, device } => {
                assert_eq!(seconds, 2.0);
                assert!(device.is_none());
            }
            _ => panic!("Expected calibrate"),
        }
    }

    #[test]
    fn test_config_subcommand_requires_action() {
        assert!(Cli::try_parse_from(["autocast", "config"]).is_err());
        assert!(Cli::try_parse_from(["autocast", "config", "init", "--force"]).is_ok());
    }

    #[test]
    fn test_listen_flags_parse() {
        let cli = Cli::try_parse_from(["autocast", "listen"]).unwrap();
        match cli.command {
            Commands::Listen { seconds, device } => {
                assert!(seconds.is_none());
                assert!(device.is_none());
            }
            _ => panic!("Expected listen"),
        }

        let cli =
            Cli::try_parse_from(["autocast", "listen", "--seconds", "5", "--device", "mix"]).unwrap();
        match cli.command {
            Commands::Listen { seconds, device } => {
                assert_eq!(seconds, Some(5.0));
                assert_eq!(device.as_deref(), Some("mix"));
            }
            _ => panic!("Expected listen"),
        }
    }

    #[test]
    fn test_format_level_scales_around_threshold() {
        let quiet = format_level(0.0, 0.02, false);
        assert_eq!(
            quiet,
            format!("0.0000 [{}|{}] 0.0200", ".".repeat(20), ".".repeat(19))
        );

        let loud = format_level(0.05, 0.02, true);
        assert_eq!(
            loud,
            format!("0.0500 [{}|{}] 0.0200  BITE", "#".repeat(20), "#".repeat(19))
        );

        let half = format_level(0.01, 0.02, false);
        assert!(half.starts_with(&format!("0.0100 [{}.", "#".repeat(10))));
    }

    #[test]
    fn test_format_stats() {
        let stats = StatsSnapshot {
            total_casts: 4,
            successful_hooks: 3,
            timeouts: 1,
            baits_applied: 1,
            success_rate: 75.0,
            running_secs: 61,
        };

        assert_eq!(
            format_stats(&stats),
            "casts 4 | hooks 3 | timeouts 1 | baits 1 | success 75.0% | time 00:01:01"
        );
    }
}
