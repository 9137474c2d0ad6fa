//! MoodPulse CLI
//!
//! Scheduled webcam pulses summarised as facial Action Units.

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use moodpulse::{
    camera::{Camera, PatternCamera},
    config::Config,
    logging::{init_tracing, LogConfig},
    payload::{payload_or_error, PayloadMode, DEFAULT_WINDOW},
    pulse::{OpenFaceExtractor, SinkFactory},
    report::load_report,
    scheduler::{PulseOutcome, PulseScheduler, SchedulerEvent},
    session_log::SessionLog,
    transparency::{create_shared_log_with_persistence, TransparencyLog},
    StopSignal, PRIVACY_DECLARATION, VERSION,
};
use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "opencv")]
use moodpulse::{camera::OpenCvCamera, pulse::OpenCvSinkFactory};

#[cfg(not(feature = "opencv"))]
use moodpulse::{camera::NoopCamera, pulse::Y4mSinkFactory};

#[derive(Parser)]
#[command(name = "moodpulse")]
#[command(version = VERSION)]
#[command(about = "Scheduled webcam pulses summarised as facial Action Units", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pulse schedule until stopped
    Run {
        /// Stop after this many pulses
        #[arg(long)]
        pulses: Option<u32>,

        /// Seconds before the first pulse
        #[arg(long)]
        first_offset: Option<f64>,

        /// Seconds the camera stays on per pulse
        #[arg(long)]
        duration: Option<f64>,

        /// Seconds between recurring pulse starts
        #[arg(long)]
        gap: Option<f64>,

        /// Camera device index
        #[arg(long)]
        camera: Option<i32>,

        /// Record a synthetic test pattern instead of a camera
        #[arg(long)]
        test_pattern: bool,

        /// Also write daily log files under the data directory
        #[arg(long)]
        log_file: bool,
    },

    /// Show configuration and camera usage statistics
    Status,

    /// Summarise trends in the session log
    Report {
        /// Number of most recent pulses to list
        #[arg(long, default_value = "10")]
        tail: usize,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the interpretation payload
    Payload {
        /// latest or window
        #[arg(long, default_value = "latest")]
        mode: PayloadMode,

        /// Pulses averaged in window mode
        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        n: usize,
    },

    /// Ask the remote coach about recent pulses
    #[cfg(feature = "coach")]
    Ask {
        /// The question to ask
        question: String,

        /// latest or window
        #[arg(long, default_value = "latest")]
        mode: PayloadMode,

        /// Pulses averaged in window mode
        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        n: usize,
    },

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            pulses,
            first_offset,
            duration,
            gap,
            camera,
            test_pattern,
            log_file,
        } => cmd_run(RunOverrides {
            pulses,
            first_offset,
            duration,
            gap,
            camera,
            test_pattern,
            log_file,
        }),
        Commands::Status => cmd_status(),
        Commands::Report { tail, json } => cmd_report(tail, json),
        Commands::Payload { mode, n } => cmd_payload(mode, n),
        #[cfg(feature = "coach")]
        Commands::Ask { question, mode, n } => cmd_ask(&question, mode, n),
        Commands::Privacy => {
            println!("{PRIVACY_DECLARATION}");
            Ok(())
        }
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

struct RunOverrides {
    pulses: Option<u32>,
    first_offset: Option<f64>,
    duration: Option<f64>,
    gap: Option<f64>,
    camera: Option<i32>,
    test_pattern: bool,
    log_file: bool,
}

impl RunOverrides {
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(n) = self.pulses {
            config.schedule.max_pulses = Some(n);
        }
        if let Some(s) = self.first_offset {
            config.schedule.first_offset = seconds("--first-offset", s)?;
        }
        if let Some(s) = self.duration {
            config.schedule.pulse_duration = seconds("--duration", s)?;
        }
        if let Some(s) = self.gap {
            config.schedule.recurring_gap = seconds("--gap", s)?;
        }
        if let Some(index) = self.camera {
            config.camera.index = index;
        }
        Ok(())
    }
}

fn seconds(flag: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("{flag} must be a non-negative number"))
}

fn cmd_run(overrides: RunOverrides) -> anyhow::Result<()> {
    let mut config = Config::load_with_env().context("could not load configuration")?;
    overrides.apply(&mut config)?;
    config.validate()?;

    let log_config = LogConfig {
        log_dir: overrides.log_file.then(|| config.data_path.join("logs")),
        ..LogConfig::default()
    };
    if let Err(e) = init_tracing(&log_config) {
        eprintln!("Warning: {e}");
    }

    let extractor = OpenFaceExtractor::new(config.extractor_bin()?)
        .with_timeout(config.extract_timeout);
    config.ensure_directories()?;

    println!("MoodPulse v{VERSION}");
    println!();

    if overrides.test_pattern {
        return run_schedule(&config, PatternCamera, extractor);
    }

    #[cfg(feature = "opencv")]
    let result = run_schedule(&config, OpenCvCamera, extractor);

    #[cfg(not(feature = "opencv"))]
    let result = {
        eprintln!("Warning: built without the `opencv` feature; every pulse will be skipped.");
        eprintln!("Use --test-pattern to exercise the pipeline without a camera.");
        run_schedule(&config, NoopCamera, extractor)
    };

    result
}

#[cfg(feature = "opencv")]
fn sinks() -> impl SinkFactory {
    OpenCvSinkFactory
}

#[cfg(not(feature = "opencv"))]
fn sinks() -> impl SinkFactory {
    Y4mSinkFactory
}

fn run_schedule<C: Camera>(
    config: &Config,
    camera: C,
    extractor: OpenFaceExtractor,
) -> anyhow::Result<()> {
    let schedule = &config.schedule;
    println!(
        "Schedule: T+{:.1}s for {:.1}s, then every {:.1}s for {:.1}s. Ctrl+C or q/ESC (then Enter) to stop.",
        schedule.first_offset.as_secs_f64(),
        schedule.pulse_duration.as_secs_f64(),
        schedule.recurring_gap.as_secs_f64(),
        schedule.pulse_duration.as_secs_f64()
    );
    println!("Session log: {}", config.session_log_path().display());

    let stop = StopSignal::new();
    install_stop_handlers(&stop)?;

    let transparency = create_shared_log_with_persistence(config.transparency_path());
    let mut scheduler = PulseScheduler::new(config, camera, sinks(), extractor)
        .with_stop_signal(stop)
        .with_transparency(transparency.clone());
    println!("Session ID: {}", scheduler.session_id());
    println!();

    let pulse_secs = schedule.pulse_duration.as_secs_f64();
    let mut countdown = Countdown::default();
    let summary = scheduler.run(|event| match event {
        SchedulerEvent::Waiting { remaining } => countdown.show(*remaining),
        SchedulerEvent::PulseStarted { .. } => {
            countdown.clear();
            println!("[{}] Camera ON for {pulse_secs:.1}s", Local::now().format("%H:%M:%S"));
        }
        SchedulerEvent::PulseFinished { outcome, .. } => {
            println!("[{}] Camera OFF", Local::now().format("%H:%M:%S"));
            print_outcome(outcome);
        }
        SchedulerEvent::Stopped => countdown.clear(),
    });

    if summary.stopped_by_request {
        println!("[INFO] Stopped by user.");
    }
    println!();
    println!("{}", transparency.summary());
    Ok(())
}

fn print_outcome(outcome: &PulseOutcome) {
    match outcome {
        PulseOutcome::Logged(pulse) => {
            let fv = &pulse.features;
            println!(
                "[EXPR] {}  score={:.2}  smile(AU12)={:.2}  furrow(AU04)={:.2}  mouth(AU26)={:.2}  valence={:.2}",
                pulse.classification.label,
                pulse.classification.score,
                fv.avg_smile(),
                fv.avg_furrow(),
                fv.avg_mouthop(),
                fv.valence_proxy()
            );
            let table = pulse
                .raw_table
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!("[SCHED] saved {table} → appended to session log");
        }
        PulseOutcome::Skipped { reason } => {
            println!("[WARN] Camera not available, pulse skipped: {reason}");
        }
        PulseOutcome::Failed { message, .. } => {
            eprintln!("[ERR] {message}");
        }
    }
}

/// Single-line `\r` countdown, redrawn at most once a second.
#[derive(Default)]
struct Countdown {
    last_drawn: Option<Instant>,
    visible: bool,
}

impl Countdown {
    fn show(&mut self, remaining: Duration) {
        let due = self
            .last_drawn
            .map_or(true, |t| t.elapsed() >= Duration::from_secs(1));
        if due {
            use std::io::Write;
            print!("\rNext camera ON in {:5.1} sec", remaining.as_secs_f64());
            let _ = std::io::stdout().flush();
            self.last_drawn = Some(Instant::now());
            self.visible = true;
        }
    }

    fn clear(&mut self) {
        if self.visible {
            println!();
        }
        self.visible = false;
        self.last_drawn = None;
    }
}

/// Ctrl+C and a `q`/ESC line on stdin both request a stop.
fn install_stop_handlers(stop: &StopSignal) -> anyhow::Result<()> {
    let on_interrupt = stop.clone();
    ctrlc::set_handler(move || on_interrupt.request_stop())
        .context("could not install Ctrl+C handler")?;

    let on_key = stop.clone();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let key = line.trim();
            if key.eq_ignore_ascii_case("q") || key.contains('\u{1b}') {
                on_key.request_stop();
                break;
            }
        }
    });
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load_with_env().unwrap_or_default();

    println!("MoodPulse Status");
    println!("================");
    println!();

    println!("Configuration:");
    match &config.extractor_bin {
        Some(bin) if bin.exists() => println!("  Extractor: {} ✓", bin.display()),
        Some(bin) => println!("  Extractor: {} (not found) ✗", bin.display()),
        None => println!("  Extractor: not set (OPENFACE_BIN) ✗"),
    }
    println!(
        "  Camera: device {} at {}x{} @ {} fps",
        config.camera.index, config.camera.width, config.camera.height, config.camera.fps
    );
    println!(
        "  Cadence: {:.1}s pulse every {:.1}s",
        config.schedule.pulse_duration.as_secs_f64(),
        config.schedule.recurring_gap.as_secs_f64()
    );
    println!(
        "  Capture backend: {}",
        if cfg!(feature = "opencv") {
            "opencv"
        } else {
            "none"
        }
    );
    println!();

    let log = SessionLog::new(config.session_log_path());
    match log.read_all() {
        Ok(rows) => println!("Session log: {} pulses in {}", rows.len(), log.path().display()),
        Err(_) => println!("Session log: none yet ({})", log.path().display()),
    }
    println!();

    match TransparencyLog::read_saved(&config.transparency_path()) {
        Ok(Some(stats)) => {
            println!("Cumulative Statistics:");
            println!("  Pulses started: {}", stats.pulses_started);
            println!("  Pulses skipped: {}", stats.pulses_skipped);
            println!("  Pulses logged: {}", stats.pulses_logged);
            println!("  Pulses failed: {}", stats.pulses_failed);
            println!("  Frames captured: {}", stats.frames_captured);
            println!("  Last updated: {}", stats.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        Ok(None) => println!("No previous session data found."),
        Err(e) => println!("Could not read statistics: {e}"),
    }
    Ok(())
}

fn cmd_report(tail: usize, json: bool) -> anyhow::Result<()> {
    let config = Config::load_with_env().unwrap_or_default();
    let log = SessionLog::new(config.session_log_path());

    let Some(report) = load_report(&log)? else {
        bail!("{} has no pulses yet; run the scheduler first", log.path().display());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Loaded {} pulses from {}", report.points.len(), log.path().display());
        println!();
        print!("{}", report.render(tail));
    }
    Ok(())
}

fn cmd_payload(mode: PayloadMode, n: usize) -> anyhow::Result<()> {
    let config = Config::load_with_env().unwrap_or_default();
    let log = SessionLog::new(config.session_log_path());
    let payload = payload_or_error(&log, mode, n);
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[cfg(feature = "coach")]
fn cmd_ask(question: &str, mode: PayloadMode, n: usize) -> anyhow::Result<()> {
    use moodpulse::BlockingCoachClient;

    let config = Config::load_with_env()?;
    let log = SessionLog::new(config.session_log_path());
    let payload = moodpulse::payload::build_payload(&log, mode, n)?;

    let client = BlockingCoachClient::new(config.coach.clone())?;
    let reply = client.ask(question, &payload)?;
    println!("{reply}");
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load_with_env().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
