use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::notify::{AnnouncerStats, CommandSink, LogSink};
use rollcall_core::{Announcer, CascadeClassifier, NotificationSink};
use rollcall_hw::{Camera, CameraError, FrameSource, ImageSequence};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{ErrorKind, SessionContext, SessionError, StopSignal};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance register")]
struct Cli {
    /// TOML configuration file (default: $ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture face samples for a person
    Enroll {
        /// Name to register (no ':' or ',')
        #[arg(short, long)]
        name: String,
        /// Replay images from a directory instead of the camera
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Rebuild the recognition model from all stored samples
    Train,
    /// Identify faces without recording attendance
    Recognize {
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Recognize faces and record attendance
    Attend {
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Show the attendance recorded for a day
    Today {
        /// Day to show, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List enrolled identities
    List,
    /// Delete all samples, labels, the model and the attendance ledger
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    let ctx = SessionContext::new(&config);

    match cli.command {
        Commands::Enroll { name, source } => {
            let detector = load_detector(&config)?;
            let stop = watch_for_stop();
            println!("Capturing samples for {name}. Press Enter to stop.");
            let who = name.clone();
            let stored = run_blocking(move || {
                ctx.enroll(
                    &who,
                    || open_source(&config, source.as_deref()),
                    detector.as_ref(),
                    &stop,
                )
            })
            .await?;
            println!("Stored {stored} samples for {name}. Run `rollcall train` to update the model.");
        }
        Commands::Train => {
            let report = run_blocking(move || ctx.train()).await?;
            println!(
                "Trained on {} samples from {} identities.",
                report.samples,
                report.identities.len()
            );
        }
        Commands::Recognize { source } => {
            let detector = load_detector(&config)?;
            let stop = watch_for_stop();
            println!("Recognizing. Press Enter to stop.");
            let summary = run_blocking(move || {
                let mut last: Vec<String> = Vec::new();
                ctx.recognize_stream(
                    || open_source(&config, source.as_deref()),
                    detector.as_ref(),
                    &stop,
                    |_, results| {
                        let names: Vec<String> =
                            results.iter().map(|r| r.identity.name().to_string()).collect();
                        if names != last {
                            let shown: Vec<String> = results
                                .iter()
                                .map(|r| format!("{} ({:.1})", r.identity.name(), r.confidence))
                                .collect();
                            println!("{}", if shown.is_empty() { "-".to_string() } else { shown.join(", ") });
                            last = names;
                        }
                    },
                )
            })
            .await?;
            println!(
                "{} frames, {} faces, {} recognized.",
                summary.frames, summary.faces, summary.known
            );
        }
        Commands::Attend { source } => {
            let detector = load_detector(&config)?;
            let stop = watch_for_stop();
            println!("Taking attendance. Press Enter to stop.");
            let (summary, stats) = run_blocking(move || {
                let announcer = build_announcer(&config);
                let mut present: BTreeSet<String> = BTreeSet::new();
                let result = ctx.take_attendance_stream(
                    || open_source(&config, source.as_deref()),
                    detector.as_ref(),
                    &stop,
                    &announcer,
                    |_, results| {
                        for r in results.iter().filter(|r| r.identity.is_known()) {
                            if present.insert(r.identity.name().to_string()) {
                                println!("present: {}", r.identity.name());
                            }
                        }
                    },
                );
                let stats = announcer.shutdown();
                result.map(|summary| (summary, stats))
            })
            .await?;

            println!("{} frames, {} faces.", summary.frames, summary.faces);
            for record in &summary.recorded {
                println!("recorded {} at {}", record.name, record.time.format("%H:%M:%S"));
            }
            for name in &summary.duplicates {
                println!("{name} was already recorded today");
            }
            report_announcer(&stats);
        }
        Commands::Today { date } => {
            let date = date.unwrap_or_else(|| ctx.today());
            let records = ctx.attendance_on(date).map_err(session_failure)?;
            if records.is_empty() {
                println!("No attendance recorded for {date}");
            } else {
                println!("{:<24} {:<12} TIME", "NAME", "DATE");
                for record in records {
                    println!(
                        "{:<24} {:<12} {}",
                        record.name,
                        record.date.format("%Y-%m-%d").to_string(),
                        record.time.format("%H:%M:%S")
                    );
                }
            }
        }
        Commands::List => {
            let identities = ctx.list_identities().map_err(session_failure)?;
            if identities.is_empty() {
                println!("No identities enrolled");
            } else {
                println!("{:>4}  {:<24} SAMPLES", "ID", "NAME");
                for identity in identities {
                    println!("{:>4}  {:<24} {}", identity.id, identity.name, identity.samples);
                }
            }
        }
        Commands::Reset { yes } => {
            if !yes && !confirm("Delete all samples, labels, the model and the attendance ledger?")? {
                println!("Aborted");
                return Ok(());
            }
            let report = ctx.reset_all().map_err(session_failure)?;
            println!(
                "Removed:{}{}{}{}",
                if report.samples { " samples" } else { "" },
                if report.registry { " labels" } else { "" },
                if report.model { " model" } else { "" },
                if report.ledger { " ledger" } else { "" },
            );
        }
    }

    Ok(())
}

/// Run a blocking session operation off the async runtime.
async fn run_blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .context("session task failed")?
        .map_err(session_failure)
}

fn session_failure(err: SessionError) -> anyhow::Error {
    let what = match err.kind() {
        ErrorKind::Validation => "invalid input",
        ErrorKind::NoData => "missing prerequisite",
        ErrorKind::Device => "video source failed",
        ErrorKind::Io => "storage error",
    };
    anyhow::Error::new(err).context(what)
}

fn load_detector(config: &Config) -> Result<Arc<CascadeClassifier>> {
    let cascade = CascadeClassifier::load(&config.cascade_path)
        .map_err(|e| session_failure(e.into()))
        .with_context(|| format!("cannot load face cascade {}", config.cascade_path.display()))?;
    tracing::info!(path = %config.cascade_path.display(), "cascade loaded");
    Ok(Arc::new(cascade))
}

fn open_source(config: &Config, replay: Option<&Path>) -> Result<Box<dyn FrameSource>, CameraError> {
    if let Some(dir) = replay {
        return Ok(Box::new(ImageSequence::open(dir)?));
    }
    let mut camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );
    camera.warm_up(config.warmup_frames)?;
    Ok(Box::new(camera))
}

fn build_announcer(config: &Config) -> Announcer {
    let sink: Arc<dyn NotificationSink> = match config
        .notify_command
        .as_deref()
        .and_then(CommandSink::from_command_line)
    {
        Some(command) => Arc::new(command),
        None => Arc::new(LogSink),
    };
    Announcer::spawn(sink, config.notify_queue)
}

fn report_announcer(stats: &AnnouncerStats) {
    if stats.failed > 0 || stats.dropped > 0 {
        println!(
            "{} announcements failed, {} dropped (see logs)",
            stats.failed, stats.dropped
        );
    }
}

/// Stop signal raised by Enter on stdin or Ctrl-C.
fn watch_for_stop() -> StopSignal {
    let stop = StopSignal::new();

    let on_enter = stop.clone();
    let spawned = std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || {
            let mut line = String::new();
            // EOF (non-interactive stdin) leaves the loop running
            if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                on_enter.trigger();
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "cannot watch stdin; use Ctrl-C to stop");
    }

    let on_interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            on_interrupt.trigger();
        }
    });

    stop
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
