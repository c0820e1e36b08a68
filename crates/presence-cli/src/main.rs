use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use presence_core::ledger::today;
use presence_core::{
    AttendanceLedger, AttendanceSession, FaceEncoder, FrameReport, FrameSource,
    GalleryStore, IdentityName, LoadReport, SessionError, SessionSettings, Status,
};
use presence_hw::{CameraSource, ReplaySource};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod encoder;
mod roster;
mod runner;

use config::Config;
use encoder::CommandEncoder;
use runner::{SessionControl, SessionEvent};

#[derive(Parser)]
#[command(name = "presence", about = "Face-recognition attendance")]
struct Cli {
    /// Path to a TOML config file (default: ./presence.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ledger and mark everyone absent for today
    Init,
    /// Mark every known identity absent for a day unless already recorded
    Seed {
        /// Day to seed, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Take attendance from the camera ("m" + Enter marks, "q" + Enter stops)
    Take {
        /// Read frames from this directory instead of the camera
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Show attendance for a day (default: most recent)
    List {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List known identities
    Students,
    /// Add an identity from an image file or a camera capture
    Add {
        name: String,
        /// Reference image to copy into the gallery
        #[arg(long, conflicts_with = "capture", required_unless_present = "capture")]
        image: Option<PathBuf>,
        /// Take the reference image with the camera
        #[arg(long)]
        capture: bool,
    },
    /// Delete an identity and all of its attendance history
    Delete { name: String },
    /// Rename an identity, including its attendance history
    Rename { old: String, new: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let gallery = GalleryStore::new(&config.gallery_dir);
    let ledger = AttendanceLedger::new(&config.ledger_path);

    match cli.command {
        Commands::Init => {
            ledger.initialize().context("initializing ledger")?;
            let seeded = roster::seed(&gallery, &ledger, today())?;
            println!(
                "Ledger ready at {} ({seeded} marked absent for {})",
                ledger.path().display(),
                today()
            );
        }
        Commands::Seed { date } => {
            let date = date.unwrap_or_else(today);
            let seeded = roster::seed(&gallery, &ledger, date)?;
            println!("{seeded} marked absent for {date}");
        }
        Commands::Take { replay } => take(&config, &gallery, &ledger, replay).await?,
        Commands::List { date } => list(&ledger, date)?,
        Commands::Students => {
            let entries = gallery.entries()?;
            if entries.is_empty() {
                println!("No students registered yet.");
            }
            for entry in entries {
                println!("{:<30} {}", entry.name.display(), entry.path.display());
            }
        }
        Commands::Add { name, image, capture } => {
            let name = IdentityName::new(&name)?;
            let image = match image {
                Some(path) => image::open(&path)
                    .with_context(|| format!("opening {}", path.display()))?,
                None if capture => capture_still(&config)?,
                None => bail!("either --image or --capture is required"),
            };
            // Reference images must contain a face to be matchable.
            let mut encoder = CommandEncoder::from_command(&config.encoder_command)?;
            encoder
                .encode_single_face(&image)
                .with_context(|| format!("checking reference image for {name}"))?;
            let path = gallery.add(&name, &image)?;
            println!("Added {} ({})", name.display(), path.display());
        }
        Commands::Delete { name } => {
            let name = IdentityName::new(&name)?;
            let removed = roster::delete(&gallery, &ledger, &name)?;
            println!("Deleted {} ({removed} attendance rows)", name.display());
        }
        Commands::Rename { old, new } => {
            let old = IdentityName::new(&old)?;
            let new = IdentityName::new(&new)?;
            let renamed = roster::rename(&gallery, &ledger, &old, &new)?;
            println!(
                "Renamed {} to {} ({renamed} attendance rows)",
                old.display(),
                new.display()
            );
        }
    }

    Ok(())
}

fn load_gallery<E: FaceEncoder>(gallery: &GalleryStore, encoder: &mut E) -> Result<LoadReport> {
    let report = gallery
        .load(encoder)
        .with_context(|| format!("loading gallery {}", gallery.dir().display()))?;
    for (path, err) in &report.skipped {
        eprintln!("warning: {} not usable: {err}", path.display());
    }
    Ok(report)
}

fn frame_source(config: &Config, replay: Option<PathBuf>) -> Box<dyn FrameSource + Send> {
    match replay.or_else(|| config.replay_dir.clone()) {
        Some(dir) => Box::new(ReplaySource::new(
            dir,
            Duration::from_millis(config.replay_interval_ms),
        )),
        None => Box::new(CameraSource::new(
            config.camera_device.clone(),
            config.camera_width,
            config.camera_height,
            config.warmup_frames,
        )),
    }
}

async fn take(
    config: &Config,
    gallery: &GalleryStore,
    ledger: &AttendanceLedger,
    replay: Option<PathBuf>,
) -> Result<()> {
    let mut encoder = CommandEncoder::from_command(&config.encoder_command)?;
    let report = load_gallery(gallery, &mut encoder)?;

    ledger.initialize()?;
    let seeded = roster::seed(gallery, ledger, today())?;
    tracing::info!(seeded, "session start seeding done");

    let settings = SessionSettings {
        tolerance: config.match_tolerance,
        downsample: config.downsample,
    };
    let mut session = AttendanceSession::new(
        Arc::new(report.gallery),
        ledger.clone(),
        encoder,
        frame_source(config, replay),
        settings,
    );
    match session.start() {
        Ok(()) => {}
        Err(SessionError::CameraUnavailable(e)) => bail!("cannot access the camera: {e}"),
        Err(e) => return Err(e.into()),
    }

    println!("Streaming. Type \"m\" + Enter to mark presence, \"q\" + Enter to stop.");
    let mut handle = runner::spawn_session(session).context("spawning session thread")?;
    let mut input = spawn_stdin_reader();
    let mut events_open = true;
    let mut input_open = true;

    let summary = loop {
        tokio::select! {
            result = &mut handle.done => {
                break result.context("session thread exited")??;
            }
            event = handle.events.recv(), if events_open => match event {
                Some(SessionEvent::Frame(report)) => render(&report),
                Some(SessionEvent::MarkPending) => println!("Waiting for a known face to mark..."),
                None => events_open = false,
            },
            control = input.recv(), if input_open => match control {
                Some(SessionControl::Mark) => handle.mark().await,
                Some(SessionControl::Stop) => handle.stop().await,
                None => {
                    input_open = false;
                    handle.stop().await;
                }
            },
            _ = tokio::signal::ctrl_c() => handle.stop().await,
        }
    };

    match summary.marked {
        Some(record) => println!(
            "Presence marked for {} at {}",
            record.name.display(),
            record.time.map(|t| t.to_string()).unwrap_or_default()
        ),
        None => println!("Stopped after {} frames; nothing marked.", summary.frames),
    }
    Ok(())
}

/// Forward stdin commands from a plain thread; tokio's stdin would keep
/// the runtime alive on shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<SessionControl> {
    let (tx, rx) = mpsc::channel(4);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let control = match line.trim() {
                "m" | "mark" => SessionControl::Mark,
                "q" | "quit" | "stop" => SessionControl::Stop,
                other => {
                    eprintln!("unknown command {other:?} (use m or q)");
                    continue;
                }
            };
            if tx.blocking_send(control).is_err() {
                break;
            }
        }
    });
    rx
}

fn render(report: &FrameReport) {
    if report.skipped {
        return;
    }
    for d in &report.decisions {
        let b = d.face.bbox;
        println!(
            "  [{:>4.0},{:>4.0} {:>4.0}x{:<4.0}] {:<20} {:.3}",
            b.left,
            b.top,
            b.width(),
            b.height(),
            d.label(),
            d.distance
        );
    }
}

fn capture_still(config: &Config) -> Result<image::DynamicImage> {
    let mut source = CameraSource::new(
        config.camera_device.clone(),
        config.camera_width,
        config.camera_height,
        config.warmup_frames,
    );
    source.acquire().context("cannot access the camera")?;
    let frame = source.next_frame();
    source.release();
    Ok(frame?)
}

fn list(ledger: &AttendanceLedger, date: Option<NaiveDate>) -> Result<()> {
    let date = match date {
        Some(d) => d,
        None => match ledger.dates()?.first() {
            Some(d) => *d,
            None => {
                println!("No attendance recorded yet.");
                return Ok(());
            }
        },
    };

    let records = ledger.records_for(date)?;
    println!("{:<12} {:<30} {:<8} {}", "Date", "Name", "Status", "Time");
    for r in &records {
        let status = match r.status {
            Status::Present => "Present",
            Status::Absent => "Absent",
        };
        println!(
            "{:<12} {:<30} {:<8} {}",
            r.date,
            r.name.display(),
            status,
            r.time.map(|t| t.to_string()).unwrap_or_default()
        );
    }
    let present = records.iter().filter(|r| r.status == Status::Present).count();
    println!("{present}/{} present", records.len());
    Ok(())
}
