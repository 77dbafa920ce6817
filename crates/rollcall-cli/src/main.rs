use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::{
    record_attendance, signature_of, AttendanceOutcome, Config, IdentityMatcher,
    LandmarkDetector, MatchOutcome, SidecarDetector,
};
use rollcall_hw::Camera;
use rollcall_store::Store;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face from a photo
    Register {
        /// Worker id; registering an existing id replaces it
        #[arg(long)]
        worker_id: String,
        /// Display name used for attendance
        #[arg(long)]
        name: String,
        /// Enrollment photo
        #[arg(long)]
        photo: PathBuf,
    },
    /// Remove a registered face
    Remove {
        /// Worker id to remove
        id: String,
    },
    /// List registered faces in match order
    List {
        #[arg(long)]
        json: bool,
    },
    /// Match one image against the registered faces
    Match {
        /// Probe image
        path: PathBuf,
    },
    /// Show attendance for a day
    Attendance {
        /// Day to report (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Mark attendance by hand
    Mark {
        name: String,
    },
    /// List V4L2 capture devices
    Test,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    // Same file and variables as rollcalld, so both use one database.
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Register {
            worker_id,
            name,
            photo,
        } => register(&config, &worker_id, &name, &photo)?,
        Commands::Remove { id } => {
            if open_store(&config)?.remove(&id)? {
                println!("Removed {id}");
            } else {
                bail!("no face registered for worker id {id}");
            }
        }
        Commands::List { json } => {
            let records = open_store(&config)?.identities()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No faces registered");
            } else {
                for r in &records {
                    println!(
                        "{:<12} {:<24} {}  {}",
                        r.worker_id,
                        r.name,
                        r.enrolled_at.format("%Y-%m-%d %H:%M"),
                        r.photo_path.display()
                    );
                }
            }
        }
        Commands::Match { path } => {
            let records = open_store(&config)?.identities()?;
            let matcher = IdentityMatcher::new(detector(&config));
            let outcome = matcher
                .match_face(&path, &records)
                .with_context(|| format!("matching {}", path.display()))?;
            match outcome {
                MatchOutcome::Matched(r) => println!("Matched: {} ({})", r.name, r.worker_id),
                MatchOutcome::NoMatch => println!("No match"),
                MatchOutcome::NoFaceDetected => println!("No face detected"),
            }
        }
        Commands::Attendance { date, json } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let marks = open_store(&config)?.attendance_on(date)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&marks)?);
            } else if marks.is_empty() {
                println!("No attendance on {date}");
            } else {
                println!("Attendance on {date}:");
                for m in &marks {
                    println!("  {}  {}", m.timestamp.format("%H:%M:%S"), m.name);
                }
            }
        }
        Commands::Mark { name } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("name is empty");
            }
            let mut store = open_store(&config)?;
            let now = Local::now();
            match record_attendance(name, now.date_naive(), now, &mut store)? {
                AttendanceOutcome::Recorded(mark) => {
                    println!("Marked {} on {}", mark.name, mark.date)
                }
                AttendanceOutcome::Duplicate => println!("{name} is already marked today"),
            }
        }
        Commands::Test => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in &devices {
                println!("{}  {} [{}] {}", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn register(config: &Config, worker_id: &str, name: &str, photo: &Path) -> Result<()> {
    let photo = std::fs::canonicalize(photo)
        .with_context(|| format!("photo not found: {}", photo.display()))?;

    let faces = detector(config)
        .detect(&photo)
        .with_context(|| format!("detecting landmarks in {}", photo.display()))?;
    let Some(face) = faces.first() else {
        bail!("no face found in {}", photo.display());
    };
    if faces.len() > 1 {
        tracing::warn!(count = faces.len(), "several faces in photo, using the first");
    }
    if let Err(reason) = signature_of(face) {
        bail!("face in {} is not usable: {reason}", photo.display());
    }

    let record = open_store(config)?.register(worker_id, name, &photo)?;
    println!("Registered {} ({})", record.name, record.worker_id);
    Ok(())
}

fn detector(config: &Config) -> SidecarDetector {
    match &config.sidecar_dir {
        Some(dir) => SidecarDetector::with_dir(dir),
        None => SidecarDetector::new(),
    }
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("opening store at {}", config.db_path.display()))
}
