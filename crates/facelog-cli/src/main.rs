use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use facelog_core::{load_face_detector, store, Config};
use tracing_subscriber::EnvFilter;

mod attend;
mod capture;
mod report;
mod session;
mod train;

use session::SessionArgs;

#[derive(Parser)]
#[command(name = "facelog", about = "Face-recognition attendance logger", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user and capture face samples for training
    Capture {
        /// Numeric user ID
        #[arg(long)]
        user_id: u32,
        /// Display name
        #[arg(long)]
        name: String,
        /// Number of samples to save [default: 100]
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        samples: Option<u64>,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Train the recognizer on every captured sample
    Train,
    /// Recognize faces and mark attendance
    Attend {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// List registered users
    Users,
    /// Show a day's attendance
    Report {
        /// Day to show, YYYY-MM-DD [default: today]
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Capture {
            user_id,
            name,
            samples,
            session: args,
        } => {
            let samples = samples.map_or(config.samples_default, |n| n as usize);

            store::ensure_dirs(&config)?;
            let detector = load_face_detector(&config).context("failed to load face detector")?;
            let dataset_dir = capture::register_user(&config, user_id, &name)?;

            let mut source = session::open_source(&config, &args)?;
            let mut preview = session::open_preview("facelog capture", &args, session::quit_flag()?);
            let summary = capture::record(
                &dataset_dir,
                user_id,
                samples,
                &detector,
                &mut *source,
                &mut *preview,
            )?;
            println!("Saved {} sample(s) for {name} (ID {user_id})", summary.saved);
            if summary.stop != session::StopReason::Completed && summary.saved < samples {
                println!("Stopped early; {samples} requested. Run capture again to add more.");
            }
        }
        Commands::Train => {
            let summary = train::run(&config)?;
            println!(
                "Trained on {} image(s) from {} user(s)",
                summary.images,
                summary.per_user.len()
            );
        }
        Commands::Attend { session: args } => {
            store::ensure_dirs(&config)?;
            let Some((recognizer, labels)) = attend::preflight(&config)? else {
                return Ok(());
            };
            let detector = load_face_detector(&config).context("failed to load face detector")?;

            let mut source = session::open_source(&config, &args)?;
            let mut preview = session::open_preview("facelog attend", &args, session::quit_flag()?);
            let (summary, _) = attend::run(
                &config,
                &recognizer,
                &labels,
                &detector,
                &mut *source,
                &mut *preview,
            )?;
            println!(
                "Processed {} frame(s), {} new attendance record(s)",
                summary.frames, summary.rows_written
            );
        }
        Commands::Users => {
            report::print_users(&report::users(&config)?);
        }
        Commands::Report { date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            report::print_report(date, &report::report(&config, date)?);
        }
    }

    Ok(())
}
