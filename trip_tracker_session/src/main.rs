use std::{fs::OpenOptions, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trip_tracker_session::{
    events::TrackerEvent,
    export,
    geonames::{CountryLookup, NoLookup, PlaceLookup},
    gpx_util, TrackerConfig, TripController,
};

// CLI for replaying recorded tracks through the tracker
#[derive(Parser)]
#[command(name = "tracker", version, about = "Trip tracker: replay GPS tracks and inspect trip logs")]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a GPX track as if it came from the device and write the trip log
    Replay(ReplayArgs),

    /// Print a summary of an exported trip log
    Inspect {
        path: PathBuf,
    },
}

#[derive(Args)]
struct ReplayArgs {
    /// GPX file to play back
    gpx: PathBuf,

    #[arg(long)]
    name: String,

    /// key = value config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for the trip log
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    min_movement: Option<f64>,

    /// GeoJSON country outlines used to label samples
    #[arg(long)]
    countries: Option<PathBuf>,

    /// Also write the trip as GPX next to the log
    #[arg(long)]
    gpx_out: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=debug,trip_tracker_session=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    match cli.command {
        Command::Replay(args) => replay(args).await,
        Command::Inspect { path } => inspect(path).await,
    }
}

async fn replay(args: ReplayArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(interval_ms) = args.interval_ms {
        config.sample_interval = Duration::from_millis(interval_ms);
    }
    if let Some(min_movement) = args.min_movement {
        config.min_movement_m = min_movement;
    }
    if let Some(out) = args.out {
        config.output_dir = out;
    }
    config.validate()?;

    let source = Arc::new(gpx_util::replay_source(&args.gpx, config.replay_accuracy_m)
        .with_context(|| format!("Failed to read {:?}", args.gpx))?);
    tracing::info!("Replaying {} points from {:?}", source.remaining(), args.gpx);

    let lookup: Arc<dyn PlaceLookup> = match &args.countries {
        Some(path) => Arc::new(CountryLookup::from_file(path).with_context(|| format!("Failed to load countries from {:?}", path))?),
        None => Arc::new(NoLookup),
    };

    let output_dir = config.output_dir.clone();
    let mut controller = TripController::new(source.clone(), lookup, config);
    let mut events = controller.subscribe();

    controller.set_name(&args.name).await?;
    controller.capture_midpoint().await.context("No fix in the track was accurate enough for a midpoint")?;
    controller.start().await?;

    // Run until the tick that consumed the last point has reported its outcome
    loop {
        match events.recv().await {
            Ok(TrackerEvent::TrackingHalted { reason, .. }) => {
                tracing::error!("Tracking halted: {}", reason);
                break;
            }
            Ok(TrackerEvent::SampleAccepted { .. } | TrackerEvent::SampleRejected(_) | TrackerEvent::AttemptFailed { .. })
                if source.is_exhausted() =>
            {
                break;
            }
            Ok(event) => tracing::trace!("{:?}", event),
            Err(RecvError::Lagged(missed)) => tracing::warn!("Missed {} tracker events", missed),
            Err(RecvError::Closed) => break,
        }
    }

    let record = match controller.stop().await {
        Ok(record) => record,
        Err(_) => controller.record().await.context("Trip ended without a record")?,
    };
    controller.join_tracking().await;

    let log_path = export::save_record(&record, &output_dir).await?;
    if args.gpx_out {
        let gpx_path = log_path.with_extension("gpx");
        gpx_util::write_gpx(&record, &gpx_path)?;
        tracing::info!("GPX written to {:?}", gpx_path);
    }

    println!(
        "{}: {:.3} km, {} samples -> {}",
        record.name,
        record.total_distance_km(),
        record.samples.len(),
        log_path.display()
    );

    Ok(())
}

async fn inspect(path: PathBuf) -> anyhow::Result<()> {
    let record = export::load_record(&path).await.with_context(|| format!("Failed to read trip log {:?}", path))?;

    println!("{}", record.name);
    println!("  distance: {:.3} km", record.total_distance_km());
    println!("  midpoint: {}, {}", record.midpoint.lat, record.midpoint.lon);
    println!("  samples:  {}", record.samples.len());
    if let Some(duration) = record.duration() {
        println!("  duration: {} s", duration.num_seconds());
    }

    Ok(())
}
