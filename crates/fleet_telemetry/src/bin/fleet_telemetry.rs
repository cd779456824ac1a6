//! fleet-telemetry - ingest telemetry files, route them and persist the result.
//!
//! `run` processes CSV files end to end inside one process: rows are routed
//! over in-process channels (or Redis lists when configured) and drained into
//! the record store. The other subcommands operate on a single stage.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_telemetry::{
    BatchSummary, FileSummary, LoggingConfig, PipelineSettings, RecordStore, TelemetryPipeline,
};

#[derive(Parser, Debug)]
#[command(
    name = "fleet-telemetry",
    version,
    about = "Vehicle telemetry ingestion, priority routing and persistence"
)]
struct Args {
    /// TOML settings file; environment variables prefixed TELEMETRY__ override it
    #[arg(long, short, value_name = "PATH", env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest CSV files, route every record and persist what was routed
    Run {
        /// Telemetry CSV files
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Persist one consumer batch envelope ({"Records": [...]})
    Consume {
        /// Batch JSON file
        #[arg(value_name = "FILE")]
        batch: PathBuf,
    },

    /// Load a {vehicle_id: metadata} document into the metadata cache
    SeedMetadata {
        /// Metadata JSON file
        #[arg(value_name = "FILE")]
        metadata: PathBuf,
    },

    /// Remove persisted records whose expiry has passed
    PurgeExpired,

    /// Print the effective settings as TOML
    ShowConfig,
}

/// Outcome of `run`
#[derive(Debug, Serialize)]
struct RunReport {
    files: Vec<FileReport>,
    persisted_high: BatchSummary,
    persisted_low: BatchSummary,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum FileReport {
    Processed(FileSummary),
    Faulted { source: String, error: String },
}

fn init_tracing(logging: &LoggingConfig, force_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if force_json || logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = PipelineSettings::load(args.config.as_deref())
        .with_context(|| format!("loading settings from {:?}", args.config))?;
    init_tracing(&settings.logging, args.log_json);

    tracing::info!("fleet-telemetry v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Run { files } => run(settings, files).await,
        Command::Consume { batch } => consume(settings, batch).await,
        Command::SeedMetadata { metadata } => seed_metadata(settings, metadata).await,
        Command::PurgeExpired => purge_expired(settings).await,
        Command::ShowConfig => {
            print!("{}", settings.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(settings: PipelineSettings, files: Vec<PathBuf>) -> Result<()> {
    let pipeline = TelemetryPipeline::new(settings).await?;
    let sources: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();

    #[cfg(feature = "redis")]
    {
        if let Some((high, low)) = pipeline.redis_channels()? {
            tracing::info!("Routing to Redis lists, records are persisted by a separate consumer");
            let processor = pipeline.file_processor(high, low);
            let results = processor.process_files(files).await;
            return report(RunReport {
                files: file_reports(&sources, results),
                persisted_high: BatchSummary::default(),
                persisted_low: BatchSummary::default(),
            });
        }
    }

    let store: Arc<dyn RecordStore> = Arc::new(pipeline.open_store().await?);
    let consumer = Arc::new(pipeline.consumer(store));
    let batch_size = usize::try_from(pipeline.settings().pipeline.consumer_batch_size)?;
    let (processor, mut high_rx, mut low_rx) = pipeline.in_process_channels();

    let high_consumer = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.consume(&mut high_rx, batch_size).await })
    };
    let low_consumer = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.consume(&mut low_rx, batch_size).await })
    };

    let results = processor.process_files(files).await;
    // Closing the channels lets the consumers finish
    drop(processor);

    let persisted_high = high_consumer.await?;
    let persisted_low = low_consumer.await?;

    report(RunReport {
        files: file_reports(&sources, results),
        persisted_high,
        persisted_low,
    })
}

fn file_reports(
    sources: &[String],
    results: Vec<fleet_telemetry::PipelineResult<FileSummary>>,
) -> Vec<FileReport> {
    sources
        .iter()
        .zip(results)
        .map(|(source, result)| match result {
            Ok(summary) => FileReport::Processed(summary),
            Err(e) => FileReport::Faulted {
                source: source.clone(),
                error: e.to_string(),
            },
        })
        .collect()
}

fn report(run: RunReport) -> Result<()> {
    print_json(&run)?;

    let faulted = run
        .files
        .iter()
        .filter(|f| matches!(f, FileReport::Faulted { .. }))
        .count();
    if faulted > 0 {
        return Err(anyhow!("{faulted} of {} files faulted", run.files.len()));
    }
    Ok(())
}

async fn consume(settings: PipelineSettings, batch: PathBuf) -> Result<()> {
    let envelope = tokio::fs::read_to_string(&batch)
        .await
        .with_context(|| format!("reading {}", batch.display()))?;

    let pipeline = TelemetryPipeline::new(settings).await?;
    let consumer = pipeline.consumer(Arc::new(pipeline.open_store().await?));
    let summary = consumer.handle_batch(&envelope).await?;

    print_json(&summary)
}

async fn seed_metadata(settings: PipelineSettings, metadata: PathBuf) -> Result<()> {
    if !settings.cache.enable_redis {
        tracing::warn!("cache.enable_redis is off, seeded metadata only lives for this process");
    }

    let file = std::fs::File::open(&metadata)
        .with_context(|| format!("opening {}", metadata.display()))?;
    let pipeline = TelemetryPipeline::new(settings).await?;
    let seeded = pipeline
        .metadata()
        .seed_from_reader(std::io::BufReader::new(file))
        .await?;

    print_json(&serde_json::json!({ "seeded": seeded }))
}

async fn purge_expired(settings: PipelineSettings) -> Result<()> {
    let pipeline = TelemetryPipeline::new(settings).await?;
    let store = pipeline.open_store().await?;
    let purged = store.purge_expired(chrono::Utc::now().timestamp())?;
    let stats = store.stats()?;

    print_json(&serde_json::json!({ "purged": purged, "remaining": stats.record_count }))
}
