//! stream-detector - sliding-window anomaly detection host
//!
//! Usage:
//!   stream-detector run --capacity 100 --sensitivity 0.05 --port 8080
//!   stream-detector run --input readings.txt --interval-ms 0 --no-api
//!   stream-detector replay --input readings.txt --anomalies-only
//!   stream-detector routes
//!
//! While `run` serves the control API, POST /stream/stop pauses ingestion
//! and POST /stream/start resumes it from the same source.

use anomaly_stream::api::{self, AppState};
use anomaly_stream::config::AppConfig;
use anomaly_stream::controller::SensitivityController;
use anomaly_stream::engine::DetectionEngine;
use anomaly_stream::history::{HistoryRecorder, shared_history};
use anomaly_stream::metrics;
use anomaly_stream::source::{ReplaySource, SyntheticSource};
use anomaly_stream::stream::{BoxedSource, StreamControl};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::bounded;
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stream-detector")]
#[command(about = "Real-time anomaly detection over a sliding window of measurements")]
struct Cli {
    /// JSON config file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream paced measurements through the detector with an HTTP control API
    Run {
        #[command(flatten)]
        engine: EngineArgs,

        /// Read newline-delimited readings instead of generating them
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Pause between readings in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Number of synthetic readings
        #[arg(long)]
        points: Option<usize>,

        /// Trailing results kept for /history
        #[arg(long)]
        history: Option<usize>,

        /// Host to bind the control API to
        #[arg(long)]
        host: Option<String>,

        /// Port for the control API
        #[arg(short, long)]
        port: Option<u16>,

        /// Stream without the control API and exit when the source ends
        #[arg(long)]
        no_api: bool,
    },

    /// Classify readings from a file or stdin as fast as possible
    Replay {
        #[command(flatten)]
        engine: EngineArgs,

        /// Input file; reads stdin when omitted or "-"
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "json-lines")]
        format: OutputFormat,

        /// Only print anomalous results
        #[arg(long)]
        anomalies_only: bool,
    },

    /// List control API routes
    Routes,
}

#[derive(Args)]
struct EngineArgs {
    /// Sliding window capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Expected anomaly proportion (0.01 to 0.5)
    #[arg(short, long)]
    sensitivity: Option<f64>,

    /// Seed for reproducible forests and synthetic data
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    JsonLines,
    Pretty,
}

impl EngineArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(capacity) = self.capacity {
            config.engine.window_capacity = capacity;
        }
        if let Some(sensitivity) = self.sensitivity {
            config.engine.sensitivity = sensitivity;
        }
        if let Some(seed) = self.seed {
            config.engine.seed = Some(seed);
            config.source.seed = Some(seed);
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => match AppConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Could not load config.");
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };

    let outcome = match cli.command {
        Commands::Run {
            engine,
            input,
            interval_ms,
            points,
            history,
            host,
            port,
            no_api,
        } => {
            engine.apply(&mut config);
            if let Some(ms) = interval_ms {
                config.stream.interval_ms = ms;
            }
            if let Some(n) = points {
                config.source.num_points = n;
            }
            if let Some(n) = history {
                config.stream.history_capacity = n;
            }
            if let Some(h) = host {
                config.api.host = h;
            }
            if let Some(p) = port {
                config.api.port = p;
            }
            if no_api {
                config.api.enabled = false;
            }
            run_stream(config, input).await
        }
        Commands::Replay {
            engine,
            input,
            format,
            anomalies_only,
        } => {
            engine.apply(&mut config);
            match tokio::task::spawn_blocking(move || {
                run_replay(config, input, format, anomalies_only)
            })
            .await
            {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            }
        }
        Commands::Routes => {
            for (method, path, desc) in api::api_routes() {
                println!("{:6} {:14} {}", method, path, desc);
            }
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "stream-detector failed.");
            ExitCode::FAILURE
        }
    }
}

fn open_input(input: Option<PathBuf>) -> Result<Box<dyn BufRead + Send>, std::io::Error> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            Ok(Box::new(BufReader::new(std::fs::File::open(path)?)))
        }
        _ => Ok(Box::new(BufReader::new(std::io::stdin()))),
    }
}

async fn run_stream(config: AppConfig, input: Option<PathBuf>) -> CliResult {
    config.validate()?;
    metrics::init();

    let source: BoxedSource = match input {
        Some(path) => Box::new(ReplaySource::new(open_input(Some(path))?)),
        None => Box::new(SyntheticSource::new(config.source.clone())?),
    };

    let engine = Arc::new(DetectionEngine::with_config(&config.engine)?);
    let controller = SensitivityController::new(engine.clone());
    let history = shared_history(config.stream.history_capacity);

    info!(
        capacity = config.engine.window_capacity,
        sensitivity = config.engine.sensitivity,
        interval_ms = config.stream.interval_ms,
        "Starting detection stream."
    );

    let (tx, rx) = bounded(config.stream.channel_capacity);
    let recorder = HistoryRecorder::spawn(rx, history.clone());
    let shutdown = CancellationToken::new();
    let stream = Arc::new(StreamControl::new(
        engine.clone(),
        source,
        config.stream.clone(),
        tx,
        shutdown.clone(),
    ));
    stream.start()?;

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down... (stopping ingestion loop)");
            interrupt.cancel();
        }
    });

    if config.api.enabled {
        let app = api::router(AppState {
            controller,
            history: history.clone(),
            stream: stream.clone(),
        });
        let addr = config.api.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, "Control API listening.");

        // keeps serving while stopped or exhausted, until interrupted
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await?;
    } else {
        let waiting = stream.clone();
        tokio::task::spawn_blocking(move || waiting.wait()).await?;
    }

    let closing = stream.clone();
    let status = tokio::task::spawn_blocking(move || closing.shutdown()).await?;

    // every sender is gone now, so the recorder drains and exits
    let recorded = tokio::task::spawn_blocking(move || recorder.join())
        .await?
        .map_err(|_| "history recorder panicked")?;

    let stats = engine.stats();
    info!(
        runs = status.runs,
        last_exit = ?status.last.map(|report| report.exit),
        ingested = stats.ingested,
        skipped = stats.skipped,
        anomalies = stats.anomalies,
        recorded,
        trainings = stats.trainings,
        "Stream finished."
    );
    Ok(())
}

#[derive(Serialize)]
struct ReplaySummary {
    readings: u64,
    absent: u64,
    classified: u64,
    anomalies: u64,
    trainings: u64,
}

fn run_replay(
    config: AppConfig,
    input: Option<PathBuf>,
    format: OutputFormat,
    anomalies_only: bool,
) -> CliResult {
    config.engine.validate()?;
    let engine = DetectionEngine::with_config(&config.engine)?;
    let source = ReplaySource::new(open_input(input)?);

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let mut summary = ReplaySummary {
        readings: 0,
        absent: 0,
        classified: 0,
        anomalies: 0,
        trainings: 0,
    };

    for reading in source {
        summary.readings += 1;
        let Some(result) = engine.ingest(reading) else {
            summary.absent += 1;
            continue;
        };
        if result.score.is_some() {
            summary.classified += 1;
        }
        if result.is_anomaly {
            summary.anomalies += 1;
        }
        if anomalies_only && !result.is_anomaly {
            continue;
        }

        match format {
            OutputFormat::JsonLines => {
                serde_json::to_writer(&mut out, &result)?;
                writeln!(out)?;
            }
            OutputFormat::Pretty => {
                let flag = if result.is_anomaly { "ANOMALY" } else { "ok" };
                match result.score {
                    Some(score) => writeln!(out, "{:>14.4}  {:>7}  score={:.4}", result.value, flag, score)?,
                    None => writeln!(out, "{:>14.4}  {:>7}  (warming up)", result.value, flag)?,
                }
            }
        }
    }
    out.flush()?;

    summary.trainings = engine.training_count();
    let rendered = serde_json::to_string(&summary)?;
    info!(summary = %rendered, "Replay finished.");
    Ok(())
}
