//! Ingestion loop
//!
//! Pulls from a measurement source at a fixed pace, feeds the engine and
//! offers each result to a bounded channel. There is no queue between the
//! source and the engine, so the pace alone bounds throughput; a consumer
//! that falls behind loses results instead of growing memory.

use crate::config::StreamConfig;
use crate::engine::{DetectionEngine, DetectionResult};
use crate::error::StreamError;
use crate::metrics;
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Any measurement source the host can own and hand between runs.
pub type BoxedSource = Box<dyn Iterator<Item = Option<f64>> + Send>;

/// Why the loop ended.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
    Cancelled,
    SourceExhausted,
    ConsumerGone,
}

/// Counters for one run of the ingestion loop.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    /// Items taken from the source, absent ones included
    pub pulled: u64,
    pub absent: u64,
    /// Results handed to the channel
    pub emitted: u64,
    /// Results lost to a full channel
    pub dropped: u64,
    pub anomalies: u64,
    pub exit: LoopExit,
}

pub struct StreamRunner;

impl StreamRunner {
    /// Run the loop on a dedicated thread until cancellation, source
    /// exhaustion, or every receiver is dropped.
    pub fn spawn<S>(
        engine: Arc<DetectionEngine>,
        source: S,
        config: StreamConfig,
        results: Sender<DetectionResult>,
        cancel: CancellationToken,
    ) -> std::io::Result<thread::JoinHandle<LoopReport>>
    where
        S: Iterator<Item = Option<f64>> + Send + 'static,
    {
        thread::Builder::new()
            .name("ingestion-loop".into())
            .spawn(move || {
                let interval = Duration::from_millis(config.interval_ms);
                let report = run(&engine, source, interval, &results, &cancel);
                info!(
                    pulled = report.pulled,
                    emitted = report.emitted,
                    dropped = report.dropped,
                    anomalies = report.anomalies,
                    exit = ?report.exit,
                    "Ingestion loop stopped."
                );
                report
            })
    }
}

/// Pulls from a source that stays with the host between runs.
struct SharedSource(Arc<Mutex<BoxedSource>>);

impl Iterator for SharedSource {
    type Item = Option<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).next()
    }
}

/// Start/stop state of the ingestion loop, as reported over the API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamStatus {
    pub running: bool,
    /// Runs started since the host came up
    pub runs: u64,
    /// Report of the most recently finished run
    pub last: Option<LoopReport>,
}

struct ActiveRun {
    cancel: CancellationToken,
    handle: thread::JoinHandle<LoopReport>,
}

struct RunState {
    active: Option<ActiveRun>,
    results: Option<Sender<DetectionResult>>,
    runs: u64,
    last: Option<LoopReport>,
}

/// Host-owned ingestion loop that can be stopped and started again.
///
/// The source, engine and result channel outlive any single run, so a
/// restart resumes the same source where the previous run left it and the
/// window and model are untouched. Every run's token is a child of the
/// host's shutdown token.
pub struct StreamControl {
    engine: Arc<DetectionEngine>,
    source: Arc<Mutex<BoxedSource>>,
    config: StreamConfig,
    shutdown: CancellationToken,
    state: Mutex<RunState>,
}

impl StreamControl {
    /// Create a stopped loop; call [`StreamControl::start`] to run it.
    pub fn new(
        engine: Arc<DetectionEngine>,
        source: BoxedSource,
        config: StreamConfig,
        results: Sender<DetectionResult>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            source: Arc::new(Mutex::new(source)),
            config,
            shutdown,
            state: Mutex::new(RunState {
                active: None,
                results: Some(results),
                runs: 0,
                last: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a run over the current source. Starting a running loop is a no-op.
    pub fn start(&self) -> Result<StreamStatus, StreamError> {
        let mut state = self.lock();
        reap(&mut state);

        if state.active.is_some() {
            debug!("Start requested while running.");
            return Ok(status_of(&state));
        }
        let results = match (&state.results, self.shutdown.is_cancelled()) {
            (Some(tx), false) => tx.clone(),
            _ => return Err(StreamError::ShuttingDown),
        };

        let cancel = self.shutdown.child_token();
        let handle = StreamRunner::spawn(
            self.engine.clone(),
            SharedSource(self.source.clone()),
            self.config.clone(),
            results,
            cancel.clone(),
        )
        .map_err(StreamError::Spawn)?;

        state.runs += 1;
        state.active = Some(ActiveRun { cancel, handle });
        info!(run = state.runs, "Ingestion started.");
        Ok(status_of(&state))
    }

    /// Cancel the current run and wait for it. Stopping a stopped loop is a no-op.
    pub fn stop(&self) -> StreamStatus {
        let mut state = self.lock();
        if let Some(run) = state.active.take() {
            run.cancel.cancel();
            finish_run(&mut state, run.handle);
            info!(run = state.runs, "Ingestion stopped.");
        }
        status_of(&state)
    }

    /// Block until the current run ends on its own, then report.
    pub fn wait(&self) -> StreamStatus {
        let run = self.lock().active.take();
        if let Some(run) = run {
            let joined = run.handle.join();
            let mut state = self.lock();
            record(&mut state, joined);
        }
        self.status()
    }

    /// Stop for good: no further starts, and the result channel closes once
    /// the last run is joined.
    pub fn shutdown(&self) -> StreamStatus {
        self.shutdown.cancel();
        let status = self.stop();
        self.lock().results = None;
        status
    }

    pub fn status(&self) -> StreamStatus {
        let mut state = self.lock();
        reap(&mut state);
        status_of(&state)
    }

    pub fn engine(&self) -> &Arc<DetectionEngine> {
        &self.engine
    }
}

/// Collect a run that ended by itself (source exhausted, consumer gone).
fn reap(state: &mut RunState) {
    if state.active.as_ref().is_some_and(|run| run.handle.is_finished()) {
        if let Some(run) = state.active.take() {
            finish_run(state, run.handle);
        }
    }
}

fn finish_run(state: &mut RunState, handle: thread::JoinHandle<LoopReport>) {
    let joined = handle.join();
    record(state, joined);
}

fn record(state: &mut RunState, joined: thread::Result<LoopReport>) {
    match joined {
        Ok(report) => state.last = Some(report),
        Err(_) => error!("Ingestion thread panicked."),
    }
}

fn status_of(state: &RunState) -> StreamStatus {
    StreamStatus {
        running: state.active.is_some(),
        runs: state.runs,
        last: state.last,
    }
}

/// Drive `source` through `engine` on the calling thread.
pub fn run<S>(
    engine: &DetectionEngine,
    mut source: S,
    interval: Duration,
    results: &Sender<DetectionResult>,
    cancel: &CancellationToken,
) -> LoopReport
where
    S: Iterator<Item = Option<f64>>,
{
    let mut report = LoopReport {
        pulled: 0,
        absent: 0,
        emitted: 0,
        dropped: 0,
        anomalies: 0,
        exit: LoopExit::SourceExhausted,
    };

    info!(interval_ms = interval.as_millis() as u64, "Ingestion loop active.");

    loop {
        if cancel.is_cancelled() {
            report.exit = LoopExit::Cancelled;
            break;
        }

        let Some(measurement) = source.next() else {
            report.exit = LoopExit::SourceExhausted;
            break;
        };
        report.pulled += 1;

        match engine.ingest(measurement) {
            None => report.absent += 1,
            Some(result) => {
                if result.is_anomaly {
                    report.anomalies += 1;
                }
                match results.try_send(result) {
                    Ok(()) => report.emitted += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        metrics::DROPPED_TOTAL.inc();
                        debug!("Result channel full; dropping result.");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        report.exit = LoopExit::ConsumerGone;
                        break;
                    }
                }
            }
        }

        if !interval.is_zero() && pause(interval, cancel) {
            report.exit = LoopExit::Cancelled;
            break;
        }
    }

    report
}

/// Sleep for `interval`, waking early on cancellation. Returns true if
/// cancelled.
fn pause(interval: Duration, cancel: &CancellationToken) -> bool {
    const SLICE: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + interval;

    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
}
