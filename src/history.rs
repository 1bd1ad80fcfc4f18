use crate::engine::DetectionResult;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{info, warn};

/// A delivered result with its arrival order and time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: DetectionResult,
}

/// Bounded trailing list of results, oldest evicted first.
#[derive(Debug, Clone)]
pub struct ResultHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_seq: u64,
    anomalies: u64,
}

impl ResultHistory {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(cap),
            capacity: cap,
            next_seq: 0,
            anomalies: 0,
        }
    }

    pub fn record(&mut self, result: DetectionResult) -> &HistoryEntry {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        if result.is_anomaly {
            self.anomalies += 1;
        }
        self.entries.push_back(HistoryEntry {
            seq: self.next_seq,
            received_at: Utc::now(),
            result,
        });
        self.next_seq += 1;
        &self.entries[self.entries.len() - 1]
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Results seen over the whole run, including evicted ones.
    pub fn total_seen(&self) -> u64 {
        self.next_seq
    }

    pub fn anomalies_seen(&self) -> u64 {
        self.anomalies
    }
}

pub type SharedHistory = Arc<Mutex<ResultHistory>>;

pub fn shared_history(capacity: usize) -> SharedHistory {
    Arc::new(Mutex::new(ResultHistory::new(capacity)))
}

/// Consumer thread that drains the result channel into a shared history.
pub struct HistoryRecorder;

impl HistoryRecorder {
    /// Runs until every sender is dropped.
    pub fn spawn(rx: Receiver<DetectionResult>, history: SharedHistory) -> thread::JoinHandle<u64> {
        thread::Builder::new()
            .name("history-recorder".into())
            .spawn(move || {
                info!("History recorder active.");
                let mut received = 0u64;

                while let Ok(result) = rx.recv() {
                    received += 1;
                    let mut guard = history.lock().unwrap_or_else(PoisonError::into_inner);
                    let entry = guard.record(result);
                    if entry.result.is_anomaly {
                        warn!(
                            seq = entry.seq,
                            value = entry.result.value,
                            score = ?entry.result.score,
                            "ANOMALY"
                        );
                    }
                }

                info!(received, "History recorder stopped.");
                received
            })
            .expect("Failed to spawn history recorder thread")
    }
}
