//! Sharded worker tasks around a [`Scanner`].
//!
//! Every (symbol, timeframe) stream hashes to exactly one shard, so its
//! candles are processed in arrival order by a single task while other
//! streams run in parallel on the other shards.

use log::{debug, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::candle::{Candle, StreamKey};
use super::orchestrator::Scanner;
use crate::alerts::AlertQueue;
use crate::error::ScanError;

pub struct ScannerRuntime {
    shards: Vec<mpsc::Sender<Candle>>,
    workers: Vec<JoinHandle<()>>,
}

impl ScannerRuntime {
    pub fn spawn(
        scanner: Arc<Scanner>,
        alerts: Arc<AlertQueue>,
        shard_count: usize,
        shard_buffer: usize,
    ) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);

        for id in 0..shard_count {
            let (tx, rx) = mpsc::channel(shard_buffer.max(1));
            shards.push(tx);
            workers.push(tokio::spawn(run_shard(
                id,
                scanner.clone(),
                alerts.clone(),
                rx,
            )));
        }

        Self { shards, workers }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, key: &StreamKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queues a candle on its stream's shard, waiting if that shard is full.
    pub async fn dispatch(&self, candle: Candle) -> Result<(), ScanError> {
        let shard = self.shard_for(&candle.key());
        self.shards[shard]
            .send(candle)
            .await
            .map_err(|_| ScanError::ShardClosed(shard))
    }

    /// Queues a candle without waiting. A full shard drops the candle and
    /// leaves the other shards unaffected; the stream resets on its next bar.
    pub fn try_dispatch(&self, candle: Candle) -> Result<(), ScanError> {
        let shard = self.shard_for(&candle.key());
        match self.shards[shard].try_send(candle) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(candle)) => Err(ScanError::ShardFull {
                shard,
                symbol: candle.symbol,
                timeframe: candle.timeframe,
            }),
            Err(TrySendError::Closed(_)) => Err(ScanError::ShardClosed(shard)),
        }
    }

    /// Closes the shard channels and waits for queued candles to be processed.
    pub async fn shutdown(self) {
        drop(self.shards);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(target: "feed", "scanner shard panicked: {}", e);
            }
        }
    }
}

async fn run_shard(
    id: usize,
    scanner: Arc<Scanner>,
    alerts: Arc<AlertQueue>,
    mut rx: mpsc::Receiver<Candle>,
) {
    while let Some(candle) = rx.recv().await {
        match scanner.process(&candle) {
            Ok(outcome) => {
                for alert in outcome.alerts {
                    alerts.push(alert);
                }
            }
            Err(e) => warn!(target: "feed", "shard {} dropped candle: {}", id, e),
        }
    }
    debug!(target: "feed", "shard {} stopped", id);
}

/// Periodically evicts expired dedup records.
pub fn spawn_sweeper(scanner: Arc<Scanner>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every.max(Duration::from_secs(1)));
        timer.tick().await;
        loop {
            timer.tick().await;
            let removed = scanner.sweep(chrono::Utc::now().timestamp_millis());
            if removed > 0 {
                debug!(target: "rule", "swept {} cooldown record(s)", removed);
            }
        }
    })
}
