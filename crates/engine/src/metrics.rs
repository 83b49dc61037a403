//! Rolling throughput metrics for the processing loop.
//!
//! Purely informational: a sliding window of block/row counts feeding a
//! periodic status line. Nothing here contributes to correctness.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tracing::info;

/// Samples older than this fall out of the rate window.
const WINDOW: Duration = Duration::from_secs(10);

/// Tracks rolling blocks-per-second and rows-per-second speeds.
#[derive(Debug, Default)]
pub struct Progress {
    samples: VecDeque<Sample>,
    total_blocks: u64,
    total_rows: u64,
}

#[derive(Debug)]
struct Sample {
    at: Instant,
    blocks: u64,
    rows: u64,
}

impl Progress {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record processed blocks and rows.
    pub fn record(&mut self, blocks: u64, rows: u64) {
        self.record_at(Instant::now(), blocks, rows);
    }

    fn record_at(&mut self, at: Instant, blocks: u64, rows: u64) {
        self.total_blocks += blocks;
        self.total_rows += rows;
        self.samples.push_back(Sample { at, blocks, rows });
        self.trim(at);
    }

    fn trim(&mut self, now: Instant) {
        while let Some(sample) = self.samples.front() {
            if now.duration_since(sample.at) <= WINDOW {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Total blocks recorded since startup.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn rates_at(&mut self, now: Instant) -> (u64, u64) {
        self.trim(now);
        let Some(oldest) = self.samples.front() else {
            return (0, 0);
        };
        // Clamp to one second so a sub-second burst doesn't explode the rate.
        let elapsed = now.duration_since(oldest.at).as_secs_f64().max(1.0);
        let blocks: u64 = self.samples.iter().map(|s| s.blocks).sum();
        let rows: u64 = self.samples.iter().map(|s| s.rows).sum();
        (
            (blocks as f64 / elapsed).round() as u64,
            (rows as f64 / elapsed).round() as u64,
        )
    }

    /// Emit a status line with current rolling speeds.
    pub fn report(&mut self) {
        let (blocks_per_sec, rows_per_sec) = self.rates_at(Instant::now());
        info!(
            blocks = self.total_blocks,
            rows = self.total_rows,
            blocks_per_sec,
            rows_per_sec,
            "progress"
        );
    }
}
