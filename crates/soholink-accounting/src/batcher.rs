//! Periodic Merkle commitments over the current day's log lines.
//!
//! Every tick the batcher reads today's day-file, builds a SHA3-256 Merkle
//! tree over its non-empty lines in file order, and writes one batch record
//! to `<merkle_dir>/YYYY-MM-DDTHH.batch.json`. Batches within a day are
//! cumulative snapshots; a later batch commits a superset of an earlier one.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use soholink_crypto::MerkleTree;

use crate::collector::LOG_EXTENSION;
use crate::event::rfc3339_millis;
use crate::Result;

/// Metadata of one Merkle batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub source_file: String,
    /// Hex of the 32-byte SHA3-256 root.
    pub root_hash: String,
    pub leaf_count: usize,
    pub tree_height: usize,
}

/// Builds Merkle batches from accounting day-files on a fixed cadence.
pub struct Batcher {
    accounting_dir: PathBuf,
    merkle_dir: PathBuf,
    interval: Duration,
}

impl Batcher {
    pub fn new(accounting_dir: &Path, merkle_dir: &Path, interval: Duration) -> Result<Self> {
        fs::create_dir_all(merkle_dir)?;
        Ok(Self {
            accounting_dir: accounting_dir.to_path_buf(),
            merkle_dir: merkle_dir.to_path_buf(),
            interval,
        })
    }

    /// Build one batch from today's log file. A missing or empty file is a
    /// no-op, reported as `None`.
    pub fn build_batch(&self) -> Result<Option<BatchRecord>> {
        let now = Utc::now();
        let source_file = format!("{}.{LOG_EXTENSION}", now.format("%Y-%m-%d"));
        let log_path = self.accounting_dir.join(&source_file);

        if !log_path.exists() {
            return Ok(None);
        }

        let leaves = read_log_lines(&log_path)?;
        if leaves.is_empty() {
            return Ok(None);
        }

        let tree = MerkleTree::new(&leaves)?;

        let record = BatchRecord {
            timestamp: now,
            source_file,
            root_hash: tree.root_hex(),
            leaf_count: tree.leaf_count(),
            tree_height: tree.height(),
        };

        let batch_path = self
            .merkle_dir
            .join(format!("{}.batch.json", now.format("%Y-%m-%dT%H")));
        fs::write(&batch_path, serde_json::to_vec_pretty(&record)?)?;

        info!(
            batch = %batch_path.display(),
            leaves = record.leaf_count,
            root = %record.root_hash,
            "Merkle batch created"
        );

        Ok(Some(record))
    }

    /// Run `build_batch` every interval until cancelled. Build failures are
    /// logged and the loop continues.
    pub async fn start(&self, shutdown: CancellationToken) {
        let interval = if self.interval.is_zero() {
            Duration::from_secs(3600)
        } else {
            self.interval
        };

        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.build_batch() {
                        warn!(error = %e, "Merkle batch failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Merkle batcher shutting down");
                    return;
                }
            }
        }
    }

    /// The most recent batch record, by lexicographic file-name order, or
    /// `None` if no batch exists yet.
    pub fn latest_batch(&self) -> Result<Option<BatchRecord>> {
        let mut batch_files: Vec<PathBuf> = fs::read_dir(&self.merkle_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".batch.json"))
            })
            .collect();

        batch_files.sort();

        let Some(latest) = batch_files.last() else {
            return Ok(None);
        };

        let record: BatchRecord = serde_json::from_slice(&fs::read(latest)?)?;
        Ok(Some(record))
    }
}

/// Read non-empty lines of a JSONL file as raw byte leaves, preserving
/// file order.
fn read_log_lines(path: &Path) -> Result<Vec<Vec<u8>>> {
    let reader = BufReader::new(File::open(path)?);

    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.is_empty() {
            lines.push(line.into_bytes());
        }
    }

    Ok(lines)
}
