//! SoHoLINK Accounting
//!
//! The audit trail of the node: structured events appended to rotating
//! JSONL day-files, gzip compaction of old files, and periodic Merkle
//! commitments over the current day's lines.

pub mod batcher;
pub mod collector;
pub mod compactor;
pub mod event;

pub use batcher::{BatchRecord, Batcher};
pub use collector::Collector;
pub use compactor::compress_old_logs;
pub use event::{AccountingEvent, Decision, EventType};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Merkle error: {0}")]
    Merkle(#[from] soholink_crypto::CryptoError),

    #[error("collector is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, AccountingError>;
