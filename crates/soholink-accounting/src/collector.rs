//! Rotating append-only event log.
//!
//! Events are written one JSON object per line to `<dir>/YYYY-MM-DD.jsonl`.
//! A mutex serializes writers; exactly one file is open at a time. The file
//! rotates when the UTC date changes and is synced to durable storage every
//! `SYNC_EVERY` events and on close.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};

use crate::event::AccountingEvent;
use crate::{AccountingError, Result};

/// File extension of uncompressed day-files.
pub const LOG_EXTENSION: &str = "jsonl";

/// Events between durability syncs.
const SYNC_EVERY: u64 = 100;

struct Inner {
    file: Option<File>,
    date: NaiveDate,
    count: u64,
}

/// Concurrent-safe accounting event writer.
pub struct Collector {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl Collector {
    /// Create a collector writing into `dir`, opening today's file.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let today = Utc::now().date_naive();
        let file = open_day_file(dir, today)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(Inner {
                file: Some(file),
                date: today,
                count: 0,
            }),
        })
    }

    /// Append one event. Rotates first when the UTC date has changed since
    /// the open file's date.
    pub fn record(&self, event: &AccountingEvent) -> Result<()> {
        let line = serde_json::to_vec(event)?;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.file.is_none() {
            return Err(AccountingError::Closed);
        }

        let today = Utc::now().date_naive();
        if today != inner.date {
            self.rotate(&mut inner, today)?;
        }

        inner.count += 1;
        let should_sync = inner.count % SYNC_EVERY == 0;

        let file = inner.file.as_mut().ok_or(AccountingError::Closed)?;
        file.write_all(&line)?;
        file.write_all(b"\n")?;

        if should_sync {
            file.sync_data()?;
        }

        Ok(())
    }

    fn rotate(&self, inner: &mut Inner, new_date: NaiveDate) -> Result<()> {
        if let Some(old) = inner.file.take() {
            let _ = old.sync_all();
        }

        inner.file = Some(open_day_file(&self.dir, new_date)?);
        inner.date = new_date;
        inner.count = 0;
        Ok(())
    }

    /// Path of the currently open day-file.
    pub fn current_file(&self) -> PathBuf {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        day_file_path(&self.dir, inner.date)
    }

    /// Events written to the current file since it was opened.
    pub fn event_count(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.count
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flush and close the current file. Records after close fail.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = inner.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

fn day_file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.{LOG_EXTENSION}", date.format("%Y-%m-%d")))
}

fn open_day_file(dir: &Path, date: NaiveDate) -> Result<File> {
    let path = day_file_path(dir, date);
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Decision, EventType};
    use std::io::BufRead;

    fn sample_event(username: &str) -> AccountingEvent {
        let mut event = AccountingEvent::new(EventType::AuthSuccess);
        event.username = username.to_string();
        event.decision = Some(Decision::Allow);
        event.reason = "authenticated".to_string();
        event
    }

    #[test]
    fn records_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(dir.path()).unwrap();

        for name in ["alice", "bob", "carol"] {
            collector.record(&sample_event(name)).unwrap();
        }
        assert_eq!(collector.event_count(), 3);
        collector.close().unwrap();

        let file = std::fs::File::open(collector.current_file()).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 3);

        let parsed: AccountingEvent = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(parsed.username, "bob");
        assert_eq!(parsed.decision, Some(Decision::Allow));
    }

    #[test]
    fn current_file_is_todays_date() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(dir.path()).unwrap();

        let expected = format!("{}.jsonl", Utc::now().format("%Y-%m-%d"));
        assert_eq!(
            collector.current_file().file_name().unwrap().to_str().unwrap(),
            expected
        );
    }

    #[test]
    fn appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let collector = Collector::new(dir.path()).unwrap();
        collector.record(&sample_event("alice")).unwrap();
        collector.close().unwrap();

        let collector = Collector::new(dir.path()).unwrap();
        collector.record(&sample_event("bob")).unwrap();
        // Count is per-open, not per-file.
        assert_eq!(collector.event_count(), 1);
        collector.close().unwrap();

        let content = std::fs::read_to_string(collector.current_file()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn record_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(dir.path()).unwrap();
        collector.close().unwrap();

        assert!(matches!(
            collector.record(&sample_event("alice")),
            Err(AccountingError::Closed)
        ));
    }
}
