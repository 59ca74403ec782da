//! Gzip compaction of old day-files.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::collector::LOG_EXTENSION;
use crate::Result;

/// Compress every `.jsonl` day-file older than `max_age` into a sibling
/// `.jsonl.gz`, removing the original only after the archive is durably
/// written. Files whose names do not parse as dates and files that already
/// have an archive are skipped, so re-runs are idempotent. Returns the
/// number of files compressed.
pub fn compress_old_logs(dir: &Path, max_age: Duration) -> Result<usize> {
    let suffix = format!(".{LOG_EXTENSION}");
    let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut compressed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(date_str) = name.strip_suffix(&suffix) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        let Some(file_date) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };
        if file_date.and_utc() > cutoff {
            continue;
        }

        let src = entry.path();
        let dst = dir.join(format!("{name}.gz"));
        if dst.exists() {
            continue;
        }

        compress_file(&src, &dst)?;
        fs::remove_file(&src)?;
        compressed += 1;

        debug!(file = name, "compressed accounting log");
    }

    Ok(compressed)
}

/// Gzip `src` into `dst`, fsyncing the archive before returning. The
/// partial archive is removed on failure.
fn compress_file(src: &Path, dst: &Path) -> io::Result<()> {
    let result = (|| {
        let mut src_file = File::open(src)?;
        let dst_file = File::create(dst)?;

        let mut encoder = GzEncoder::new(dst_file, Compression::default());
        io::copy(&mut src_file, &mut encoder)?;

        let dst_file = encoder.finish()?;
        dst_file.sync_all()
    })();

    if result.is_err() {
        let _ = fs::remove_file(dst);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    #[test]
    fn compresses_old_files_and_keeps_recent_ones() {
        let dir = tempfile::tempdir().unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();

        fs::write(dir.path().join("2020-01-01.jsonl"), "{\"a\":1}\n").unwrap();
        fs::write(dir.path().join(format!("{today}.jsonl")), "{\"b\":2}\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a log").unwrap();

        let compressed = compress_old_logs(dir.path(), WEEK).unwrap();
        assert_eq!(compressed, 1);

        assert!(!dir.path().join("2020-01-01.jsonl").exists());
        assert!(dir.path().join("2020-01-01.jsonl.gz").exists());
        assert!(dir.path().join(format!("{today}.jsonl")).exists());
        assert!(dir.path().join("notes.txt").exists());

        let mut decoder =
            GzDecoder::new(File::open(dir.path().join("2020-01-01.jsonl.gz")).unwrap());
        let mut content = String::new();
        decoder.read_to_string(&mut content).unwrap();
        assert_eq!(content, "{\"a\":1}\n");
    }

    #[test]
    fn reruns_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2020-01-01.jsonl"), "line\n").unwrap();

        assert_eq!(compress_old_logs(dir.path(), WEEK).unwrap(), 1);
        assert_eq!(compress_old_logs(dir.path(), WEEK).unwrap(), 0);
    }

    #[test]
    fn existing_archive_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2020-01-01.jsonl"), "fresh\n").unwrap();
        fs::write(dir.path().join("2020-01-01.jsonl.gz"), "sentinel").unwrap();

        assert_eq!(compress_old_logs(dir.path(), WEEK).unwrap(), 0);

        let archive = fs::read(dir.path().join("2020-01-01.jsonl.gz")).unwrap();
        assert_eq!(archive, b"sentinel");
    }

    #[test]
    fn non_date_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("backup.jsonl"), "data\n").unwrap();

        assert_eq!(compress_old_logs(dir.path(), WEEK).unwrap(), 0);
        assert!(dir.path().join("backup.jsonl").exists());
    }
}
