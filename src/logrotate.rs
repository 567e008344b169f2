//! Log rotation and retention for the application log
//!
//! The live log is gzipped beside itself as `<stem>-YYYYmmdd-HHMMSS.log.gz`,
//! truncated, and only the newest `keep` rotated archives are kept.

use crate::compress;
use crate::logger::{Level, Logger};
use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

pub const COMPONENT: &str = "LogRotate";

fn stem_of(log_path: &Path) -> String {
    log_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string())
}

fn is_rotated(name: &str, stem: &str) -> bool {
    name.starts_with(&format!("{stem}-")) && name.ends_with(".log.gz")
}

/// Rotated archives of `log_path`, oldest first.
pub fn rotated_logs(log_path: &Path) -> Result<Vec<PathBuf>> {
    let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = stem_of(log_path);
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_rotated(&name, &stem) {
            continue;
        }
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((mtime, entry.path()));
    }
    // names embed the timestamp, so they break mtime ties
    found.sort();
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

/// Delete the oldest rotated archives beyond `keep`; returns what was removed.
pub fn prune(log_path: &Path, keep: usize, logger: &dyn Logger) -> Result<Vec<PathBuf>> {
    let all = rotated_logs(log_path)?;
    let excess = all.len().saturating_sub(keep);
    let mut removed = Vec::new();
    for old in all.into_iter().take(excess) {
        match fs::remove_file(&old) {
            Ok(()) => removed.push(old),
            Err(e) => logger.log(
                COMPONENT,
                Level::Error,
                &format!("Failed to delete {}: {e}", old.display()),
            ),
        }
    }
    Ok(removed)
}

/// Compress the live log into a timestamped archive, truncate it, prune.
///
/// Returns `None` when there is nothing to rotate.
pub fn rotate(log_path: &Path, keep: usize, logger: &dyn Logger) -> Result<Option<PathBuf>> {
    match fs::metadata(log_path) {
        Ok(m) if m.len() > 0 => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("stat {}", log_path.display())),
    }

    let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let mut archive = dir.join(format!("{}-{stamp}.log.gz", stem_of(log_path)));
    let mut n = 1;
    while archive.exists() {
        archive = dir.join(format!("{}-{stamp}-{n}.log.gz", stem_of(log_path)));
        n += 1;
    }

    compress::compress_file_to(log_path, &archive)?;
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(log_path)
        .with_context(|| format!("truncate {}", log_path.display()))?;
    logger.log(
        COMPONENT,
        Level::Success,
        &format!("Rotated {} -> {}", log_path.display(), archive.display()),
    );

    prune(log_path, keep, logger)?;
    Ok(Some(archive))
}

/// Rotate every `interval` until `stop` is set. Errors are logged and retried.
pub fn watch(
    log_path: &Path,
    keep: usize,
    interval: Duration,
    stop: &AtomicBool,
    logger: &dyn Logger,
) {
    let tick = Duration::from_millis(200).min(interval);
    let mut last = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        if last.elapsed() >= interval {
            last = Instant::now();
            if let Err(e) = rotate(log_path, keep, logger) {
                logger.log(COMPONENT, Level::Error, &format!("Rotation failed: {e:#}"));
            }
        }
        std::thread::sleep(tick);
    }
}

/// Text of a plain or gzipped log, decoded lossily.
pub fn read_log(path: &Path) -> Result<String> {
    let mut bytes = Vec::new();
    if compress::has_gz_suffix(path) {
        compress::gzip_reader(path)?
            .read_to_end(&mut bytes)
            .with_context(|| format!("decompress {}", path.display()))?;
    } else {
        bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{MemoryLogger, NoopLogger};
    use tempfile::TempDir;

    #[test]
    fn nothing_to_rotate() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("app.log");
        assert!(rotate(&log, 2, &NoopLogger).unwrap().is_none());
        fs::write(&log, b"").unwrap();
        assert!(rotate(&log, 2, &NoopLogger).unwrap().is_none());
    }

    #[test]
    fn rotate_compresses_and_truncates() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("app.log");
        fs::write(&log, "[x] [INFO] Sender - hello\n").unwrap();
        let mem = MemoryLogger::new();

        let archive = rotate(&log, 2, &mem).unwrap().unwrap();
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(read_log(&archive).unwrap(), "[x] [INFO] Sender - hello\n");
        assert!(mem.has_level(Level::Success));
    }

    #[test]
    fn retention_keeps_newest() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("app.log");
        let mut made = Vec::new();
        for i in 0..4 {
            fs::write(&log, format!("round {i}\n")).unwrap();
            made.push(rotate(&log, 2, &NoopLogger).unwrap().unwrap());
        }
        let left = rotated_logs(&log).unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&made[3]));
        // unrelated files are left alone
        fs::write(tmp.path().join("other.gz"), b"x").unwrap();
        prune(&log, 0, &NoopLogger).unwrap();
        assert!(tmp.path().join("other.gz").exists());
        assert!(rotated_logs(&log).unwrap().is_empty());
    }

    #[test]
    fn read_plain_log() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("app.log");
        fs::write(&p, "line\n").unwrap();
        assert_eq!(read_log(&p).unwrap(), "line\n");
    }

    #[test]
    fn watch_stops_when_flag_set() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("app.log");
        let stop = AtomicBool::new(true);
        watch(&log, 2, Duration::from_millis(10), &stop, &NoopLogger);
    }
}
