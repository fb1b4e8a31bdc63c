//! Bounded local fallback for records the backend could not accept.
//!
//! The overflow file is plain text, one rendered record per line. Its
//! size never exceeds the configured budget: before a write that would
//! cross it, the oldest complete lines are evicted and the survivors plus
//! the new line replace the file through a rename.

use crate::format::LogFormatter;
use crate::record::LogRecord;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Default location of the overflow file, relative to the working directory.
pub const DEFAULT_OVERFLOW_PATH: &str = "logs.txt";

/// Default byte budget of the overflow file (1 GiB).
pub const DEFAULT_OVERFLOW_MAX_BYTES: u64 = 1 << 30;

#[derive(thiserror::Error, Debug)]
pub enum OverflowError {
    #[error("overflow file I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// What a persist call did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Appended without touching existing lines.
    Appended,
    /// Older lines totalling `freed` bytes were evicted first.
    Trimmed { freed: u64 },
    /// Rendered record was empty or larger than the whole budget.
    Discarded,
}

pub struct OverflowStore {
    path: PathBuf,
    max_bytes: u64,
    formatter: Arc<dyn LogFormatter>,
    // Serializes trim + append; independent of the logger's state lock.
    lock: Mutex<()>,
}

impl OverflowStore {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, formatter: Arc<dyn LogFormatter>) -> Self {
        OverflowStore {
            path: path.into(),
            max_bytes,
            formatter,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Best-effort persist. Errors are reported through `tracing` and
    /// otherwise ignored; there is nowhere further to send the record.
    pub fn persist(&self, record: &LogRecord, cause: &str) {
        if let Err(e) = self.try_persist(record, cause) {
            warn!(path = %self.path.display(), error = %e, "failed to write overflow log");
        }
    }

    pub fn try_persist(
        &self,
        record: &LogRecord,
        cause: &str,
    ) -> Result<PersistOutcome, OverflowError> {
        let line = self.render(record, cause);
        let len = line.len() as u64;
        if line.is_empty() || len > self.max_bytes {
            return Ok(PersistOutcome::Discarded);
        }

        let _guard = self.lock.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        let size = file.metadata()?.len();
        // A torn last line (no trailing newline) gets terminated before
        // anything is written after it, so that newline counts too.
        let torn = ends_without_newline(&mut file, size)?;
        let required = size + u64::from(torn) + len;
        if required <= self.max_bytes {
            if torn {
                file.write_all(b"\n")?;
            }
            file.write_all(&line)?;
            return Ok(PersistOutcome::Appended);
        }
        drop(file);

        let freed = rewrite_without_oldest(&self.path, required - self.max_bytes, Some(&line))?;
        Ok(PersistOutcome::Trimmed { freed })
    }

    /// Render `record` as one newline-terminated line with the failure
    /// cause appended. Falls back to the bare message when the formatter
    /// fails.
    fn render(&self, record: &LogRecord, cause: &str) -> Vec<u8> {
        let mut out = match self.formatter.format(record) {
            Ok(bytes) => bytes,
            Err(_) => record.message_or_empty().as_bytes().to_vec(),
        };
        while matches!(out.last(), Some(b'\n' | b'\r')) {
            out.pop();
        }
        if !cause.is_empty() {
            out.extend_from_slice(b" hook_error=");
            out.extend_from_slice(cause.as_bytes());
        }
        if out.is_empty() {
            return out;
        }

        for b in out.iter_mut() {
            if *b == b'\n' || *b == b'\r' {
                *b = b' ';
            }
        }
        out.push(b'\n');
        out
    }
}

fn ends_without_newline(file: &mut File, size: u64) -> io::Result<bool> {
    if size == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Remove the oldest complete lines of `path` until at least
/// `bytes_to_free` bytes (newlines included) are gone. Returns the number
/// of bytes actually freed.
///
/// A torn last line is kept as its own line and terminated; the newline
/// this adds is counted as if it had always been there.
pub fn trim_oldest_lines(path: &Path, bytes_to_free: u64) -> Result<u64, OverflowError> {
    rewrite_without_oldest(path, bytes_to_free, None)
}

fn rewrite_without_oldest(
    path: &Path,
    bytes_to_free: u64,
    tail: Option<&[u8]>,
) -> Result<u64, OverflowError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut reader = BufReader::new(File::open(path)?);
    let mut tmp = tempfile::Builder::new().prefix("logs-tmp-").tempfile_in(dir)?;

    let mut freed = 0u64;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                line.push(b'\n');
            }
            if freed < bytes_to_free {
                freed += line.len() as u64;
                continue;
            }
            writer.write_all(&line)?;
        }
        if let Some(tail) = tail {
            writer.write_all(tail)?;
        }
        writer.flush()?;
    }

    // The temp file is removed on drop if the rename fails.
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(freed)
}
