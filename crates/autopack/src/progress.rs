//! Byte counters for pack progress reporting

use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Counters shared between a packer, its size scan and its worker
///
/// Both counters only ever grow.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    total: AtomicU64,
    done: AtomicU64,
    cancelled: AtomicBool,
}

impl Progress {
    pub(crate) fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub(crate) fn done(&self) -> u64 {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn add_done(&self, n: u64) {
        self.done.fetch_add(n, Ordering::AcqRel);
    }

    /// Ask a running size scan to stop early
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Sum the sizes of all regular files under `root` into `progress`
///
/// Best effort: unreadable entries are logged and skipped.
pub(crate) fn scan_directory_size(root: &Path, progress: &Progress) {
    let mut walker = WalkDir::new(root).into_iter();
    loop {
        if progress.is_cancelled() {
            debug!(root = ?root, "Size scan cancelled");
            return;
        }
        let entry = match walker.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(err)) => {
                warn!(root = ?root, error = %err, "Error when walking source directory to calculate size");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => {
                progress.total.fetch_add(metadata.len(), Ordering::AcqRel);
            }
            Err(err) => warn!(path = ?entry.path(), error = %err, "Error when stat'ing file"),
        }
    }
    debug!(root = ?root, total = progress.total(), "Size scan complete");
}

/// Reader that credits every byte it yields to `Progress::done`
pub(crate) struct CountingReader<R> {
    inner: R,
    progress: Arc<Progress>,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub(crate) fn new(inner: R, progress: Arc<Progress>) -> Self {
        Self {
            inner,
            progress,
            count: 0,
        }
    }

    /// Bytes read through this reader
    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        self.progress.add_done(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_sums_regular_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"Hello").unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        fs::write(temp_dir.path().join("sub/b.txt"), b"World!").unwrap();

        let progress = Progress::default();
        scan_directory_size(temp_dir.path(), &progress);
        assert_eq!(progress.total(), 11);
    }

    #[test]
    fn test_scan_of_missing_directory_is_not_fatal() {
        let progress = Progress::default();
        scan_directory_size(Path::new("/nonexistent/autopack/source"), &progress);
        assert_eq!(progress.total(), 0);
    }

    #[test]
    fn test_cancelled_scan_stops() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"12345").unwrap();

        let progress = Progress::default();
        progress.cancel();
        scan_directory_size(temp_dir.path(), &progress);
        assert_eq!(progress.total(), 0);
    }

    #[test]
    fn test_counting_reader() {
        let progress = Arc::new(Progress::default());
        let mut reader = CountingReader::new(&b"abcdefgh"[..], Arc::clone(&progress));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(reader.count(), 8);
        assert_eq!(progress.done(), 8);
    }
}
