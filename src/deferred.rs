//! Spooling of worksheets that arrive before the metadata they depend on
//!
//! Worksheet members that precede shared strings or styles in the container
//! are copied to temporary files and replayed, in arrival order, once the
//! container has been read to its end.
//!
//! Spools are removed on drop. A process killed mid-session leaves its
//! `xlsxstream-*` directory behind, so the first spool of each process also
//! sweeps such directories once they are a day old.

use crate::error::Result;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

const SPOOL_PREFIX: &str = "xlsxstream-";

/// Age after which an orphaned spool directory is swept
const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

static SWEEP: Once = Once::new();

/// One spooled worksheet member
#[derive(Debug)]
pub struct DeferredSheet {
    path: String,
    bytes: u64,
    spool: NamedTempFile,
}

impl DeferredSheet {
    /// Member path inside the package
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size of the spooled (decompressed) member
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Location of the spool file
    pub fn spool_path(&self) -> &Path {
        self.spool.path()
    }

    /// Reader positioned at the start of the spool, plus the file guard
    /// that deletes it on drop
    pub fn open(self) -> Result<(BufReader<File>, NamedTempFile)> {
        let file = self.spool.reopen()?;
        Ok((BufReader::new(file), self.spool))
    }
}

/// Session-scoped queue of spooled worksheets
///
/// The spool directory is created on first use; dropping the queue removes
/// it along with any sheet that was never replayed.
#[derive(Debug, Default)]
pub struct DeferredSheets {
    queue: VecDeque<DeferredSheet>,
    dir: Option<TempDir>,
}

impl DeferredSheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a worksheet member to a fresh spool file and enqueue it
    pub fn defer<R: Read + ?Sized>(&mut self, path: &str, source: &mut R) -> Result<()> {
        let dir = match &mut self.dir {
            Some(dir) => dir,
            slot => {
                SWEEP.call_once(|| {
                    sweep_stale(&std::env::temp_dir(), STALE_AFTER);
                });
                slot.insert(tempfile::Builder::new().prefix(SPOOL_PREFIX).tempdir()?)
            }
        };

        let mut spool = tempfile::Builder::new()
            .prefix("sheet-")
            .suffix(".xml")
            .tempfile_in(dir.path())?;
        let bytes = io::copy(source, &mut spool)?;
        spool.flush()?;

        log::debug!(
            "deferred '{}' ({} bytes) to {}",
            path,
            bytes,
            spool.path().display()
        );

        self.queue.push_back(DeferredSheet {
            path: path.to_string(),
            bytes,
            spool,
        });
        Ok(())
    }

    /// Oldest spooled worksheet
    pub fn next_sheet(&mut self) -> Option<DeferredSheet> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Spool directory, once something has been deferred
    pub fn spool_dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Discard every queued sheet
    pub fn clear(&mut self) {
        if !self.queue.is_empty() {
            log::debug!("discarding {} deferred worksheets", self.queue.len());
        }
        self.queue.clear();
    }
}

/// Remove spool directories under `parent` untouched for at least `max_age`
///
/// Best effort: unreadable entries and failed removals are skipped. Returns
/// the number of directories removed.
pub fn sweep_stale(parent: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(parent) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_spool = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SPOOL_PREFIX));
        if !is_spool {
            continue;
        }

        let stale = entry
            .metadata()
            .ok()
            .filter(|meta| meta.is_dir())
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= max_age);
        if stale && std::fs::remove_dir_all(entry.path()).is_ok() {
            log::debug!("removed stale spool {}", entry.path().display());
            removed += 1;
        }
    }
    removed
}
