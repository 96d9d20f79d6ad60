// src/journal/file.rs

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Journal, JournalEntry};
use crate::errors::Result;

/// Default number of entries buffered between writers and the file.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Journal that appends formatted lines to a file.
///
/// `write` only pushes into a bounded channel; a background Tokio task owns
/// the file. When the buffer is full the entry is dropped and a warning is
/// logged instead of blocking the caller. The writer flushes whenever the
/// buffer drains and exits once every `FileJournal` handle is dropped.
#[derive(Debug, Clone)]
pub struct FileJournal {
    tx: mpsc::Sender<JournalEntry>,
}

impl FileJournal {
    /// Create (or truncate) `path` and spawn the writer task.
    ///
    /// Await the returned handle after dropping the journal to make sure
    /// everything reached the disk.
    pub async fn create(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<(Self, JoinHandle<()>)> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = File::create(path).await?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(write_loop(file, rx));
        Ok((Self { tx }, handle))
    }
}

impl Journal for FileJournal {
    fn write(&self, entry: JournalEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!(entry = %entry, "journal buffer full; dropping entry");
            }
            Err(TrySendError::Closed(entry)) => {
                debug!(entry = %entry, "journal writer stopped; dropping entry");
            }
        }
    }
}

async fn write_loop(file: File, mut rx: mpsc::Receiver<JournalEntry>) {
    let mut writer = BufWriter::new(file);

    while let Some(entry) = rx.recv().await {
        let line = format!("{entry}\n");
        if let Err(error) = writer.write_all(line.as_bytes()).await {
            warn!(%error, "failed to write journal entry; journal writer stopping");
            return;
        }
        if rx.is_empty() {
            if let Err(error) = writer.flush().await {
                warn!(%error, "failed to flush journal");
            }
        }
    }

    if let Err(error) = writer.flush().await {
        warn!(%error, "failed to flush journal on close");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::journal::Severity;
    use crate::protocol::TaskId;

    #[tokio::test]
    async fn writes_lines_and_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.journal");

        let (journal, writer) = FileJournal::create(&path, 8).await.unwrap();
        journal.write(JournalEntry::for_task(
            &TaskId::new("Net", "Netstat"),
            Severity::Info,
            "started (pid 42)",
            Duration::from_secs(1),
        ));
        journal.write(JournalEntry::for_run(
            Severity::Info,
            "run complete",
            Duration::from_secs(2),
        ));
        drop(journal);
        writer.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Net/Netstat: started (pid 42)"));
        assert!(lines[1].ends_with("run complete"));
    }

    #[tokio::test]
    async fn full_buffer_drops_entries_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.journal");

        let (journal, writer) = FileJournal::create(&path, 1).await.unwrap();
        // The single-threaded test runtime cannot run the writer until we
        // yield, so only the first entry fits.
        for i in 0..50u64 {
            journal.write(JournalEntry::for_run(
                Severity::Warning,
                format!("entry {i}"),
                Duration::from_secs(i),
            ));
        }
        drop(journal);
        writer.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 1, "{contents}");
        assert!(lines[0].ends_with("entry 0"));
    }
}
