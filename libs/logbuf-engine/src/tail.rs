use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use logbuf_api::LogRecord;

use crate::error::LogError;

/// Pause between polls once the file has nothing new.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ═══════════════════════════════════════════════════════════════
//  FileTail
// ═══════════════════════════════════════════════════════════════

/// Follows the active log file, yielding records as their lines complete.
///
/// Starts at a given offset, usually [`HistoryRead::end`](crate::history::HistoryRead)
/// of a history read. When the sink rotates, the old file is drained to its
/// end and the new active file is read from the start. A partial line is
/// held back until its newline arrives.
pub struct FileTail {
    path: PathBuf,
    file: Option<File>,
    offset: u64,
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl FileTail {
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            file: None,
            offset,
            pending: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Records whose lines completed since the last poll. Never blocks.
    pub fn poll(&mut self) -> Result<Vec<LogRecord>, LogError> {
        let mut records = Vec::new();
        if self.file.is_none() && !self.open()? {
            return Ok(records);
        }

        self.read_new(&mut records)?;
        if self.rotated()? {
            // Lines written just before the rename are still in the old file.
            self.read_new(&mut records)?;
            if !self.pending.is_empty() {
                tracing::debug!(
                    path = %self.path.display(),
                    bytes = self.pending.len(),
                    "dropping unterminated line of rotated file"
                );
            }
            tracing::debug!(path = %self.path.display(), "log file rotated, reopening");
            self.file = None;
            self.offset = 0;
            self.pending.clear();
            if self.open()? {
                self.read_new(&mut records)?;
            }
        }
        Ok(records)
    }

    /// Poll until the receiver goes away, sending every record to `tx`.
    ///
    /// Blocking, like [`read_history`](crate::history::read_history).
    /// Returns the number of records sent.
    pub fn run(mut self, tx: mpsc::Sender<LogRecord>) -> Result<usize, LogError> {
        let mut sent = 0;
        loop {
            let records = self.poll()?;
            if records.is_empty() {
                if tx.is_closed() {
                    return Ok(sent);
                }
                std::thread::sleep(self.poll_interval);
                continue;
            }
            for record in records {
                if tx.blocking_send(record).is_err() {
                    return Ok(sent);
                }
                sent += 1;
            }
        }
    }

    /// Open the file at `offset`. `false` while it does not exist yet.
    fn open(&mut self) -> Result<bool, LogError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(LogError::History(e)),
        };
        let len = file.metadata().map_err(LogError::History)?.len();
        if len < self.offset {
            tracing::debug!(
                path = %self.path.display(),
                len,
                offset = self.offset,
                "log file shrank, reading from the start"
            );
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset)).map_err(LogError::History)?;
        self.file = Some(file);
        Ok(true)
    }

    fn read_new(&mut self, records: &mut Vec<LogRecord>) -> Result<(), LogError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let n = file.read_to_end(&mut self.pending).map_err(LogError::History)?;
        self.offset += n as u64;

        let Some(last) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Ok(());
        };
        let complete: Vec<u8> = self.pending.drain(..=last).collect();
        for line in complete.split_inclusive(|&b| b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            records.push(LogRecord::decode_line(line)?);
        }
        Ok(())
    }

    /// Has the path moved on to a different file than the one held open?
    fn rotated(&self) -> Result<bool, LogError> {
        let Some(file) = self.file.as_ref() else {
            return Ok(false);
        };
        let current = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(LogError::History(e)),
        };
        let held = file.metadata().map_err(LogError::History)?;
        Ok(!same_file(&held, &current))
    }
}

#[cfg(unix)]
fn same_file(held: &Metadata, current: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    held.dev() == current.dev() && held.ino() == current.ino()
}

#[cfg(not(unix))]
fn same_file(held: &Metadata, current: &Metadata) -> bool {
    current.len() >= held.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(bytes).unwrap();
    }

    fn line(ts: i64, msg: &str) -> Vec<u8> {
        LogRecord::with_timestamp(1, ts, msg).encode_line().unwrap()
    }

    fn messages(records: Vec<LogRecord>) -> Vec<Vec<u8>> {
        records.into_iter().map(|r| r.message).collect()
    }

    #[test]
    fn picks_up_lines_after_the_offset() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logbuf.log");
        let seen = line(1, "seen");
        append(&path, &seen);

        let mut tail = FileTail::new(&path, seen.len() as u64);
        assert!(tail.poll().unwrap().is_empty());

        append(&path, &line(2, "new"));
        assert_eq!(messages(tail.poll().unwrap()), vec![b"new".to_vec()]);
        assert!(tail.poll().unwrap().is_empty());
    }

    #[test]
    fn partial_line_waits_for_its_newline() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logbuf.log");
        let full = line(1, "split");
        let (head, rest) = full.split_at(7);

        let mut tail = FileTail::new(&path, 0);
        assert!(tail.poll().unwrap().is_empty(), "missing file reads as empty");

        append(&path, head);
        assert!(tail.poll().unwrap().is_empty());
        append(&path, rest);
        assert_eq!(messages(tail.poll().unwrap()), vec![b"split".to_vec()]);
    }

    #[cfg(unix)]
    #[test]
    fn follows_rotation_to_the_new_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logbuf.log");
        append(&path, &line(1, "old"));

        let mut tail = FileTail::new(&path, 0);
        assert_eq!(messages(tail.poll().unwrap()), vec![b"old".to_vec()]);

        // Written to the old file right before it was renamed away.
        append(&path, &line(2, "last old"));
        std::fs::rename(&path, temp.path().join("logbuf-1.log")).unwrap();
        append(&path, &line(3, "first new"));

        assert_eq!(
            messages(tail.poll().unwrap()),
            vec![b"last old".to_vec(), b"first new".to_vec()]
        );
        append(&path, &line(4, "second new"));
        assert_eq!(messages(tail.poll().unwrap()), vec![b"second new".to_vec()]);
    }

    #[test]
    fn offset_past_a_truncated_file_restarts_at_zero() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logbuf.log");
        append(&path, &line(1, "fresh"));

        let mut tail = FileTail::new(&path, 10_000);
        assert_eq!(messages(tail.poll().unwrap()), vec![b"fresh".to_vec()]);
    }

    #[test]
    fn run_stops_once_the_receiver_is_gone() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logbuf.log");
        append(&path, &line(1, "one"));

        let (tx, mut rx) = mpsc::channel(4);
        let tail = FileTail::new(&path, 0).with_poll_interval(Duration::from_millis(5));
        let handle = std::thread::spawn(move || tail.run(tx));

        assert_eq!(rx.blocking_recv().unwrap().message, b"one");
        append(&path, &line(2, "two"));
        assert_eq!(rx.blocking_recv().unwrap().message, b"two");

        drop(rx);
        assert_eq!(handle.join().unwrap().unwrap(), 2);
    }
}
