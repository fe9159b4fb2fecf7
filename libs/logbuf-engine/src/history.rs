use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tokio::sync::mpsc;

use logbuf_api::LogRecord;

use crate::error::LogError;

/// Bytes read per step of the backward scan.
pub const BLOCK_SIZE: usize = 512;

/// Outcome of one history read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRead {
    /// Records delivered to the receiver.
    pub sent: usize,
    /// Offset just past the last complete line of the snapshot. Tailing the
    /// file from here picks up exactly the lines the read did not see.
    pub end: u64,
}

/// Send the last `lines` records of the file at `path` to `tx`, oldest
/// first. `lines == 0` sends every record.
///
/// The file size is fixed when the file is opened; lines appended later
/// are not read, and an unterminated final line (a write still in progress)
/// is skipped. A missing file counts as an empty log.
///
/// `tx` is consumed, so the channel closes on every return path. If the
/// receiver goes away the read stops early without error. Returns the
/// number of records delivered.
///
/// Blocking: call from a plain thread or `spawn_blocking`, never directly
/// from async code.
pub fn read_history(
    path: &Path,
    lines: usize,
    tx: mpsc::Sender<LogRecord>,
) -> Result<usize, LogError> {
    read_snapshot(path, lines, &tx).map(|read| read.sent)
}

/// [`read_history`] that leaves `tx` open, for callers that keep tailing
/// the file from [`HistoryRead::end`] afterwards.
pub fn read_snapshot(
    path: &Path,
    lines: usize,
    tx: &mpsc::Sender<LogRecord>,
) -> Result<HistoryRead, LogError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HistoryRead { sent: 0, end: 0 }),
        Err(e) => return Err(LogError::History(e)),
    };
    let size = file.metadata().map_err(LogError::History)?.len();

    let start = if lines == 0 {
        0
    } else {
        seek_tail(&mut file, size, lines).map_err(LogError::History)?
    };
    file.seek(SeekFrom::Start(start)).map_err(LogError::History)?;

    let mut reader = BufReader::new(file.take(size - start));
    let mut line = Vec::new();
    let mut read = HistoryRead { sent: 0, end: start };
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).map_err(LogError::History)?;
        if n == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            tracing::debug!(path = %path.display(), bytes = n, "skipping unterminated last line");
            break;
        }
        read.end += n as u64;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let record = LogRecord::decode_line(&line)?;
        if tx.blocking_send(record).is_err() {
            tracing::debug!(path = %path.display(), sent = read.sent, "history receiver dropped");
            break;
        }
        read.sent += 1;
    }
    Ok(read)
}

/// Offset of the first of the last `lines` lines of a file of `size` bytes.
///
/// Scans backward in [`BLOCK_SIZE`] blocks counting newlines until `lines + 1`
/// are seen: the extra one is the newline ending the line before the first
/// wanted line. Returns 0 when the file holds `lines` lines or fewer.
pub(crate) fn seek_tail<R: Read + Seek>(file: &mut R, size: u64, lines: usize) -> io::Result<u64> {
    let wanted = lines.saturating_add(1);
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut count = 0usize;
    let mut end = size;

    while end > 0 {
        let start = end.saturating_sub(BLOCK_SIZE as u64);
        let block = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(block)?;

        let newlines = block.iter().filter(|&&b| b == b'\n').count();
        if count + newlines >= wanted {
            // Newlines in this block are numbered from its start; the target
            // is the one with exactly `wanted - 1` newlines after it.
            let nth = count + newlines - wanted;
            let idx = block
                .iter()
                .enumerate()
                .filter(|(_, b)| **b == b'\n')
                .nth(nth)
                .map(|(i, _)| i)
                .ok_or_else(|| io::Error::other("newline count mismatch"))?;
            return Ok(start + idx as u64 + 1);
        }

        count += newlines;
        end = start;
    }
    Ok(0)
}
