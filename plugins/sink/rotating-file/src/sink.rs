use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use logbuf_api::{now_ms, RotatingSink};

use crate::config::FileSinkConfig;

// ════════════════════════════════════════════════════════════════
//  RotatingFileSink
// ════════════════════════════════════════════════════════════════

/// Size-bounded append-only file sink.
///
/// Layout on disk:
/// ```text
/// {dir}/{file_name}                 active file
/// {dir}/{stem}-{unix ms}.{ext}      rotated backups
/// ```
/// The active file is opened (or created) lazily by the first write.
/// Rotation only happens between two writes, so a line written with a
/// single `write_all` never spans two files.
pub struct RotatingFileSink {
    config: FileSinkConfig,
    max_size: u64,
    file: Option<File>,
    size: u64,
}

impl RotatingFileSink {
    pub fn new(config: FileSinkConfig) -> Self {
        let max_size = config.max_size_bytes();
        Self {
            config,
            max_size,
            file: None,
            size: 0,
        }
    }

    /// Override the rotation threshold in bytes.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Active file left by a previous run, if any.
    pub fn existing_file(config: &FileSinkConfig) -> Option<PathBuf> {
        let path = config.active_path();
        path.is_file().then_some(path)
    }

    /// Rotated files, oldest first.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        let (stem, ext) = self.config.backup_parts();
        let prefix = format!("{stem}-");
        let suffix = if ext.is_empty() { String::new() } else { format!(".{ext}") };

        let dir = match std::fs::read_dir(&self.config.dir) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut found: Vec<(i64, u32, PathBuf)> = Vec::new();
        for entry in dir {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(stamp) = rest.strip_suffix(&suffix) else {
                continue;
            };
            // `{ms}` or `{ms}.{n}` when several rotations share a millisecond.
            let (ms, seq) = match stamp.split_once('.') {
                Some((ms, seq)) => (ms, seq.parse().unwrap_or(0)),
                None => (stamp, 0),
            };
            if let Ok(ms) = ms.parse::<i64>() {
                found.push((ms, seq, entry.path()));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, _, p)| p).collect())
    }

    fn open_existing_or_new(&mut self) -> io::Result<()> {
        std::fs::create_dir_all(&self.config.dir)?;
        let path = self.config.active_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        let active = self.config.active_path();
        let backup = self.backup_path(now_ms());
        std::fs::rename(&active, &backup)?;
        tracing::debug!(from = %active.display(), to = %backup.display(), "rotated log file");

        self.open_existing_or_new()?;
        self.prune();
        Ok(())
    }

    fn backup_path(&self, ms: i64) -> PathBuf {
        let (stem, ext) = self.config.backup_parts();
        let name = |seq: u32| {
            let stamp = if seq == 0 { ms.to_string() } else { format!("{ms}.{seq}") };
            if ext.is_empty() {
                format!("{stem}-{stamp}")
            } else {
                format!("{stem}-{stamp}.{ext}")
            }
        };
        let mut seq = 0;
        loop {
            let path = self.config.dir.join(name(seq));
            if !path.exists() {
                return path;
            }
            seq += 1;
        }
    }

    fn prune(&self) {
        if self.config.max_backups == 0 {
            return;
        }
        let backups = match self.backups() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list log backups");
                return;
            }
        };
        let excess = backups.len().saturating_sub(self.config.max_backups);
        for path in &backups[..excess] {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to remove old log backup"
                );
            }
        }
    }

    fn active(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            self.open_existing_or_new()?;
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    pub fn config(&self) -> &FileSinkConfig {
        &self.config
    }

}

impl Write for RotatingFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len() as u64;
        if len > self.max_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write length {len} exceeds maximum file size {}", self.max_size),
            ));
        }

        self.active()?;
        if self.size > 0 && self.size + len > self.max_size {
            self.rotate()?;
        }

        self.active()?.write_all(buf)?;
        self.size += len;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl RotatingSink for RotatingFileSink {
    fn current_file(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|_| self.config.active_path())
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sink(dir: &TempDir) -> RotatingFileSink {
        RotatingFileSink::new(FileSinkConfig::new(dir.path().join("logs")))
    }

    #[test]
    fn file_is_created_by_first_write() {
        let temp = TempDir::new().unwrap();
        let mut sink = sink(&temp);
        assert!(sink.current_file().is_none());
        assert!(RotatingFileSink::existing_file(sink.config()).is_none());

        sink.write_all(b"one\n").unwrap();

        let path = sink.current_file().unwrap();
        assert_eq!(path, temp.path().join("logs").join("logbuf.log"));
        assert_eq!(std::fs::read(&path).unwrap(), b"one\n");
        assert_eq!(RotatingFileSink::existing_file(sink.config()), Some(path));
    }

    #[test]
    fn reopening_appends_to_existing_file() {
        let temp = TempDir::new().unwrap();
        let mut first = sink(&temp);
        first.write_all(b"one\n").unwrap();
        first.close().unwrap();
        assert!(first.current_file().is_none());

        let mut second = sink(&temp);
        second.write_all(b"two\n").unwrap();
        let content = std::fs::read_to_string(second.current_file().unwrap()).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[test]
    fn rotates_between_writes() {
        let temp = TempDir::new().unwrap();
        let mut sink = sink(&temp).with_max_size(10);

        sink.write_all(b"aaaaaa\n").unwrap();
        sink.write_all(b"bbbbbb\n").unwrap();
        sink.write_all(b"cc\n").unwrap();

        let active = std::fs::read_to_string(sink.current_file().unwrap()).unwrap();
        assert_eq!(active, "bbbbbb\ncc\n");

        let backups = sink.backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), "aaaaaa\n");
        let name = backups[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("logbuf-") && name.ends_with(".log"), "{name}");
    }

    #[test]
    fn prunes_backups_beyond_limit() {
        let temp = TempDir::new().unwrap();
        let mut cfg = FileSinkConfig::new(temp.path());
        cfg.max_backups = 2;
        let mut sink = RotatingFileSink::new(cfg).with_max_size(4);

        for line in [b"1\n", b"2\n", b"3\n", b"4\n", b"5\n", b"6\n", b"7\n", b"8\n"] {
            sink.write_all(line).unwrap();
        }

        let backups = sink.backups().unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), "3\n4\n");
        assert_eq!(std::fs::read_to_string(&backups[1]).unwrap(), "5\n6\n");
        let active = std::fs::read_to_string(sink.current_file().unwrap()).unwrap();
        assert_eq!(active, "7\n8\n");
    }

    #[test]
    fn oversized_write_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut sink = sink(&temp).with_max_size(3);
        let err = sink.write_all(b"too long\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(sink.current_file().is_none());
    }
}
