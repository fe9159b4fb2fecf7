use std::path::{Path, PathBuf};

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

const MEGABYTE: u64 = 1024 * 1024;

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_name() -> String {
    "logbuf.log".into()
}

fn default_max_size_mb() -> u64 {
    100
}

/// Where and how large the rotating log files are.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileSinkConfig {
    /// Directory holding the active file and its backups.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Name of the active file, e.g. `logbuf.log`.
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Rotate once the active file would exceed this many megabytes.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    /// Rotated files to keep. 0 keeps all of them.
    #[serde(default)]
    pub max_backups: usize,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self::new(default_dir())
    }
}

impl FileSinkConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: default_file_name(),
            max_size_mb: default_max_size_mb(),
            max_backups: 0,
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(MEGABYTE)
    }

    /// Path of the active file, whether or not it exists yet.
    pub fn active_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// `(stem, extension)` used to name backups: `{stem}-{unix ms}.{ext}`.
    pub(crate) fn backup_parts(&self) -> (String, String) {
        let name = Path::new(&self.file_name);
        let stem = name
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone());
        let ext = name
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        (stem, ext)
    }
}
