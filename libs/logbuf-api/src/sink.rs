use std::io;
use std::path::PathBuf;

/// Append-only byte sink that starts a new file once a size threshold is
/// exceeded.
///
/// The log buffer never decides when or how to rotate. It writes whole
/// encoded lines through [`io::Write`] and asks for the active file when it
/// needs to read history back.
///
/// Implementations must not split one `write_all` call across two files.
pub trait RotatingSink: io::Write + Send {
    /// Path of the file currently written to. `None` until the first write
    /// has created one.
    fn current_file(&self) -> Option<PathBuf>;

    /// Size in bytes after which the sink rotates.
    fn max_size(&self) -> u64;

    /// Flush and release the active file. Writes after close reopen a file.
    fn close(&mut self) -> io::Result<()>;
}

impl<S: RotatingSink + ?Sized> RotatingSink for Box<S> {
    fn current_file(&self) -> Option<PathBuf> {
        (**self).current_file()
    }

    fn max_size(&self) -> u64 {
        (**self).max_size()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}
