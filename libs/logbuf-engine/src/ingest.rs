use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use logbuf_api::{now_ms, LogRecord, StreamId};

use crate::error::LogError;
use crate::registry::Registry;

/// Largest chunk read from a source in one go.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Read `source` until EOF, broadcasting every chunk as one record.
///
/// No line buffering: a record holds exactly the bytes of one read.
/// Timestamps never go backwards within one call even if the wall clock
/// does. Returns `Ok` on EOF or when `token` is cancelled, and the read
/// error otherwise. Retrying is up to the caller.
pub(crate) async fn follow<R>(
    registry: Arc<Registry>,
    stream: StreamId,
    mut source: R,
    token: CancellationToken,
) -> Result<(), LogError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut last_ts = i64::MIN;
    tracing::debug!(stream, "following stream");

    loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(stream, "follow cancelled");
                return Ok(());
            }
            res = source.read(&mut buf) => res,
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!(stream, "stream reached EOF");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream, error = %e, "stream read failed");
                return Err(LogError::Ingest { stream, source: e });
            }
        };

        last_ts = last_ts.max(now_ms());
        let record = LogRecord::with_timestamp(stream, last_ts, &buf[..n]);
        registry.broadcast(&record).await;
    }
}
