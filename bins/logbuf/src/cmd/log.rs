use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use logbuf_api::{LogRecord, STDERR};
use logbuf_engine::{read_snapshot, FileTail, LogError};
use logbuf_sink_file::RotatingFileSink;

use crate::config::LogArgs;
use crate::error::CliError;

const HISTORY_QUEUE: usize = 256;

/// Print the persisted log buffer, then with `--follow` every record
/// written after it until Ctrl+C.
pub async fn run(args: LogArgs) -> Result<(), CliError> {
    let config = args.common.resolve()?;
    let path = match RotatingFileSink::existing_file(&config.sink) {
        Some(path) => path,
        None if args.follow => config.sink.active_path(),
        None => {
            tracing::info!(path = %config.sink.active_path().display(), "no log file yet");
            return Ok(());
        }
    };

    let (lines, follow) = (args.lines, args.follow);
    let (tx, mut rx) = mpsc::channel(HISTORY_QUEUE);
    let reader = tokio::task::spawn_blocking(move || {
        let history = read_snapshot(&path, lines, &tx)?;
        tracing::debug!(printed = history.sent, "log buffer read");
        if follow {
            FileTail::new(path, history.end).run(tx)?;
        }
        Ok::<(), LogError>(())
    });

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    loop {
        let record = tokio::select! {
            record = rx.recv() => record,
            signal = tokio::signal::ctrl_c(), if follow => {
                signal?;
                None
            }
        };
        let Some(record) = record else {
            break;
        };
        if args.split_stderr && record.stream_id == STDERR {
            print_record(&mut stderr, &record, follow).await?;
        } else {
            print_record(&mut stdout, &record, follow).await?;
        }
    }
    stdout.flush().await?;
    stderr.flush().await?;

    // The tail stops at its next poll once the receiver is gone.
    drop(rx);
    reader.await.map_err(LogError::from)??;
    Ok(())
}

async fn print_record<W: AsyncWrite + Unpin>(
    out: &mut W,
    record: &LogRecord,
    flush: bool,
) -> std::io::Result<()> {
    out.write_all(&record.message).await?;
    if flush {
        out.flush().await?;
    }
    Ok(())
}
