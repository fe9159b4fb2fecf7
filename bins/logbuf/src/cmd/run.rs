use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};

use logbuf_api::{OverflowPolicy, StreamKey, STDERR, STDOUT};
use logbuf_engine::{Listener, LogBuffer};
use logbuf_sink_file::RotatingFileSink;

use crate::config::RunArgs;
use crate::error::CliError;

pub async fn run(args: RunArgs) -> Result<i32, CliError> {
    let config = args.common.resolve()?;
    let (program, program_args) = args.command.split_first().ok_or(CliError::NoCommand)?;

    std::fs::create_dir_all(&config.sink.dir)?;
    tracing::info!(
        dir = %config.sink.dir.display(),
        file = %config.sink.file_name,
        "log directory ready"
    );

    let buffer = LogBuffer::new(RotatingFileSink::new(config.sink), config.buffer);

    // Terminal echo never drops records.
    let echo_queue = buffer.config().listener_buffer;
    let echo = buffer
        .add_listener_with(StreamKey::All, echo_queue, OverflowPolicy::BackPressure)
        .await?;
    let echo_handle = tokio::spawn(echo_records(echo));

    let mut child = Command::new(program)
        .args(program_args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CliError::Spawn {
            program: program.clone(),
            source,
        })?;
    tracing::info!(program = %program, pid = ?child.id(), "job started");

    let mut follows = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        follows.push(buffer.spawn_follow(STDOUT, stdout)?);
    }
    if let Some(stderr) = child.stderr.take() {
        follows.push(buffer.spawn_follow(STDERR, stderr)?);
    }

    let status = wait_for_job(&mut child).await?;
    tracing::info!(program = %program, %status, "job exited");

    // Pipes reach EOF once the job and everything it forked are gone.
    for handle in follows {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "stream capture ended with error"),
            Err(e) => tracing::warn!(error = %e, "stream capture task failed"),
        }
    }

    if let Err(e) = buffer.flush().await {
        tracing::error!(error = %e, "log flush failed");
    }
    buffer.close().await?;
    match echo_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "terminal echo failed"),
        Err(e) => tracing::warn!(error = %e, "terminal echo task failed"),
    }

    Ok(exit_code(status))
}

/// Wait for the job, killing it on Ctrl+C.
async fn wait_for_job(child: &mut Child) -> Result<ExitStatus, CliError> {
    tokio::select! {
        status = child.wait() => Ok(status?),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupted, stopping job");
            child.kill().await?;
            Ok(child.wait().await?)
        }
    }
}

async fn echo_records(mut listener: Listener) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    while let Some(record) = listener.recv().await {
        if record.stream_id == STDERR {
            write_through(&mut stderr, &record.message).await?;
        } else {
            write_through(&mut stdout, &record.message).await?;
        }
    }
    Ok(())
}

async fn write_through<W: AsyncWrite + Unpin>(out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    out.write_all(bytes).await?;
    out.flush().await
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
