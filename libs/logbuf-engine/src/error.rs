use logbuf_api::{CodecError, StreamId};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log buffer is closed")]
    Closed,

    #[error("stream {stream}: read: {source}")]
    Ingest {
        stream: StreamId,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("sink: {0}")]
    Sink(#[source] std::io::Error),

    #[error("history: {0}")]
    History(#[source] std::io::Error),

    #[error("persistence watcher stopped, records are no longer written to the sink")]
    PersistenceStopped,

    #[error("task: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("config error: {0}")]
    Config(String),
}
