pub mod buffer;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod registry;
pub mod tail;
mod watcher;

pub use buffer::LogBuffer;
pub use config::LogBufferConfig;
pub use error::LogError;
pub use history::{read_history, read_snapshot, HistoryRead};
pub use registry::{Listener, ListenerId, Registry};
pub use tail::FileTail;

pub use logbuf_api::{LogRecord, OverflowPolicy, StreamId, StreamKey};
