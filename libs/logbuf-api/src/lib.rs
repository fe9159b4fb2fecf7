pub mod error;
pub mod record;
pub mod sink;
pub mod types;
pub mod util;

pub use error::CodecError;
pub use record::LogRecord;
pub use sink::RotatingSink;
pub use types::{OverflowPolicy, StreamId, StreamKey, STDERR, STDOUT};
pub use util::now_ms;
