mod config;
mod sink;

pub use config::FileSinkConfig;
pub use sink::RotatingFileSink;
