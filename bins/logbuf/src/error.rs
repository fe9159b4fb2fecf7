use logbuf_engine::LogError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Log(#[from] LogError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no command to run")]
    NoCommand,
}
