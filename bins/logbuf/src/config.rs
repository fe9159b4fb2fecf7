use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use logbuf_engine::LogBufferConfig;
use logbuf_sink_file::FileSinkConfig;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "logbuf", about = "Capture, persist and replay job output")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a job, capturing its stdout and stderr into the log buffer
    Run(RunArgs),
    /// Print the log buffer of a job
    Log(LogArgs),
}

#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    /// Path to a TOML config file
    #[arg(long, env = "LOGBUF_CONFIG")]
    pub config: Option<String>,

    /// Directory holding the log files, overrides `sink.dir`
    #[arg(long, env = "LOGBUF_DIR")]
    pub dir: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct LogArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Limit the output to the last N records, 0 prints all
    #[arg(short = 'n', default_value_t = 0)]
    pub lines: usize,

    /// Send stderr records to stderr
    #[arg(short = 's', long)]
    pub split_stderr: bool,

    /// Keep printing new records after the log buffer
    #[arg(short = 'f', long)]
    pub follow: bool,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub buffer: LogBufferConfig,
    #[serde(default)]
    pub sink: FileSinkConfig,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|e| CliError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| match e {
            CliError::Config { context, detail } => CliError::Config {
                context,
                detail: format!("'{path}': {detail}"),
            },
            other => other,
        })
    }

    pub fn parse(toml_str: &str) -> Result<Self, CliError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| CliError::Config {
            context: "parse",
            detail: e.to_string(),
        })?;
        config.buffer.validate().map_err(|e| CliError::Config {
            context: "validate",
            detail: e.to_string(),
        })?;
        Ok(config)
    }
}

impl CommonArgs {
    /// Config file contents (defaults without `--config`) with flag overrides applied.
    pub fn resolve(&self) -> Result<AppConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => {
                let config = AppConfig::load(path)?;
                tracing::debug!(config = %path, "loaded config");
                config
            }
            None => AppConfig::default(),
        };
        if let Some(dir) = &self.dir {
            config.sink.dir = dir.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbuf_api::OverflowPolicy;

    #[test]
    fn tables_are_optional() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.buffer.listener_buffer, 1024);
        assert_eq!(cfg.sink.file_name, "logbuf.log");
    }

    #[test]
    fn buffer_and_sink_tables_are_read() {
        let cfg = AppConfig::parse(
            r#"
            [buffer]
            listener_overflow = "back_pressure"

            [sink]
            dir = "/var/log/jobs/web"
            max_size_mb = 5
            max_backups = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.buffer.listener_overflow, OverflowPolicy::BackPressure);
        assert_eq!(cfg.sink.dir, PathBuf::from("/var/log/jobs/web"));
        assert_eq!(cfg.sink.max_size_bytes(), 5 * 1024 * 1024);
        assert_eq!(cfg.sink.max_backups, 3);
    }

    #[test]
    fn invalid_buffer_settings_are_rejected() {
        let err = AppConfig::parse("[buffer]\npersist_buffer = 0").unwrap_err();
        assert!(matches!(err, CliError::Config { context: "validate", .. }), "{err}");
    }

    #[test]
    fn dir_flag_overrides_config_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("logbuf.toml");
        std::fs::write(&path, "[sink]\ndir = \"/from/file\"\nfile_name = \"job.log\"").unwrap();

        let args = CommonArgs {
            config: Some(path.to_string_lossy().into_owned()),
            dir: Some(PathBuf::from("/from/flag")),
        };
        let cfg = args.resolve().unwrap();
        assert_eq!(cfg.sink.active_path(), PathBuf::from("/from/flag/job.log"));
    }

    #[test]
    fn missing_config_file_names_the_path() {
        let err = AppConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }

    #[test]
    fn run_keeps_hyphenated_job_arguments() {
        let cli =
            Cli::try_parse_from(["logbuf", "run", "--dir", "/tmp/x", "ls", "-la", "/"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.command, vec!["ls", "-la", "/"]);
        assert_eq!(args.common.dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn log_flags() {
        let cli = Cli::try_parse_from(["logbuf", "log", "-n", "20", "-s", "-f"]).unwrap();
        let Commands::Log(args) = cli.command else {
            panic!("expected log");
        };
        assert_eq!(args.lines, 20);
        assert!(args.split_stderr);
        assert!(args.follow);

        let cli = Cli::try_parse_from(["logbuf", "log", "--follow"]).unwrap();
        let Commands::Log(args) = cli.command else {
            panic!("expected log");
        };
        assert_eq!(args.lines, 0);
        assert!(!args.split_stderr);
        assert!(args.follow);
    }
}
