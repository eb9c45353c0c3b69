//! Command-line argument parsing.
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Maps onto the nearest `tracing` level; `Critical` has no direct
    /// tracing equivalent and is treated as `Error`.
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Critical | LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

/// Where log output should go: stderr only, or also mirrored to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    None,
    File(PathBuf),
}

impl std::str::FromStr for LogOutput {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            Ok(LogOutput::None)
        } else {
            Ok(LogOutput::File(PathBuf::from(s)))
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "rstc", about = "A leeching BitTorrent client", version)]
pub struct Args {
    /// Path to the .torrent file to download.
    pub source_file: PathBuf,

    #[arg(short = 'l', long = "log-level", value_enum, default_value = "critical")]
    pub log_level: LogLevel,

    #[arg(short = 'f', long = "log-output", default_value = "NONE")]
    pub log_output: LogOutput,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn log_output_none_is_case_insensitive() {
        assert_eq!(LogOutput::from_str("NONE").unwrap(), LogOutput::None);
        assert_eq!(LogOutput::from_str("none").unwrap(), LogOutput::None);
    }

    #[test]
    fn log_output_other_value_is_a_file_path() {
        assert_eq!(
            LogOutput::from_str("run.log").unwrap(),
            LogOutput::File(PathBuf::from("run.log"))
        );
    }

    #[test]
    fn log_level_maps_to_tracing_level() {
        assert_eq!(LogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Critical.as_tracing_level(), tracing::Level::ERROR);
    }
}
