//! `tracing-subscriber` setup driven by the CLI's log-level/log-output
//! flags.
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::cli::{LogLevel, LogOutput};

/// Initializes the global tracing subscriber. `NONE` output writes to
/// stderr only; a file path mirrors the same output to that file.
pub fn init(level: LogLevel, output: &LogOutput) -> std::io::Result<()> {
    let level_filter: LevelFilter = level.as_tracing_level().into();
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();

    let writer = match output {
        LogOutput::None => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();

    Ok(())
}
