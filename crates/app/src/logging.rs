use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use vstream_foundation::AppError;

/// Log to stdout and a daily-rotated file under `logs/`. `RUST_LOG`
/// overrides the CLI level when set.
pub fn init(level: &str) -> Result<(), AppError> {
    std::fs::create_dir_all("logs")
        .map_err(|e| AppError::Config(format!("Cannot create logs directory: {e}")))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "vstream.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(filter)
        .init();

    // Keep the file writer alive for the lifetime of the process
    std::mem::forget(guard);

    Ok(())
}
