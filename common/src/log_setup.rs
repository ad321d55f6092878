use std::path::PathBuf;
use std::sync::OnceLock;

use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming,
};

/// Where log records go.
#[derive(Debug, Clone)]
pub enum LogOutput {
    Stdout,
    /// Rotating files in `directory`, duplicated to stdout; warnings also go to stderr.
    File { directory: PathBuf },
}

/// Starts the global logger. The returned handle must be kept alive for file output.
pub fn setup_logging(
    base_level: &str,
    output: LogOutput,
) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_str(base_level)?;

    match output {
        LogOutput::Stdout => logger.log_to_stdout().start(),
        LogOutput::File { directory } => logger
            .log_to_file(FileSpec::default().directory(directory))
            .duplicate_to_stderr(Duplicate::Warn)
            .duplicate_to_stdout(Duplicate::All)
            .rotate(
                Criterion::Size(1024 * 1024), //1MB
                Naming::Timestamps,
                Cleanup::KeepLogFiles(5),
            )
            .start(),
    }
}

/// Stdout logging for tests. Safe to call from every test.
pub fn init_test_logging() {
    static HANDLE: OnceLock<Option<LoggerHandle>> = OnceLock::new();
    HANDLE.get_or_init(|| {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string());
        setup_logging(&level, LogOutput::Stdout).ok()
    });
}
