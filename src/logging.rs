//! Warning sink for registry construction and `tracing` setup for the CLI.

use anyhow::Result;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber, filter::LevelFilter};

/// Receives human-readable warnings, such as a skipped duplicate definition or
/// an unresolved mapping lookup.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards every message to `tracing` at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        warn!(target: "hookweave", "{message}");
    }
}

/// Install a stderr subscriber honoring `RUST_LOG`, defaulting to `warn`
/// (`debug` when `verbose`).
pub fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingLogger;
    use super::*;

    #[test]
    fn recording_logger_keeps_order() {
        let logger = RecordingLogger::default();

        logger.log("first");
        logger.log("second");

        assert_eq!(logger.messages(), vec!["first", "second"]);
    }

    #[test]
    fn tracing_logger_accepts_messages_without_subscriber() {
        TracingLogger.log("no subscriber installed");
    }
}
