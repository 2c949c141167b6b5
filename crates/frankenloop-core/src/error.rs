//! Error types for frankenloop-core

use std::path::PathBuf;
use thiserror::Error;

use crate::logging::LogError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for frankenloop-core
#[derive(Error, Debug)]
pub enum Error {
    /// A scheduler callback failed while being run on behalf of a caller
    #[error(transparent)]
    Callback(#[from] SchedulerCallbackError),

    /// `EventLoop::block_on` ran out of work before the future completed
    #[error("event loop stalled: no pending work but the future has not completed")]
    Stalled,

    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Logging(#[from] LogError),
}

/// A scheduler callback returned an error.
///
/// Carries the original message plus the rendered error chain (the
/// "stack"), which includes a backtrace when one was captured.
#[derive(Error, Debug)]
#[error("Scheduler callback error: {message}")]
pub struct SchedulerCallbackError {
    message: String,
    stack: String,
    #[source]
    source: anyhow::Error,
}

impl SchedulerCallbackError {
    pub fn new(source: anyhow::Error) -> Self {
        Self {
            message: source.to_string(),
            stack: format!("{source:?}"),
            source,
        }
    }

    /// Message of the original error
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Original error chain, rendered at the time of wrapping
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// The original error, e.g. for `downcast_ref`
    pub fn inner(&self) -> &anyhow::Error {
        &self.source
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn wraps_message() {
        let err = SchedulerCallbackError::new(anyhow::anyhow!("boom"));
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "Scheduler callback error: boom");
    }

    #[test]
    fn stack_includes_context_chain() {
        let source = anyhow::Error::new(DiskError).context("while flushing");
        let err = SchedulerCallbackError::new(source);
        assert_eq!(err.message(), "while flushing");
        assert!(err.stack().contains("while flushing"));
        assert!(err.stack().contains("disk on fire"));
    }

    #[test]
    fn original_error_is_reachable() {
        let err = SchedulerCallbackError::new(anyhow::Error::new(DiskError));
        assert!(err.inner().downcast_ref::<DiskError>().is_some());
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk on fire"));
        assert!(err.into_inner().downcast::<DiskError>().is_ok());
    }

    #[test]
    fn callback_error_converts_transparently() {
        let err: Error = SchedulerCallbackError::new(anyhow::anyhow!("x")).into();
        assert_eq!(err.to_string(), "Scheduler callback error: x");
    }

    #[test]
    fn stalled_display() {
        assert!(Error::Stalled.to_string().contains("stalled"));
    }
}
