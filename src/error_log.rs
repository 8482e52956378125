use crate::InsertError;

/// Sink for insert failures.
///
/// The repository reports every failure here before returning it, including
/// secondary failures (a rollback or release that failed while handling
/// another error). Implementations must not panic; what they do with the
/// report has no effect on the error the caller receives.
pub trait ErrorLog: Send + Sync {
    fn error(&self, message: &str, cause: &InsertError);
}

/// Discards every report. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentErrorLog;

impl ErrorLog for SilentErrorLog {
    fn error(&self, _message: &str, _cause: &InsertError) {}
}

/// Forwards reports to `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorLog;

impl ErrorLog for TracingErrorLog {
    fn error(&self, message: &str, cause: &InsertError) {
        tracing::error!(error = %cause, "{}", message);
    }
}
