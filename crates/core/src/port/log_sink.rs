// Log Sink Port
// Fire-and-forget, job-scoped operator log

use tracing::{error, info, warn};

pub trait LogSink: Send + Sync {
    fn info(&self, message: &str, job_name: Option<&str>);

    fn warning(&self, message: &str, job_name: Option<&str>);

    fn error(&self, message: &str, job_name: Option<&str>);
}

/// Forwards to `tracing` with the job name as a structured field
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn info(&self, message: &str, job_name: Option<&str>) {
        info!(job_name = job_name.unwrap_or("-"), "{}", message);
    }

    fn warning(&self, message: &str, job_name: Option<&str>) {
        warn!(job_name = job_name.unwrap_or("-"), "{}", message);
    }

    fn error(&self, message: &str, job_name: Option<&str>) {
        error!(job_name = job_name.unwrap_or("-"), "{}", message);
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LogLevel {
        Info,
        Warning,
        Error,
    }

    /// Keeps every line for assertions
    #[derive(Default)]
    pub struct RecordingLogSink {
        lines: Mutex<Vec<(LogLevel, String, Option<String>)>>,
    }

    impl RecordingLogSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<(LogLevel, String, Option<String>)> {
            self.lines.lock().unwrap().clone()
        }

        pub fn count(&self, level: LogLevel) -> usize {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _, _)| *l == level)
                .count()
        }

        fn push(&self, level: LogLevel, message: &str, job_name: Option<&str>) {
            self.lines.lock().unwrap().push((
                level,
                message.to_string(),
                job_name.map(str::to_string),
            ));
        }
    }

    impl LogSink for RecordingLogSink {
        fn info(&self, message: &str, job_name: Option<&str>) {
            self.push(LogLevel::Info, message, job_name);
        }

        fn warning(&self, message: &str, job_name: Option<&str>) {
            self.push(LogLevel::Warning, message, job_name);
        }

        fn error(&self, message: &str, job_name: Option<&str>) {
            self.push(LogLevel::Error, message, job_name);
        }
    }
}
