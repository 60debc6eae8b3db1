//! # Overview
//!
//! Every other crate in this workspace reports diagnostics through a
//! [`LogSink`] passed in at construction instead of reaching for a
//! process-global logger. That keeps the transport, session, and editor
//! components embeddable inside a host that already owns its own logging
//! setup, and keeps tests free of global state.
//!
//! # Design
//!
//! [`LogSink`] is an object-safe trait so it can be shared behind an `Arc`
//! across the components a single [`crate::LogSink`] is handed to. Two
//! implementations ship unconditionally: [`NullLogSink`] (discards
//! everything) and [`RecordingLogSink`] (captures every record into a
//! `Vec` for test assertions). A third, [`TracingLogSink`], is available
//! behind the `tracing` feature and bridges records into the ambient
//! `tracing` subscriber, mirroring the split between a verbosity-agnostic
//! core and an optional `tracing` bridge.
//!
//! # Examples
//!
//! ```
//! use nb_logsink::{LogLevel, LogSink, RecordingLogSink};
//!
//! let sink = RecordingLogSink::default();
//! sink.log(LogLevel::Warn, "nb_session::auth", "password mismatch".to_string());
//! assert_eq!(sink.records().len(), 1);
//! ```

use std::sync::Mutex;

/// Severity of a single log record, mirroring `tracing::Level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured diagnostic emitted by a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub target: &'static str,
    pub message: String,
}

/// The injected logging seam. Implementations must be cheap to call and
/// must not panic; a sink that cannot deliver a record should drop it.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, target: &'static str, message: String);
}

/// Discards every record. Useful as a default for embedders that have not
/// yet wired up diagnostics.
#[derive(Debug, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _level: LogLevel, _target: &'static str, _message: String) {}
}

/// Captures every record for inspection, chiefly by tests.
#[derive(Debug, Default)]
pub struct RecordingLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLogSink {
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().expect("recording sink mutex poisoned").clone()
    }
}

impl LogSink for RecordingLogSink {
    fn log(&self, level: LogLevel, target: &'static str, message: String) {
        self.records
            .lock()
            .expect("recording sink mutex poisoned")
            .push(LogRecord { level, target, message });
    }
}

/// Bridges records into the ambient `tracing` subscriber. This is the
/// default sink a host wires up in production; it holds no state of its
/// own since `tracing` macros dispatch through the globally installed
/// subscriber.
#[cfg(feature = "tracing")]
#[derive(Debug, Default)]
pub struct TracingLogSink;

#[cfg(feature = "tracing")]
impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, target: &'static str, message: String) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "nb", %target, "{message}"),
            LogLevel::Debug => tracing::debug!(target: "nb", %target, "{message}"),
            LogLevel::Info => tracing::info!(target: "nb", %target, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "nb", %target, "{message}"),
            LogLevel::Error => tracing::error!(target: "nb", %target, "{message}"),
        }
    }
}
