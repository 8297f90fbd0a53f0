//! Diagnostics and logging utilities
//!
//! The spatial index and the physics bridge report errors and state changes
//! through a [`DiagnosticsSink`] handed to their constructors, so tests can
//! capture output without touching process-wide logger state. The default
//! sink forwards to the `log` facade.

use std::fmt;
use std::sync::{Arc, Mutex};

pub use log::{debug, error, info, trace, warn};

/// Initialize the process-wide logging backend
pub fn init() {
    env_logger::init();
}

/// Severity of a diagnostics event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Verbose tracing, disabled in normal operation
    Debug,
    /// Routine state changes
    Info,
    /// Recoverable problems surfaced to the caller
    Warning,
    /// Internal faults that degrade a subsystem
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Capability for reporting diagnostics events
///
/// `context` identifies the operation (e.g. `"spatial.insert"`), and the
/// message carries the entity id and details.
pub trait DiagnosticsSink: Send + Sync {
    /// Record a single diagnostics event
    fn record(&self, severity: Severity, context: &str, message: &str);
}

/// Sink forwarding every event to the `log` facade
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn record(&self, severity: Severity, context: &str, message: &str) {
        match severity {
            Severity::Debug => log::debug!(target: "sim_engine", "[{context}] {message}"),
            Severity::Info => log::info!(target: "sim_engine", "[{context}] {message}"),
            Severity::Warning => log::warn!(target: "sim_engine", "[{context}] {message}"),
            Severity::Critical => log::error!(target: "sim_engine", "[{context}] {message}"),
        }
    }
}

/// Shared handle to a diagnostics sink
pub type Diagnostics = Arc<dyn DiagnosticsSink>;

/// Create the default diagnostics handle backed by [`LogSink`]
pub fn default_diagnostics() -> Diagnostics {
    Arc::new(LogSink)
}

/// One captured diagnostics event
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Event severity
    pub severity: Severity,
    /// Operation context string
    pub context: String,
    /// Formatted message
    pub message: String,
}

/// Sink that stores events in memory, for tests and tooling
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<CapturedEvent>>,
}

impl MemorySink {
    /// Create an empty capturing sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every captured event
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of captured events at or above a severity
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|e| e.severity >= severity)
            .count()
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, severity: Severity, context: &str, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(CapturedEvent {
                severity,
                context: context.to_string(),
                message: message.to_string(),
            });
    }
}
