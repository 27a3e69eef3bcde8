//! Scoped logging interface consumed by the client factory
//!
//! The factory brackets client creation with `enter_function`/`leave_function`
//! and reports resolved details through `info`. `TracingLogger` routes to the
//! `tracing` ecosystem; `BufferLogger` accumulates lines so tests can assert
//! on what was logged.

use std::sync::Mutex;

/// Sink for scoped trace and info lines
pub trait Logger: Send + Sync {
    /// Record entry into a named operation
    fn enter_function(&self, name: &str);

    /// Record exit from a named operation
    fn leave_function(&self, name: &str);

    /// Record an informational line
    fn info(&self, message: &str);
}

/// Logger backed by the `tracing` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn enter_function(&self, name: &str) {
        tracing::debug!(function = name, "enter");
    }

    fn leave_function(&self, name: &str) {
        tracing::debug!(function = name, "leave");
    }

    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Logger that buffers every line in memory
#[derive(Debug, Default)]
pub struct BufferLogger {
    lines: Mutex<Vec<String>>,
}

impl BufferLogger {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines logged so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Whether any logged line contains the given fragment
    pub fn contains(&self, fragment: &str) -> bool {
        self.lines().iter().any(|line| line.contains(fragment))
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl Logger for BufferLogger {
    fn enter_function(&self, name: &str) {
        self.push(format!("-> {}", name));
    }

    fn leave_function(&self, name: &str) {
        self.push(format!("<- {}", name));
    }

    fn info(&self, message: &str) {
        self.push(message.to_string());
    }
}
