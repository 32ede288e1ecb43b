//! User-facing progress output.
//!
//! Provisioners report progress through [`Ui`] rather than writing to the
//! terminal directly. Structured diagnostics go through `tracing`; the UI
//! carries the short status lines a person watching the build reads.

use std::io::{self, Write};
use std::sync::Mutex;

/// Sink for progress lines emitted while provisioning.
pub trait Ui: Send + Sync {
    /// Reports a major step.
    fn say(&self, message: &str);

    /// Reports detail belonging to the current step.
    fn message(&self, message: &str);

    /// Reports a failure.
    fn error(&self, message: &str);
}

/// [`Ui`] writing prefixed lines to a writer, stdout by default.
pub struct ConsoleUi<W: Write + Send = io::Stdout> {
    name: String,
    out: Mutex<W>,
}

impl ConsoleUi<io::Stdout> {
    pub fn stdout(name: impl Into<String>) -> Self {
        Self::new(name, io::stdout())
    }
}

impl<W: Write + Send> ConsoleUi<W> {
    pub fn new(name: impl Into<String>, out: W) -> Self {
        Self {
            name: name.into(),
            out: Mutex::new(out),
        }
    }

    /// Consumes the UI and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, prefix: &str, message: &str) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        for line in message.lines() {
            let _ = writeln!(out, "{}{}: {}", prefix, self.name, line);
        }
        let _ = out.flush();
    }
}

impl<W: Write + Send> Ui for ConsoleUi<W> {
    fn say(&self, message: &str) {
        self.write_line("==> ", message);
    }

    fn message(&self, message: &str) {
        self.write_line("    ", message);
    }

    fn error(&self, message: &str) {
        self.write_line("!!> ", message);
    }
}
