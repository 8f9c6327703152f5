// Tracing hooks for application performance monitoring.
//
// The dispatcher annotates each internal step (acquire, send, receive)
// through this trait.  Storage and shipping of the resulting record belong
// to the monitoring subsystem; the crate only defines the seam plus a
// minimal in-memory recorder used by tests.

use std::time::{Duration, Instant};

/// Sink for timed sub-process annotations.
pub trait Apm: Send {
    /// Open a timed step; the returned token identifies it to `end`/`error`.
    fn begin(&mut self, name: &str, file: &'static str, line: u32) -> usize;

    /// Close a step, fixing its duration.
    fn end(&mut self, token: usize);

    /// Attach an error classification to a step.
    fn error(&mut self, token: usize, message: &str);
}

#[derive(Debug)]
pub struct Span {
    pub name: String,
    pub file: &'static str,
    pub line: u32,
    pub started: Instant,
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

/// In-memory `Apm` implementation.
#[derive(Debug, Default)]
pub struct Recorder {
    pub spans: Vec<Span>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Apm for Recorder {
    fn begin(&mut self, name: &str, file: &'static str, line: u32) -> usize {
        self.spans.push(Span {
            name: name.to_string(),
            file,
            line,
            started: Instant::now(),
            duration: None,
            error: None,
        });
        self.spans.len() - 1
    }

    fn end(&mut self, token: usize) {
        if let Some(span) = self.spans.get_mut(token) {
            span.duration = Some(span.started.elapsed());
        }
    }

    fn error(&mut self, token: usize, message: &str) {
        if let Some(span) = self.spans.get_mut(token) {
            span.error = Some(message.to_string());
        }
    }
}
