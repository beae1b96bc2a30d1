use std::sync::Arc;

use parking_lot::Mutex;

/// Append-only list of issues recorded by an ingest session.
///
/// Only the owning session appends; readers take snapshots.
#[derive(Debug, Clone, Default)]
pub struct Report {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
