//! Bulk write progress reporting.
//!
//! `save_many` and `update_many` report how many documents of a call have
//! been submitted so far. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

/// A single progress event for a bulk write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BulkProgressEvent {
    /// `n` of `total` documents of `kind` have been submitted.
    Writing {
        kind: &'static str,
        n: u64,
        total: u64,
    },
}

/// Reports bulk progress. Implementations write to stderr (human or JSON).
pub trait BulkProgressReporter: Send + Sync {
    fn report(&self, event: BulkProgressEvent);
}

/// Human-friendly progress on stderr: "article  writing  1,000 / 5,000 documents".
pub struct StderrProgress;

impl BulkProgressReporter for StderrProgress {
    fn report(&self, event: BulkProgressEvent) {
        let BulkProgressEvent::Writing { kind, n, total } = event;
        let line = format!(
            "{}  writing  {} / {} documents\n",
            kind,
            format_number(n),
            format_number(total)
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BulkProgressReporter for JsonProgress {
    fn report(&self, event: BulkProgressEvent) {
        let BulkProgressEvent::Writing { kind, n, total } = event;
        let obj = serde_json::json!({
            "event": "progress",
            "kind": kind,
            "phase": "writing",
            "n": n,
            "total": total
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BulkProgressReporter for NoProgress {
    fn report(&self, _event: BulkProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> std::sync::Arc<dyn BulkProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
