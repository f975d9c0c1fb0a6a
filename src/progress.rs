//! Pipeline progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts
//! (`sweep --format json`). Reporters are picked by `--progress`; see
//! [`ProgressMode`].

use std::io::Write;

/// A single progress event emitted by a pipeline stage.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// A stage started. Total work unknown.
    Stage { name: String },
    /// n files hashed out of total.
    Hashing { n: u64, total: u64 },
    /// n embedding chunks finished out of total.
    Embedding { n: u64, total: u64 },
    /// n pair comparisons finished out of total.
    Scoring { n: u64, total: u64 },
    /// n discarded files handled out of total.
    Relocating { n: u64, total: u64 },
}

impl ProgressEvent {
    fn counts(&self) -> Option<(&'static str, u64, u64)> {
        match self {
            ProgressEvent::Stage { .. } => None,
            ProgressEvent::Hashing { n, total } => Some(("hashing", *n, *total)),
            ProgressEvent::Embedding { n, total } => Some(("embedding", *n, *total)),
            ProgressEvent::Scoring { n, total } => Some(("scoring", *n, *total)),
            ProgressEvent::Relocating { n, total } => Some(("relocating", *n, *total)),
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "snapsweep  scoring  12 / 1,204".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match event.counts() {
            None => match &event {
                ProgressEvent::Stage { name } => format!("snapsweep  {}...\n", name),
                _ => return,
            },
            Some((phase, n, total)) => format!(
                "snapsweep  {}  {} / {}\n",
                phase,
                format_number(n),
                format_number(total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match (&event, event.counts()) {
            (ProgressEvent::Stage { name }, _) => serde_json::json!({
                "event": "stage",
                "stage": name,
            }),
            (_, Some((phase, n, total))) => serde_json::json!({
                "event": "progress",
                "phase": phase,
                "n": n,
                "total": total,
            }),
            (_, None) => return,
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory, in arrival order.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingProgress {
    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
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

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    /// Human when stderr is a TTY, otherwise off.
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressMode {
    pub fn resolve(self) -> Self {
        match self {
            ProgressMode::Auto if atty::is(atty::Stream::Stderr) => ProgressMode::Human,
            ProgressMode::Auto => ProgressMode::Off,
            other => other,
        }
    }

    pub fn reporter(self) -> Box<dyn ProgressReporter> {
        match self.resolve() {
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
            ProgressMode::Off | ProgressMode::Auto => Box::new(NoProgress),
        }
    }
}
