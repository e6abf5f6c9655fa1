//! Build progress reporting.
//!
//! `cloudops build` reports what it is doing while it walks the docs and
//! embeds chunks. Progress goes to **stderr** so stdout stays parseable.

use std::io::Write;

/// A single progress event during an index build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildProgressEvent {
    /// Walking the docs directory.
    Loading { root: String },
    /// `n` of `total` chunks embedded.
    Embedding { n: u64, total: u64 },
    /// Writing the index files.
    Persisting { dir: String },
}

pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress: "build  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Loading { root } => format!("build  loading {}...\n", root),
            BuildProgressEvent::Embedding { n, total } => format!(
                "build  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Persisting { dir } => format!("build  writing {}\n", dir),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

/// Human progress when stderr is a TTY, otherwise none.
pub fn default_reporter() -> Box<dyn BuildProgressReporter> {
    if atty::is(atty::Stream::Stderr) {
        Box::new(StderrProgress)
    } else {
        Box::new(NoProgress)
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}
