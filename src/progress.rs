//! Upload progress reporting.
//!
//! Reports what the uploader is doing so operators can follow long
//! transfers: which file of how many, and how many bytes of the current
//! file have gone out. Progress is emitted on **stderr** so the summary on
//! stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadProgressEvent {
    /// Walking the data directory. Total unknown.
    Scanning { root: String },
    /// Starting file `n` of `total`.
    File {
        n: u64,
        total: u64,
        file_name: String,
    },
    /// Bytes sent for the current file.
    Transfer {
        file_name: String,
        sent: u64,
        total: u64,
    },
}

/// Receives progress events. Called synchronously from the upload path,
/// so implementations must return quickly and never call the catalog or
/// the store.
pub trait UploadProgressReporter: Send + Sync {
    fn report(&self, event: UploadProgressEvent);
}

/// Human-friendly lines: `upload  3 / 12  Bhv001.m4v  1.2 MiB / 40.0 MiB`.
pub struct StderrProgress;

impl UploadProgressReporter for StderrProgress {
    fn report(&self, event: UploadProgressEvent) {
        let line = match &event {
            UploadProgressEvent::Scanning { root } => format!("scan {}  discovering...\n", root),
            UploadProgressEvent::File {
                n,
                total,
                file_name,
            } => format!(
                "upload  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                file_name
            ),
            UploadProgressEvent::Transfer {
                file_name,
                sent,
                total,
            } => format!(
                "upload  {}  {} / {}\n",
                file_name,
                format_bytes(*sent),
                format_bytes(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl UploadProgressReporter for JsonProgress {
    fn report(&self, event: UploadProgressEvent) {
        let obj = match &event {
            UploadProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "root": root
            }),
            UploadProgressEvent::File {
                n,
                total,
                file_name,
            } => serde_json::json!({
                "event": "progress",
                "phase": "file",
                "file": file_name,
                "n": n,
                "total": total
            }),
            UploadProgressEvent::Transfer {
                file_name,
                sent,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "transfer",
                "file": file_name,
                "sent": sent,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UploadProgressReporter for NoProgress {
    fn report(&self, _event: UploadProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if n < 1024 {
        return format!("{} B", n);
    }
    let mut value = n as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{:.1} {}", value, unit)
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn UploadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
