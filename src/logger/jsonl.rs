//! Activity trail: append-only line-delimited JSON, one object per resize event.
//!
//! Each line is one complete JSON object written with a single `write_all`.
//! A logging failure never fails a resize run: the writer steps down from
//! the primary file to a fallback file, then to stderr (`[VAG-JSONL]`
//! prefix), then discards.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VagError};
use crate::resize::usage::DiskRecord;

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity events emitted by a resize run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    DiskSkipped,
    ResizeRequested,
    ResizeDeferred,
    ModificationComplete,
    PartitionGrown,
    FilesystemGrown,
    DiskFailed,
    RunComplete,
}

/// A single JSONL log entry; all fields optional except `ts`, `event`, `severity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Local block device path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
    /// Filesystem utilization at scan time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_pct: Option<f64>,
    /// Volume size before the modification, GiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gib: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_gib: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// VAG error code or provider error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            device: None,
            mount_point: None,
            volume_id: None,
            used_pct: None,
            size_gib: None,
            target_gib: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Entry describing one disk record.
    pub fn for_disk(event: EventType, severity: Severity, disk: &DiskRecord) -> Self {
        Self {
            device: Some(disk.device.path().to_string()),
            mount_point: Some(disk.mount_point.display().to_string()),
            volume_id: Some(disk.volume_id.clone()),
            used_pct: Some(disk.used_pct),
            size_gib: Some(disk.volume_size_gib),
            ..Self::new(event, severity)
        }
    }

    #[must_use]
    pub fn with_error(mut self, err: &VagError) -> Self {
        self.ok = Some(false);
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Where lines currently go, in degradation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Destination {
    const fn next(self) -> Self {
        match self {
            Self::Primary => Self::Fallback,
            Self::Fallback => Self::Stderr,
            Self::Stderr | Self::Discard => Self::Discard,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened or written, e.g. a read-only `/var`.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would grow past this size.
    pub max_size_bytes: u64,
    /// Rotated generations kept as `<path>.1` .. `<path>.N`.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    /// Defaults for everything except the primary path.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/vag/activity.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/vag.jsonl")),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

/// An open log file and its current length.
struct Sink {
    path: PathBuf,
    file: BufWriter<File>,
    len: u64,
}

impl Sink {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| VagError::io(parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| VagError::io(path, source))?;
        let len = file.metadata().map_or(0, |m| m.len());
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            len,
        })
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.len += line.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()
    }
}

/// Append-only JSONL writer that rotates by size and degrades instead of
/// failing: primary file, fallback file, stderr, then silence.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Option<Sink>,
    destination: Destination,
}

impl JsonlWriter {
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: None,
            destination: Destination::Primary,
        };
        writer.open_destination();
        writer
    }

    /// Serialize `entry` and append it as one line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => eprintln!("[VAG-JSONL] dropping unserializable entry: {e}"),
        }
    }

    /// Flush buffered lines and sync them to disk.
    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut()
            && sink.sync().is_err()
        {
            self.degrade();
        }
    }

    #[must_use]
    pub fn state(&self) -> &'static str {
        self.destination.label()
    }

    fn write_line(&mut self, line: &str) {
        loop {
            match self.destination {
                Destination::Primary | Destination::Fallback => {
                    if self
                        .sink
                        .as_ref()
                        .is_some_and(|s| s.len + line.len() as u64 > self.config.max_size_bytes)
                    {
                        self.rotate();
                    }
                    if let Some(sink) = self.sink.as_mut()
                        && sink.append(line).is_ok()
                    {
                        return;
                    }
                    self.degrade();
                }
                Destination::Stderr => {
                    eprint!("[VAG-JSONL] {line}");
                    return;
                }
                Destination::Discard => return,
            }
        }
    }

    /// Open the file for the current destination, stepping down the chain
    /// until one opens or only stderr is left.
    fn open_destination(&mut self) {
        loop {
            let path = match self.destination {
                Destination::Primary => Some(self.config.path.clone()),
                Destination::Fallback => self.config.fallback_path.clone(),
                Destination::Stderr | Destination::Discard => return,
            };
            if let Some(path) = path {
                match Sink::open(&path) {
                    Ok(sink) => {
                        self.sink = Some(sink);
                        return;
                    }
                    Err(e) => eprintln!("[VAG-JSONL] cannot use {}: {e}", path.display()),
                }
            }
            self.destination = self.destination.next();
            eprintln!("[VAG-JSONL] activity log now goes to {}", self.state());
        }
    }

    fn degrade(&mut self) {
        self.sink = None;
        self.destination = self.destination.next();
        self.open_destination();
    }

    /// `<path>.N-1` → `<path>.N` .. `<path>` → `<path>.1`, then reopen `<path>`.
    fn rotate(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        let _ = sink.file.flush();
        let base = sink.path;

        if self.config.max_rotated_files == 0 {
            let _ = fs::remove_file(&base);
        } else {
            for generation in (1..self.config.max_rotated_files).rev() {
                let _ = rename(
                    rotated_name(&base, generation),
                    rotated_name(&base, generation + 1),
                );
            }
            let _ = rename(&base, rotated_name(&base, 1));
        }

        match Sink::open(&base) {
            Ok(fresh) => self.sink = Some(fresh),
            Err(_) => self.degrade(),
        }
    }
}

/// `activity.jsonl` → `activity.jsonl.3`.
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
