//! One resize pass over every candidate disk.
//!
//! Disks are processed strictly in scan order. For each disk at or above the
//! utilization threshold the volume is grown, then its partition, then its
//! filesystem; each step must finish before the next starts.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::config::{ErrorPolicy, ResizeConfig};
use crate::core::errors::{Result, VagError};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};
use crate::resize::filesystem::{FilesystemGrower, GrowTool};
use crate::resize::partition::{PartitionGrower, PartitionOutcome};
use crate::resize::usage::{DiskRecord, ScanEntry, UsageEvaluator};
use crate::resize::volume::{ResizeOutcome, VolumeResizer, plan_target};

/// What happened to one disk during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiskOutcome {
    BelowThreshold { threshold_percent: f64 },
    Unsupported,
    /// Provider refused for now; retried on a later run.
    Deferred { code: String, message: String },
    /// Dry run: the request that would have been made.
    Planned { target_gib: u64 },
    Grown {
        target_gib: u64,
        waited_ms: u64,
        partition: PartitionOutcome,
        tool: GrowTool,
    },
    /// Recorded only under [`ErrorPolicy::Continue`].
    Failed { code: String, message: String },
}

impl DiskOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::BelowThreshold { .. } => "below-threshold",
            Self::Unsupported => "unsupported",
            Self::Deferred { .. } => "deferred",
            Self::Planned { .. } => "planned",
            Self::Grown { .. } => "grown",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskReport {
    pub device: String,
    pub mount_point: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gib: Option<u64>,
    #[serde(flatten)]
    pub outcome: DiskOutcome,
}

impl DiskReport {
    fn for_record(record: &DiskRecord, outcome: DiskOutcome) -> Self {
        Self {
            device: record.device.path().to_string(),
            mount_point: record.mount_point.clone(),
            volume_id: Some(record.volume_id.clone()),
            used_pct: Some(record.used_pct),
            size_gib: Some(record.volume_size_gib),
            outcome,
        }
    }
}

/// Summary of a whole pass, printable as text or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub increase_percent: f64,
    pub threshold_percent: f64,
    pub disks: Vec<DiskReport>,
}

impl RunReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.disks
            .iter()
            .any(|d| matches!(d.outcome, DiskOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.disks
            .iter()
            .filter(|d| d.outcome.label() == label)
            .count()
    }
}

pub struct Orchestrator {
    evaluator: UsageEvaluator,
    resizer: VolumeResizer,
    partitions: PartitionGrower,
    filesystems: FilesystemGrower,
    settings: ResizeConfig,
    activity: Option<JsonlWriter>,
}

impl Orchestrator {
    pub fn new(
        evaluator: UsageEvaluator,
        resizer: VolumeResizer,
        partitions: PartitionGrower,
        filesystems: FilesystemGrower,
        settings: ResizeConfig,
    ) -> Self {
        Self {
            evaluator,
            resizer,
            partitions,
            filesystems,
            settings,
            activity: None,
        }
    }

    #[must_use]
    pub fn with_activity_log(mut self, writer: JsonlWriter) -> Self {
        self.activity = Some(writer);
        self
    }

    /// Run one pass.
    ///
    /// A scan failure is always fatal. A per-disk failure is fatal under
    /// [`ErrorPolicy::Abort`] and recorded in the report under
    /// [`ErrorPolicy::Continue`].
    pub fn run(&mut self) -> Result<RunReport> {
        let started_at = now();
        let mut start = LogEntry::new(EventType::RunStart, Severity::Info);
        start.details = Some(format!(
            "increase={}% threshold={}% dry_run={}",
            self.settings.increase_percent, self.settings.threshold_percent, self.settings.dry_run
        ));
        self.log(start);
        eprintln!(
            "[VAG-RUN] scanning disks (increase {}%, threshold {}%{})",
            self.settings.increase_percent,
            self.settings.threshold_percent,
            if self.settings.dry_run { ", dry run" } else { "" }
        );

        let entries = match self.evaluator.scan() {
            Ok(entries) => entries,
            Err(err) => {
                self.log(LogEntry::new(EventType::RunComplete, Severity::Critical).with_error(&err));
                self.flush();
                return Err(err);
            }
        };

        let mut disks = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = match entry {
                ScanEntry::Disk(record) => record,
                ScanEntry::Unsupported {
                    device,
                    mount_point,
                } => {
                    disks.push(DiskReport {
                        device,
                        mount_point,
                        volume_id: None,
                        used_pct: None,
                        size_gib: None,
                        outcome: DiskOutcome::Unsupported,
                    });
                    continue;
                }
            };

            match self.process(&record) {
                Ok(outcome) => disks.push(DiskReport::for_record(&record, outcome)),
                Err(err) => {
                    eprintln!(
                        "[VAG-RUN] {} on {}: {err}",
                        record.device,
                        record.mount_point.display()
                    );
                    self.log(
                        LogEntry::for_disk(EventType::DiskFailed, Severity::Critical, &record)
                            .with_error(&err),
                    );
                    if self.settings.error_policy == ErrorPolicy::Abort {
                        self.flush();
                        return Err(err);
                    }
                    disks.push(DiskReport::for_record(&record, DiskOutcome::from(&err)));
                }
            }
        }

        let report = RunReport {
            started_at,
            finished_at: now(),
            dry_run: self.settings.dry_run,
            increase_percent: self.settings.increase_percent,
            threshold_percent: self.settings.threshold_percent,
            disks,
        };
        let mut done = LogEntry::new(EventType::RunComplete, Severity::Info);
        done.ok = Some(!report.has_failures());
        done.details = Some(format!(
            "{} disks, {} grown, {} deferred, {} failed",
            report.disks.len(),
            report.count("grown"),
            report.count("deferred"),
            report.count("failed")
        ));
        self.log(done);
        self.flush();
        eprintln!("[VAG-RUN] finished: {} disks evaluated", report.disks.len());
        Ok(report)
    }

    fn process(&mut self, record: &DiskRecord) -> Result<DiskOutcome> {
        let threshold = self.settings.threshold_percent;
        if record.used_pct < threshold {
            eprintln!(
                "[VAG-RUN] {} at {:.1}% is below {threshold}%, skipping",
                record.mount_point.display(),
                record.used_pct
            );
            self.log(LogEntry::for_disk(EventType::DiskSkipped, Severity::Info, record));
            return Ok(DiskOutcome::BelowThreshold {
                threshold_percent: threshold,
            });
        }

        let target_gib = plan_target(record, self.settings.increase_percent);
        if self.settings.dry_run {
            eprintln!(
                "[VAG-RUN] dry run: would grow {} from {} GiB to {target_gib} GiB",
                record.volume_id, record.volume_size_gib
            );
            return Ok(DiskOutcome::Planned { target_gib });
        }

        let mut requested = LogEntry::for_disk(EventType::ResizeRequested, Severity::Info, record);
        requested.target_gib = Some(target_gib);
        self.log(requested);

        let started = Instant::now();
        let waited_ms = match self.resizer.resize(record, target_gib)? {
            ResizeOutcome::Deferred { code, message, .. } => {
                let mut deferred =
                    LogEntry::for_disk(EventType::ResizeDeferred, Severity::Warning, record);
                deferred.error_code = Some(code.clone());
                deferred.error_message = Some(message.clone());
                self.log(deferred);
                return Ok(DiskOutcome::Deferred { code, message });
            }
            ResizeOutcome::Complete { waited_ms, .. } => waited_ms,
        };
        let mut complete =
            LogEntry::for_disk(EventType::ModificationComplete, Severity::Info, record);
        complete.target_gib = Some(target_gib);
        complete.duration_ms = Some(waited_ms);
        self.log(complete);

        let partition = self.partitions.grow(&record.device)?;
        if let PartitionOutcome::Grown { .. } = partition {
            self.log(LogEntry::for_disk(EventType::PartitionGrown, Severity::Info, record));
        }

        let tool = self
            .filesystems
            .grow(&record.device, &record.mount_point, &record.fs_type)?;
        let mut grown = LogEntry::for_disk(EventType::FilesystemGrown, Severity::Info, record);
        grown.target_gib = Some(target_gib);
        grown.ok = Some(true);
        grown.duration_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        self.log(grown);

        Ok(DiskOutcome::Grown {
            target_gib,
            waited_ms,
            partition,
            tool,
        })
    }

    fn log(&mut self, entry: LogEntry) {
        if let Some(writer) = self.activity.as_mut() {
            writer.write_entry(&entry);
        }
    }

    fn flush(&mut self) {
        if let Some(writer) = self.activity.as_mut() {
            writer.flush();
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

impl From<&VagError> for DiskOutcome {
    fn from(err: &VagError) -> Self {
        match err {
            VagError::ProviderDeferred { code, message, .. } => Self::Deferred {
                code: code.clone(),
                message: message.clone(),
            },
            other => Self::Failed {
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}
