//! Block-storage volume service: lookup, modification, and modification
//! status, plus an implementation that drives the `aws` CLI.

#![allow(missing_docs)]

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VagError};
use crate::platform::process::CommandRunner;

/// Provider code returned when a volume was modified too recently.
pub const RATE_EXCEEDED: &str = "VolumeModificationRateExceeded";
/// Provider code returned while a previous modification is unfinished.
pub const INCORRECT_MODIFICATION_STATE: &str = "IncorrectModificationState";

/// `aws` CLI client errors, raw EC2 XML bodies (`--debug`), and JSON error bodies.
static ERROR_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"An error occurred \(([A-Za-z0-9.]+)\)|<Code>([A-Za-z0-9.]+)</Code>|"Code"\s*:\s*"([A-Za-z0-9.]+)""#,
    )
    .expect("static regex is valid")
});

/// A volume attached to this instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: String,
    pub size_gib: u64,
}

/// Progress of an asynchronous volume modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationState {
    Modifying,
    /// New capacity is usable; the provider is still rebalancing.
    Optimizing,
    Completed,
    Failed,
    #[serde(untagged)]
    Other(String),
}

impl ModificationState {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "modifying" => Self::Modifying,
            "optimizing" => Self::Optimizing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Modifying)
    }
}

/// Consumed surface of the cloud volume service.
pub trait VolumeService: Send + Sync {
    /// Volumes attached at `slot` on `instance_id`.
    fn describe_volumes(&self, slot: &str, instance_id: &str) -> Result<Vec<Volume>>;

    /// Request a new size. Provider refusals are [`VagError::Provider`]
    /// carrying the provider's error code.
    fn modify_volume(&self, volume_id: &str, target_size_gib: u64) -> Result<()>;

    /// States of the modifications recorded for `volume_id`, newest first.
    fn describe_volume_modifications(&self, volume_id: &str) -> Result<Vec<ModificationState>>;
}

/// Extract the provider error code from CLI stderr.
///
/// Falls back to a bare mention of one of the deferral codes when the output
/// matches none of the known error layouts.
#[must_use]
pub fn parse_error_code(stderr: &str) -> Option<String> {
    if let Some(caps) = ERROR_CODE.captures(stderr) {
        return caps
            .iter()
            .skip(1)
            .flatten()
            .next()
            .map(|code| code.as_str().to_string());
    }
    [RATE_EXCEEDED, INCORRECT_MODIFICATION_STATE]
        .into_iter()
        .find(|code| stderr.contains(code))
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVolumesOutput {
    #[serde(default)]
    volumes: Vec<VolumeRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeRecord {
    volume_id: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeModificationsOutput {
    #[serde(default)]
    volumes_modifications: Vec<ModificationRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModificationRecord {
    modification_state: String,
}

/// `VolumeService` backed by the `aws ec2` command line.
pub struct AwsCliVolumeService {
    program: String,
    region: String,
    runner: Arc<dyn CommandRunner>,
}

impl AwsCliVolumeService {
    pub fn new(program: &str, region: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.to_string(),
            region: region.to_string(),
            runner,
        }
    }

    fn call(&self, operation: &'static str, args: &[String]) -> Result<String> {
        let mut full = vec![
            "ec2".to_string(),
            operation.to_string(),
            "--region".to_string(),
            self.region.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        full.extend_from_slice(args);
        let output = self.runner.run(&self.program, &full)?;
        if output.success() {
            return Ok(output.stdout);
        }
        let stderr = output.stderr.trim().to_string();
        Err(VagError::Provider {
            operation,
            code: parse_error_code(&stderr),
            details: if stderr.is_empty() {
                format!("{} exited with status {}", self.program, output.status)
            } else {
                stderr
            },
        })
    }
}

impl VolumeService for AwsCliVolumeService {
    fn describe_volumes(&self, slot: &str, instance_id: &str) -> Result<Vec<Volume>> {
        let raw = self.call(
            "describe-volumes",
            &[
                "--filters".to_string(),
                format!("Name=attachment.device,Values={slot}"),
                format!("Name=attachment.instance-id,Values={instance_id}"),
            ],
        )?;
        let parsed: DescribeVolumesOutput = serde_json::from_str(&raw)?;
        Ok(parsed
            .volumes
            .into_iter()
            .map(|v| Volume {
                volume_id: v.volume_id,
                size_gib: v.size,
            })
            .collect())
    }

    fn modify_volume(&self, volume_id: &str, target_size_gib: u64) -> Result<()> {
        self.call(
            "modify-volume",
            &[
                "--volume-id".to_string(),
                volume_id.to_string(),
                "--size".to_string(),
                target_size_gib.to_string(),
            ],
        )?;
        Ok(())
    }

    fn describe_volume_modifications(&self, volume_id: &str) -> Result<Vec<ModificationState>> {
        let raw = self.call(
            "describe-volumes-modifications",
            &["--volume-ids".to_string(), volume_id.to_string()],
        )?;
        let parsed: DescribeModificationsOutput = serde_json::from_str(&raw)?;
        Ok(parsed
            .volumes_modifications
            .iter()
            .map(|m| ModificationState::parse(&m.modification_state))
            .collect())
    }
}
