//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VagError};

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub resize: ResizeConfig,
    pub poll: PollConfig,
    pub tools: ToolsConfig,
    pub cloud: CloudConfig,
    pub paths: PathsConfig,
}

/// What the orchestrator does after a fatal per-disk failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the whole run on the first fatal error.
    #[default]
    Abort,
    /// Record the failure and move on to the next disk.
    Continue,
}

impl FromStr for ErrorPolicy {
    type Err = VagError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            other => Err(VagError::ConfigParse {
                context: "error_policy",
                details: format!("expected `abort` or `continue`, got {other:?}"),
            }),
        }
    }
}

/// Growth decision knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResizeConfig {
    /// Percentage added to the current size on each growth.
    pub increase_percent: f64,
    /// Disks at or above this utilization are grown.
    pub threshold_percent: f64,
    /// Report decisions without touching the volume service or running tools.
    pub dry_run: bool,
    pub error_policy: ErrorPolicy,
}

/// Bounded wait for the cloud-side modification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub max_wait_secs: u64,
}

/// External programs invoked after the volume grows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub growpart: String,
    pub xfs_growfs: String,
    pub resize2fs: String,
}

/// Cloud API and instance metadata access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloudConfig {
    pub aws_cli: String,
    /// Skips the metadata lookup for the region when set.
    pub region: Option<String>,
    /// Skips the metadata lookup for the instance id when set.
    pub instance_id: Option<String>,
    pub metadata_endpoint: String,
    pub metadata_timeout_ms: u64,
}

/// Filesystem paths used by vag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            increase_percent: 20.0,
            threshold_percent: 85.0,
            dry_run: false,
            error_policy: ErrorPolicy::Abort,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            max_wait_secs: 30 * 60,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            growpart: "growpart".to_string(),
            xfs_growfs: "xfs_growfs".to_string(),
            resize2fs: "resize2fs".to_string(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            aws_cli: "aws".to_string(),
            region: None,
            instance_id: None,
            metadata_endpoint: "http://169.254.169.254".to_string(),
            metadata_timeout_ms: 2_000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("/etc/vag/config.toml"),
            activity_log: PathBuf::from("/var/log/vag/activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| VagError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(VagError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        set_parsed(
            &mut lookup,
            "VAG_RESIZE_INCREASE_PERCENT",
            &mut self.resize.increase_percent,
        )?;
        set_parsed(
            &mut lookup,
            "VAG_RESIZE_THRESHOLD_PERCENT",
            &mut self.resize.threshold_percent,
        )?;
        set_parsed(&mut lookup, "VAG_RESIZE_DRY_RUN", &mut self.resize.dry_run)?;
        if let Some(raw) = lookup("VAG_RESIZE_ERROR_POLICY") {
            self.resize.error_policy = raw.parse()?;
        }

        set_parsed(
            &mut lookup,
            "VAG_POLL_INTERVAL_SECS",
            &mut self.poll.interval_secs,
        )?;
        set_parsed(
            &mut lookup,
            "VAG_POLL_MAX_WAIT_SECS",
            &mut self.poll.max_wait_secs,
        )?;

        if let Some(raw) = lookup("VAG_CLOUD_REGION") {
            self.cloud.region = Some(raw);
        }
        if let Some(raw) = lookup("VAG_CLOUD_INSTANCE_ID") {
            self.cloud.instance_id = Some(raw);
        }
        if let Some(raw) = lookup("VAG_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let increase = self.resize.increase_percent;
        if !(increase > 0.0 && increase <= 100.0) {
            return Err(VagError::InvalidConfig {
                details: format!("resize.increase_percent must be in (0, 100], got {increase}"),
            });
        }

        let threshold = self.resize.threshold_percent;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(VagError::InvalidConfig {
                details: format!("resize.threshold_percent must be in [0, 100], got {threshold}"),
            });
        }

        if self.poll.interval_secs == 0 {
            return Err(VagError::InvalidConfig {
                details: "poll.interval_secs must be >= 1".to_string(),
            });
        }
        if self.poll.max_wait_secs < self.poll.interval_secs {
            return Err(VagError::InvalidConfig {
                details: format!(
                    "poll.max_wait_secs ({}) must be >= poll.interval_secs ({})",
                    self.poll.max_wait_secs, self.poll.interval_secs
                ),
            });
        }

        for (name, program) in [
            ("tools.growpart", &self.tools.growpart),
            ("tools.xfs_growfs", &self.tools.xfs_growfs),
            ("tools.resize2fs", &self.tools.resize2fs),
            ("cloud.aws_cli", &self.cloud.aws_cli),
        ] {
            if program.trim().is_empty() {
                return Err(VagError::InvalidConfig {
                    details: format!("{name} must not be empty"),
                });
            }
        }

        if self.cloud.metadata_timeout_ms == 0 {
            return Err(VagError::InvalidConfig {
                details: "cloud.metadata_timeout_ms must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| VagError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Config, ErrorPolicy, VagError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.poll.interval_secs, 15);
        assert_eq!(cfg.resize.error_policy, ErrorPolicy::Abort);
    }

    #[test]
    fn increase_percent_must_be_positive_and_bounded() {
        for bad in [0.0, -5.0, 100.5, f64::NAN] {
            let mut cfg = Config::default();
            cfg.resize.increase_percent = bad;
            let err = cfg.validate().expect_err("expected increase validation error");
            assert!(err.to_string().contains("increase_percent"), "{err}");
        }
    }

    #[test]
    fn threshold_percent_bounded() {
        let mut cfg = Config::default();
        cfg.resize.threshold_percent = 101.0;
        let err = cfg.validate().expect_err("expected threshold error");
        assert!(matches!(err, VagError::InvalidConfig { .. }));

        cfg.resize.threshold_percent = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn poll_interval_must_fit_inside_max_wait() {
        let mut cfg = Config::default();
        cfg.poll.interval_secs = 0;
        assert!(cfg.validate().is_err());

        cfg.poll.interval_secs = 60;
        cfg.poll.max_wait_secs = 30;
        let err = cfg.validate().expect_err("expected poll error");
        assert!(err.to_string().contains("max_wait_secs"));
    }

    #[test]
    fn empty_tool_name_rejected() {
        let mut cfg = Config::default();
        cfg.tools.growpart = "  ".to_string();
        let err = cfg.validate().expect_err("expected tool error");
        assert!(err.to_string().contains("tools.growpart"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("VAG_RESIZE_INCREASE_PERCENT", "35"),
            ("VAG_RESIZE_THRESHOLD_PERCENT", "70.5"),
            ("VAG_RESIZE_DRY_RUN", "true"),
            ("VAG_RESIZE_ERROR_POLICY", "Continue"),
            ("VAG_POLL_MAX_WAIT_SECS", "600"),
            ("VAG_CLOUD_REGION", "eu-west-1"),
            ("VAG_ACTIVITY_LOG", "/tmp/vag/activity.jsonl"),
        ]);

        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert!((cfg.resize.increase_percent - 35.0).abs() < f64::EPSILON);
        assert!((cfg.resize.threshold_percent - 70.5).abs() < f64::EPSILON);
        assert!(cfg.resize.dry_run);
        assert_eq!(cfg.resize.error_policy, ErrorPolicy::Continue);
        assert_eq!(cfg.poll.max_wait_secs, 600);
        assert_eq!(cfg.cloud.region.as_deref(), Some("eu-west-1"));
        assert_eq!(
            cfg.paths.activity_log,
            PathBuf::from("/tmp/vag/activity.jsonl")
        );
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("VAG_POLL_INTERVAL_SECS", "soon")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            VagError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("VAG_POLL_INTERVAL_SECS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_invalid_policy_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("VAG_RESIZE_ERROR_POLICY", "retry")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid policy should fail");
        assert_eq!(err.code(), "VAG-1003");
    }

    #[test]
    fn toml_sections_parse_with_partial_overrides() {
        let raw = r#"
            [resize]
            increase_percent = 50
            error_policy = "continue"

            [tools]
            growpart = "/usr/local/bin/growpart"
        "#;
        let cfg: Config = toml::from_str(raw).expect("toml should parse");
        assert!((cfg.resize.increase_percent - 50.0).abs() < f64::EPSILON);
        assert!((cfg.resize.threshold_percent - 85.0).abs() < f64::EPSILON);
        assert_eq!(cfg.resize.error_policy, ErrorPolicy::Continue);
        assert_eq!(cfg.tools.growpart, "/usr/local/bin/growpart");
        assert_eq!(cfg.tools.resize2fs, "resize2fs");
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[poll]\ninterval_secs = 5\nmax_wait_secs = 50\n")
            .expect("write config");
        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.poll.interval_secs, 5);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/vag/config.toml")));
        let err = result.expect_err("missing explicit config must fail");
        assert!(matches!(err, VagError::MissingConfig { .. }));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash");
        assert_eq!(before, cfg.stable_hash().expect("hash"));
        let mut modified = Config::default();
        modified.resize.increase_percent = 40.0;
        assert_ne!(before, modified.stable_hash().expect("hash"));
    }
}
