//! VAG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, VagError>;

/// Top-level error type for volume autogrow.
#[derive(Debug, Error)]
pub enum VagError {
    #[error("[VAG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[VAG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[VAG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[VAG-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[VAG-2001] disk probe failure for {path}: {details}")]
    Probe { path: PathBuf, details: String },

    #[error("[VAG-2002] mount table parse failure: {details}")]
    MountParse { details: String },

    #[error("[VAG-2003] device descriptor probe failure for {device}: {details}")]
    DeviceDescriptor { device: String, details: String },

    #[error("[VAG-2004] {device} is not a block-storage volume (model {model:?})")]
    NotBlockStorage { device: String, model: String },

    #[error("[VAG-2101] {program} exited with status {status}: {stderr}")]
    LocalTool {
        program: String,
        args: Vec<String>,
        status: i32,
        stderr: String,
    },

    #[error("[VAG-3001] no cloud volume attached at {slot} for device {device}")]
    Mapping { device: String, slot: String },

    #[error("[VAG-3002] {count} cloud volumes match {slot} for device {device}: {volume_ids:?}")]
    AmbiguousMapping {
        device: String,
        slot: String,
        count: usize,
        volume_ids: Vec<String>,
    },

    #[error("[VAG-3101] modification of {volume_id} deferred ({code}): {message}")]
    ProviderDeferred {
        volume_id: String,
        code: String,
        message: String,
    },

    #[error("[VAG-3102] provider failure in {operation}: {details}")]
    Provider {
        operation: &'static str,
        code: Option<String>,
        details: String,
    },

    #[error("[VAG-3201] instance metadata failure: {details}")]
    Metadata { details: String },

    #[error("[VAG-3301] modification of {volume_id} still in progress after {waited:?}")]
    Timeout { volume_id: String, waited: Duration },

    #[error("[VAG-3302] cancelled while {stage}")]
    Cancelled { stage: String },

    #[error("[VAG-3901] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[VAG-3902] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VagError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "VAG-1001",
            Self::MissingConfig { .. } => "VAG-1002",
            Self::ConfigParse { .. } => "VAG-1003",
            Self::UnsupportedPlatform { .. } => "VAG-1101",
            Self::Probe { .. } => "VAG-2001",
            Self::MountParse { .. } => "VAG-2002",
            Self::DeviceDescriptor { .. } => "VAG-2003",
            Self::NotBlockStorage { .. } => "VAG-2004",
            Self::LocalTool { .. } => "VAG-2101",
            Self::Mapping { .. } => "VAG-3001",
            Self::AmbiguousMapping { .. } => "VAG-3002",
            Self::ProviderDeferred { .. } => "VAG-3101",
            Self::Provider { .. } => "VAG-3102",
            Self::Metadata { .. } => "VAG-3201",
            Self::Timeout { .. } => "VAG-3301",
            Self::Cancelled { .. } => "VAG-3302",
            Self::Serialization { .. } => "VAG-3901",
            Self::Io { .. } => "VAG-3902",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for VagError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for VagError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<reqwest::Error> for VagError {
    fn from(value: reqwest::Error) -> Self {
        Self::Metadata {
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<VagError> {
        vec![
            VagError::InvalidConfig {
                details: String::new(),
            },
            VagError::MissingConfig {
                path: PathBuf::new(),
            },
            VagError::ConfigParse {
                context: "",
                details: String::new(),
            },
            VagError::UnsupportedPlatform {
                details: String::new(),
            },
            VagError::Probe {
                path: PathBuf::new(),
                details: String::new(),
            },
            VagError::MountParse {
                details: String::new(),
            },
            VagError::DeviceDescriptor {
                device: String::new(),
                details: String::new(),
            },
            VagError::NotBlockStorage {
                device: String::new(),
                model: String::new(),
            },
            VagError::LocalTool {
                program: String::new(),
                args: Vec::new(),
                status: 1,
                stderr: String::new(),
            },
            VagError::Mapping {
                device: String::new(),
                slot: String::new(),
            },
            VagError::AmbiguousMapping {
                device: String::new(),
                slot: String::new(),
                count: 2,
                volume_ids: Vec::new(),
            },
            VagError::ProviderDeferred {
                volume_id: String::new(),
                code: String::new(),
                message: String::new(),
            },
            VagError::Provider {
                operation: "",
                code: None,
                details: String::new(),
            },
            VagError::Metadata {
                details: String::new(),
            },
            VagError::Timeout {
                volume_id: String::new(),
                waited: Duration::ZERO,
            },
            VagError::Cancelled {
                stage: String::new(),
            },
            VagError::Serialization {
                context: "",
                details: String::new(),
            },
            VagError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(VagError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code {}: {msg}",
                err.code()
            );
        }
    }

    #[test]
    fn ambiguous_mapping_lists_candidates() {
        let err = VagError::AmbiguousMapping {
            device: "/dev/xvdf".to_string(),
            slot: "/dev/sdf".to_string(),
            count: 2,
            volume_ids: vec!["vol-a".to_string(), "vol-b".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("vol-a") && msg.contains("vol-b"), "{msg}");
        assert!(msg.contains("/dev/sdf"), "{msg}");
    }

    #[test]
    fn io_convenience_constructor() {
        let err = VagError::io(
            "/var/log/vag/activity.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "VAG-3902");
        assert!(err.to_string().contains("/var/log/vag/activity.jsonl"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: VagError = json_err.into();
        assert_eq!(err.code(), "VAG-3901");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: VagError = toml_err.into();
        assert_eq!(err.code(), "VAG-1003");
    }
}
