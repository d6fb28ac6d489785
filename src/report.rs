// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Failure reporting.
//!
//! When a release run fails, an external issue reporter needs to know which
//! stage failed, for which version, and why. This module defines that record
//! as a small TOML document, along with the process exit code of every
//! failure category.
//!
//! # Exit Codes
//!
//! | Code | Meaning                                          |
//! |------|--------------------------------------------------|
//! | 0    | Success.                                         |
//! | 1    | Any other failure.                               |
//! | 2    | Invalid input or configuration.                  |
//! | 3    | Download or network failure.                     |
//! | 4    | Backup, patch, or post-patch validation failure. |
//! | 5    | Size or checksum failure.                        |
//! | 6    | Commit or push failure.                          |

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Loading configuration, before any stage ran.
    Configure,

    /// Artifact validation.
    Validate,

    /// Formula update.
    Update,
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Configure => "configure",
            Self::Validate => "validate",
            Self::Update => "update",
        };
        fmt.write_str(name)
    }
}

/// Category of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    InvalidInput,
    DownloadFailed,
    FileTooLarge,
    ChecksumMismatch,
    BackupFailed,
    PatchFailed,
    ValidationFailed,
    CommitFailed,
    Other,
}

impl Category {
    /// Process exit code of this category.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::InvalidInput => 2,
            Self::DownloadFailed => 3,
            Self::BackupFailed | Self::PatchFailed | Self::ValidationFailed => 4,
            Self::FileTooLarge | Self::ChecksumMismatch => 5,
            Self::CommitFailed => 6,
            Self::Other => 1,
        }
    }
}

impl Display for Category {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::InvalidInput => "invalid-input",
            Self::DownloadFailed => "download-failed",
            Self::FileTooLarge => "file-too-large",
            Self::ChecksumMismatch => "checksum-mismatch",
            Self::BackupFailed => "backup-failed",
            Self::PatchFailed => "patch-failed",
            Self::ValidationFailed => "validation-failed",
            Self::CommitFailed => "commit-failed",
            Self::Other => "other",
        };
        fmt.write_str(name)
    }
}

/// Machine-readable failure record.
///
/// # Layout
///
/// ```toml
/// stage = "validate"
/// version = "v1.2.3"
/// category = "checksum-mismatch"
/// detail = "checksum mismatch: expected ..., got ..."
/// run = "https://github.com/acme/homebrew-tap/actions/runs/42"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FailureReport {
    /// Stage that failed.
    pub stage: Stage,

    /// Version tag being released, as given.
    pub version: String,

    /// Category of failure.
    pub category: Category,

    /// Full error chain.
    pub detail: String,

    /// Reference to the run that failed, e.g., a CI run URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
}

impl FailureReport {
    /// Write report to target path, creating parent directories.
    ///
    /// # Errors
    ///
    /// - Return [`ReportError::Serialize`] if report cannot be serialized.
    /// - Return [`ReportError::Write`] if report cannot be written.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let write_error = |source| ReportError::Write {
            source,
            path: path.to_path_buf(),
        };

        let data = toml::ser::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(write_error)?;
        }
        std::fs::write(path, data).map_err(write_error)?;

        Ok(())
    }
}

impl FromStr for FailureReport {
    type Err = ReportError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(toml::de::from_str(data)?)
    }
}

impl Display for FailureReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(|_| FmtError)?
                .as_str(),
        )
    }
}

/// Stage failure with its category.
///
/// Carried through [`anyhow::Error`] at the binary boundary, so the exit code
/// can be recovered with `downcast_ref`.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed ({category})")]
pub struct Failure {
    pub stage: Stage,
    pub category: Category,
    #[source]
    pub source: anyhow::Error,
}

impl Failure {
    pub fn new(stage: Stage, category: Category, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            category,
            source: source.into(),
        }
    }

    /// Process exit code of this failure.
    pub fn exit_code(&self) -> u8 {
        self.category.exit_code()
    }

    /// Build report for target version.
    pub fn report(&self, version: impl Into<String>, run: Option<String>) -> FailureReport {
        FailureReport {
            stage: self.stage,
            version: version.into(),
            category: self.category,
            detail: format!("{:#}", self.source),
            run,
        }
    }
}

/// Failure report error types.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Failed to deserialize report.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize report.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to write report.
    #[error("failed to write failure report to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = ReportError> = std::result::Result<T, E>;
