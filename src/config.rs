// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of tapsmith's configuration file to simplify the
//! process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! The configuration is read once at process entry, and then handed by
//! reference to [`ArtifactValidator`] and [`FormulaUpdater`]. Neither of them
//! reads the environment on their own.
//!
//! [`ArtifactValidator`]: crate::artifact::ArtifactValidator
//! [`FormulaUpdater`]: crate::formula::FormulaUpdater

use crate::{artifact::fetch::RetryPolicy, release::TrustedOrigin};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

/// Tapsmith configuration layout.
///
/// # General Layout
///
/// The configuration is composed of three sections. The release section
/// describes what a trusted release URL looks like. The fetch section bounds
/// network work. The formula section says which formula to patch, and how to
/// record the change.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TapConfig {
    /// Shape of trusted release URLs.
    pub release: ReleaseSettings,

    /// Limits for artifact downloads.
    pub fetch: FetchSettings,

    /// Formula patching and commit settings.
    pub formula: FormulaSettings,
}

impl FromStr for TapConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: TapConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on formula path field.
        if let Some(path) = config.formula.path.take() {
            let expanded = shellexpand::full(path.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
            config.formula.path = Some(PathBuf::from(expanded));
        }

        Ok(config)
    }
}

impl Display for TapConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Release URL settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// Only host that release artifacts may be fetched from.
    pub host: String,

    /// Pin releases to one `owner/repo` pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// File name endings accepted for release archives.
    pub archive_extensions: Vec<String>,

    /// Name of the checksums manifest published along side each release.
    pub manifest: String,
}

impl ReleaseSettings {
    /// Trusted origin that release URLs must come from.
    pub fn origin(&self) -> TrustedOrigin {
        TrustedOrigin {
            host: self.host.clone(),
            repository: self.repository.clone(),
        }
    }
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            host: "github.com".into(),
            repository: None,
            archive_extensions: vec![".tar.gz".into(), ".tgz".into()],
            manifest: "checksums.txt".into(),
        }
    }
}

/// Download limits.
///
/// Timeouts and backoff are expressed in whole seconds.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Maximum number of download attempts.
    pub max_retries: u32,

    /// Connect timeout of each attempt.
    pub connect_timeout: u64,

    /// Overall timeout of each attempt.
    pub timeout: u64,

    /// Base of the exponential backoff between attempts.
    pub backoff_base: u64,

    /// Size ceiling of a downloaded artifact in bytes.
    pub max_size: u64,
}

impl FetchSettings {
    /// Retry policy for downloads.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff_base: Duration::from_secs(self.backoff_base),
        }
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Per-attempt timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            connect_timeout: 30,
            timeout: 300,
            backoff_base: 1,
            max_size: 100 * 1024 * 1024,
        }
    }
}

/// Formula patching settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FormulaSettings {
    /// Path to formula file to keep updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Name of the resource block holding the secondary artifact.
    ///
    /// The first resource block is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Suffix appended to the formula path to name its snapshot.
    pub backup_suffix: String,

    /// Template markers that must never survive into a patched formula.
    pub placeholders: Vec<String>,

    /// Remote to push formula commits to.
    pub remote: String,

    /// Push after committing.
    pub push: bool,
}

impl Default for FormulaSettings {
    fn default() -> Self {
        Self {
            path: None,
            resource: None,
            backup_suffix: ".backup".into(),
            placeholders: vec![
                "PLACEHOLDER".into(),
                "REPLACE_ME".into(),
                "{{VERSION}}".into(),
                "{{SHA256}}".into(),
                "{{URL}}".into(),
            ],
            remote: "origin".into(),
            push: true,
        }
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
