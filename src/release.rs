// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release descriptor.
//!
//! A __release descriptor__ names one upstream release: its version tag, the
//! URL of its primary artifact, and the SHA-256 checksum of that artifact.
//! Every field is parsed into a dedicated type before any network or file
//! operation begins, so nothing downstream ever sees a partially valid
//! release.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    sync::LazyLock,
};

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v\d+\.\d+\.\d+(-[A-Za-z0-9.-]+)?$").unwrap());

static RELEASE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https://([^/\s]+)/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/releases/download/([^/\s]+)/([A-Za-z0-9._+-]+)$",
    )
    .unwrap()
});

/// Version tag of a release, e.g., `v1.2.3` or `v2.0.0-rc.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    /// Parse version tag.
    ///
    /// # Errors
    ///
    /// - Return [`InputError::Version`] if tag is not `vMAJOR.MINOR.PATCH`
    ///   with an optional pre-release suffix.
    pub fn parse(tag: impl AsRef<str>) -> Result<Self> {
        let tag = tag.as_ref();
        if !VERSION.is_match(tag) {
            return Err(InputError::Version(tag.into()));
        }

        Ok(Self(tag.into()))
    }

    /// Full tag with its leading `v`.
    pub fn tag(&self) -> &str {
        &self.0
    }

    /// Bare version number, i.e., the tag without its leading `v`.
    pub fn bare(&self) -> &str {
        &self.0[1..]
    }
}

impl FromStr for Version {
    type Err = InputError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::parse(data)
    }
}

impl Display for Version {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

/// SHA-256 checksum in hexadecimal form.
///
/// Case is preserved as given, but comparison ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Parse hexadecimal SHA-256 checksum.
    ///
    /// # Errors
    ///
    /// - Return [`InputError::Checksum`] if input is not exactly 64
    ///   hexadecimal characters.
    pub fn parse(hex: impl AsRef<str>) -> Result<Self> {
        let hex = hex.as_ref();
        if hex.len() != 64 || !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(InputError::Checksum(hex.into()));
        }

        Ok(Self(hex.into()))
    }

    /// Checksum as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against another hexadecimal digest, ignoring case.
    pub fn matches(&self, other: impl AsRef<str>) -> bool {
        self.0.eq_ignore_ascii_case(other.as_ref())
    }
}

impl FromStr for Checksum {
    type Err = InputError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::parse(data)
    }
}

impl Display for Checksum {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

/// Where release artifacts may come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedOrigin {
    /// Only host allowed to serve release artifacts.
    pub host: String,

    /// Optional `owner/repo` pin.
    pub repository: Option<String>,
}

/// URL of an artifact attached to a release.
///
/// Shaped as `https://<host>/<owner>/<repo>/releases/download/<tag>/<file>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseUrl {
    raw: String,
    host: String,
    owner: String,
    repo: String,
    tag: String,
    filename: String,
}

impl ReleaseUrl {
    /// Parse release artifact URL by shape alone.
    ///
    /// # Errors
    ///
    /// - Return [`InputError::Url`] if URL does not look like a release
    ///   download URL.
    pub fn parse(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();
        let captures = RELEASE_URL.captures(url).ok_or_else(|| InputError::Url {
            url: url.into(),
            reason: "expected https://<host>/<owner>/<repo>/releases/download/<tag>/<file>".into(),
        })?;

        Ok(Self {
            raw: url.into(),
            host: captures[1].into(),
            owner: captures[2].into(),
            repo: captures[3].into(),
            tag: captures[4].into(),
            filename: captures[5].into(),
        })
    }

    /// Parse release artifact URL, and require it to come from a trusted
    /// origin.
    ///
    /// # Errors
    ///
    /// - Return [`InputError::Url`] if URL is malformed, or comes from an
    ///   untrusted host or repository.
    pub fn parse_trusted(url: impl AsRef<str>, origin: &TrustedOrigin) -> Result<Self> {
        let release = Self::parse(url)?;
        if !release.host.eq_ignore_ascii_case(&origin.host) {
            return Err(InputError::Url {
                url: release.raw,
                reason: format!("host must be {}", origin.host),
            });
        }

        if let Some(repository) = &origin.repository {
            if release.repository() != *repository {
                return Err(InputError::Url {
                    url: release.raw,
                    reason: format!("repository must be {repository}"),
                });
            }
        }

        Ok(release)
    }

    /// Full URL.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Release tag segment of the download path.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// File name of the artifact.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Repository as `owner/repo`.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Check if file name ends with any of the given extensions.
    pub fn has_extension(&self, extensions: &[String]) -> bool {
        extensions
            .iter()
            .any(|extension| self.filename.ends_with(extension.as_str()))
    }

    /// URL of another file attached to the same release.
    pub fn sibling(&self, filename: impl AsRef<str>) -> String {
        self.at(&self.tag, filename)
    }

    /// URL of a file attached to another release of the same repository.
    pub fn at(&self, tag: impl AsRef<str>, filename: impl AsRef<str>) -> String {
        format!(
            "https://{}/{}/{}/releases/download/{}/{}",
            self.host,
            self.owner,
            self.repo,
            tag.as_ref(),
            filename.as_ref()
        )
    }
}

impl Display for ReleaseUrl {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.raw)
    }
}

/// Unvalidated release request, as dispatched by a release event.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReleaseRequest {
    /// Version tag.
    pub version: String,

    /// URL of primary artifact.
    pub url: String,

    /// SHA-256 checksum of primary artifact.
    pub checksum: String,

    /// SHA-256 checksum of secondary artifact, if known up front.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_checksum: Option<String>,
}

/// Validated release descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Version tag.
    pub version: Version,

    /// URL of primary artifact.
    pub binary_url: ReleaseUrl,

    /// SHA-256 checksum of primary artifact.
    pub checksum: Checksum,

    /// SHA-256 checksum of secondary artifact, if supplied.
    pub resource_checksum: Option<Checksum>,
}

impl ReleaseDescriptor {
    /// Validate release request.
    ///
    /// The download path of the binary URL must name the same tag as the
    /// version field.
    ///
    /// # Errors
    ///
    /// - Return [`InputError`] naming the first malformed field.
    pub fn from_request(request: &ReleaseRequest, origin: &TrustedOrigin) -> Result<Self> {
        let version = Version::parse(&request.version)?;
        let binary_url = ReleaseUrl::parse_trusted(&request.url, origin)?;
        let checksum = Checksum::parse(&request.checksum)?;
        let resource_checksum = request
            .resource_checksum
            .as_deref()
            .map(Checksum::parse)
            .transpose()?;

        if binary_url.tag() != version.tag() {
            return Err(InputError::TagMismatch {
                tag: binary_url.tag().into(),
                version: version.tag().into(),
            });
        }

        Ok(Self {
            version,
            binary_url,
            checksum,
            resource_checksum,
        })
    }
}

/// Malformed release input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// Version tag has the wrong shape.
    #[error("invalid version {0:?}: expected vMAJOR.MINOR.PATCH[-suffix]")]
    Version(String),

    /// Checksum has the wrong shape.
    #[error("invalid checksum {0:?}: expected 64 hexadecimal characters")]
    Checksum(String),

    /// URL has the wrong shape, or comes from an untrusted origin.
    #[error("invalid release url {url:?}: {reason}")]
    Url { url: String, reason: String },

    /// URL download path names another release than the version field.
    #[error("release url tag {tag:?} does not match version {version:?}")]
    TagMismatch { tag: String, version: String },
}

/// Friendly result alias :3
pub type Result<T, E = InputError> = std::result::Result<T, E>;
