// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release artifact validation.
//!
//! Before any formula is touched, the artifact that a release points at must
//! prove to be what the release claims it is. Validation is strictly read
//! only: the artifact is fetched into a private temporary directory, measured,
//! hashed, and sniffed. The temporary directory is removed on every exit path,
//! early failures included.
//!
//! # Validation Steps
//!
//! 1. Check URL shape and checksum format. No network access happens if
//!    either is malformed. Dry runs stop here.
//! 2. Download with bounded retries and exponential backoff.
//! 3. Reject artifacts above the configured size ceiling.
//! 4. Compare SHA-256 digest against the expected checksum, ignoring case.
//! 5. Sniff archive type. A mismatch only warns, because the heuristic is
//!    unreliable across platforms.
//! 6. Copy the artifact to a durable path if the caller asked for one.

pub mod digest;
pub mod fetch;

use crate::{
    artifact::fetch::{with_retry, Fetch, FetchError, ReqwestFetcher, RetryPolicy},
    config::TapConfig,
    release::{Checksum, InputError, ReleaseUrl, TrustedOrigin},
    report::Category,
};

use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Options of one validation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Stop after format checks.
    pub dry_run: bool,

    /// Keep a copy of the verified artifact at this path.
    pub persist_to: Option<PathBuf>,
}

/// Result of a successful validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Formats are valid; nothing was downloaded.
    Previewed,

    /// Artifact was downloaded and verified.
    Verified(VerifiedArtifact),
}

/// Facts established about a verified artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedArtifact {
    /// File name of the artifact.
    pub filename: String,

    /// Size in bytes.
    pub size: u64,

    /// Lowercase hexadecimal SHA-256 digest.
    pub digest: String,

    /// Whether the content looked like a compressed tarball.
    pub looks_like_archive: bool,

    /// Durable copy of the artifact, if requested.
    pub persisted: Option<PathBuf>,
}

/// Validates release artifacts.
#[derive(Debug)]
pub struct ArtifactValidator<F = ReqwestFetcher>
where
    F: Fetch,
{
    origin: TrustedOrigin,
    archive_extensions: Vec<String>,
    retry: RetryPolicy,
    max_size: u64,
    fetcher: F,
}

impl<F> ArtifactValidator<F>
where
    F: Fetch,
{
    /// Construct new artifact validator.
    pub fn new(config: &TapConfig, fetcher: F) -> Self {
        Self {
            origin: config.release.origin(),
            archive_extensions: config.release.archive_extensions.clone(),
            retry: config.fetch.retry_policy(),
            max_size: config.fetch.max_size,
            fetcher,
        }
    }

    /// Validate release artifact at `url` against `expected` checksum.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::InvalidUrl`] if URL is malformed.
    /// - Return [`ValidationError::InvalidChecksum`] if checksum is malformed.
    /// - Return [`ValidationError::DownloadFailed`] if every download attempt
    ///   failed.
    /// - Return [`ValidationError::FileTooLarge`] if artifact exceeds size
    ///   ceiling.
    /// - Return [`ValidationError::ChecksumMismatch`] if digests differ.
    #[instrument(skip(self, options), level = "debug")]
    pub async fn validate(
        &self,
        url: &str,
        expected: &str,
        options: &ValidateOptions,
    ) -> Result<Validation> {
        let release =
            ReleaseUrl::parse_trusted(url, &self.origin).map_err(ValidationError::InvalidUrl)?;
        if !release.has_extension(&self.archive_extensions) {
            return Err(ValidationError::InvalidUrl(InputError::Url {
                url: url.into(),
                reason: format!(
                    "file name must end with one of {:?}",
                    self.archive_extensions
                ),
            }));
        }
        let expected = Checksum::parse(expected).map_err(ValidationError::InvalidChecksum)?;

        if options.dry_run {
            info!("dry run: {} and its checksum are well formed", release);
            return Ok(Validation::Previewed);
        }

        // INVARIANT: Temporary directory is removed when dropped, whatever happens below.
        let workspace = tempfile::Builder::new()
            .prefix("tapsmith-")
            .tempdir()
            .map_err(ValidationError::Workspace)?;
        let download = workspace.path().join(release.filename());

        info!("download {release}");
        let size = self.download(&release, &download).await?;
        debug!("received {size} bytes");

        let size = std::fs::metadata(&download)
            .map_err(|err| ValidationError::Io {
                source: err,
                path: download.clone(),
            })?
            .len();
        if size > self.max_size {
            return Err(ValidationError::FileTooLarge {
                size,
                limit: self.max_size,
            });
        }

        let actual = digest::sha256_file(&download).map_err(|err| ValidationError::Io {
            source: err,
            path: download.clone(),
        })?;
        if !expected.matches(&actual) {
            return Err(ValidationError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        info!("checksum verified: {actual}");

        let looks_like_archive = match digest::sniff_archive(&download) {
            Ok(Some(kind)) => {
                debug!("{} looks like {kind}", release.filename());
                true
            }
            Ok(None) => {
                warn!(
                    "{} does not look like a compressed tarball; continuing anyway",
                    release.filename()
                );
                false
            }
            Err(err) => {
                warn!("cannot sniff {}: {err}", release.filename());
                false
            }
        };

        let persisted = match &options.persist_to {
            Some(dest) => Some(persist(&download, dest)?),
            None => None,
        };

        Ok(Validation::Verified(VerifiedArtifact {
            filename: release.filename().into(),
            size,
            digest: actual,
            looks_like_archive,
            persisted,
        }))
    }

    async fn download(&self, release: &ReleaseUrl, dest: &Path) -> Result<u64> {
        let fetcher = &self.fetcher;
        let source = release.as_str();
        let limit = self.max_size;

        with_retry(self.retry, source, move |_| fetcher.download(source, dest, limit))
            .await
            .map_err(|err| match err {
                FetchError::TooLarge { received, limit } => ValidationError::FileTooLarge {
                    size: received,
                    limit,
                },
                err => ValidationError::DownloadFailed(err),
            })
    }
}

fn persist(download: &Path, dest: &Path) -> Result<PathBuf> {
    let persist_error = |source| ValidationError::Persist {
        source,
        path: dest.to_path_buf(),
    };

    if let Some(parent) = dest.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent).map_err(persist_error)?;
    }
    std::fs::copy(download, dest).map_err(persist_error)?;
    info!("verified artifact kept at {:?}", dest.display());

    Ok(dest.to_path_buf())
}

/// Artifact validation error types.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Artifact URL is malformed or untrusted.
    #[error(transparent)]
    InvalidUrl(InputError),

    /// Expected checksum is malformed.
    #[error(transparent)]
    InvalidChecksum(InputError),

    /// Every download attempt failed.
    #[error("download failed")]
    DownloadFailed(#[source] FetchError),

    /// Artifact exceeds size ceiling.
    #[error("artifact is {size} bytes, which exceeds the limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// Digest of artifact differs from expected checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Temporary download directory cannot be created.
    #[error("failed to create temporary download directory")]
    Workspace(#[source] std::io::Error),

    /// Downloaded artifact cannot be read.
    #[error("failed to read downloaded artifact at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Verified artifact cannot be copied to durable path.
    #[error("failed to keep verified artifact at {:?}", path.display())]
    Persist {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl ValidationError {
    /// Failure category of this error.
    pub fn category(&self) -> Category {
        match self {
            Self::InvalidUrl(_) | Self::InvalidChecksum(_) => Category::InvalidInput,
            Self::DownloadFailed(_) => Category::DownloadFailed,
            Self::FileTooLarge { .. } => Category::FileTooLarge,
            Self::ChecksumMismatch { .. } => Category::ChecksumMismatch,
            Self::Workspace(_) | Self::Io { .. } | Self::Persist { .. } => Category::Other,
        }
    }
}

/// Friendly result alias :3
type Result<T, E = ValidationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::fetch::Result as FetchResult;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    const URL: &str =
        "https://github.com/acme/sentinel/releases/download/v1.2.3/sentinel-v1.2.3.tar.gz";

    /// Serves the same payload for every URL, failing the first few attempts.
    #[derive(Default)]
    struct CannedFetcher {
        payload: Vec<u8>,
        failures: u32,
        calls: AtomicU32,
    }

    impl CannedFetcher {
        fn new(payload: impl Into<Vec<u8>>) -> Self {
            Self {
                payload: payload.into(),
                ..Self::default()
            }
        }

        fn failing(failures: u32) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetch for CannedFetcher {
        async fn download(&self, url: &str, dest: &Path, limit: u64) -> FetchResult<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(FetchError::Status {
                    url: url.into(),
                    status: 502,
                });
            }
            if self.payload.len() as u64 > limit {
                return Err(FetchError::TooLarge {
                    received: self.payload.len() as u64,
                    limit,
                });
            }
            std::fs::write(dest, &self.payload).map_err(|source| FetchError::Write {
                source,
                path: dest.to_path_buf(),
            })?;

            Ok(self.payload.len() as u64)
        }

        async fn fetch_text(&self, _url: &str, _limit: u64) -> FetchResult<String> {
            Ok(String::from_utf8_lossy(&self.payload).into_owned())
        }
    }

    fn config() -> TapConfig {
        let mut config = TapConfig::default();
        config.fetch.backoff_base = 0;
        config
    }

    fn gzip_payload() -> Vec<u8> {
        let mut payload = vec![0x1F, 0x8B, 0x08, 0x00];
        payload.extend_from_slice(b"pretend this is a compressed tarball");
        payload
    }

    fn sha256(payload: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(payload))
    }

    #[tokio::test]
    async fn malformed_checksum_fails_before_any_download() {
        let validator = ArtifactValidator::new(&config(), CannedFetcher::new(gzip_payload()));
        let result = validator
            .validate(URL, "not-a-checksum", &ValidateOptions::default())
            .await;

        assert!(matches!(result, Err(ValidationError::InvalidChecksum(_))));
        assert_eq!(validator.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_url_fails_before_any_download() {
        let validator = ArtifactValidator::new(&config(), CannedFetcher::new(gzip_payload()));
        let checksum = sha256(&gzip_payload());

        for url in [
            "http://github.com/acme/sentinel/releases/download/v1.2.3/sentinel.tar.gz",
            "https://example.com/acme/sentinel/releases/download/v1.2.3/sentinel.tar.gz",
            "https://github.com/acme/sentinel/releases/download/v1.2.3/sentinel.zip",
        ] {
            let result = validator
                .validate(url, &checksum, &ValidateOptions::default())
                .await;
            assert!(matches!(result, Err(ValidationError::InvalidUrl(_))));
        }
        assert_eq!(validator.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn dry_run_only_checks_formats() -> anyhow::Result<()> {
        let validator = ArtifactValidator::new(&config(), CannedFetcher::new(gzip_payload()));
        let options = ValidateOptions {
            dry_run: true,
            persist_to: None,
        };
        let result = validator.validate(URL, &"a".repeat(64), &options).await?;

        assert_eq!(result, Validation::Previewed);
        assert_eq!(validator.fetcher.calls(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn verified_artifact_is_persisted() -> anyhow::Result<()> {
        let payload = gzip_payload();
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("cache").join("sentinel.tar.gz");
        let validator = ArtifactValidator::new(&config(), CannedFetcher::new(payload.clone()));
        let options = ValidateOptions {
            dry_run: false,
            persist_to: Some(dest.clone()),
        };

        let checksum = sha256(&payload).to_uppercase();
        let result = validator.validate(URL, &checksum, &options).await?;

        let expect = Validation::Verified(VerifiedArtifact {
            filename: "sentinel-v1.2.3.tar.gz".into(),
            size: payload.len() as u64,
            digest: sha256(&payload),
            looks_like_archive: true,
            persisted: Some(dest.clone()),
        });
        assert_eq!(result, expect);
        assert_eq!(std::fs::read(&dest)?, payload);

        Ok(())
    }

    #[tokio::test]
    async fn checksum_mismatch_keeps_no_durable_copy() -> anyhow::Result<()> {
        let payload = gzip_payload();
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("sentinel.tar.gz");
        let validator = ArtifactValidator::new(&config(), CannedFetcher::new(payload.clone()));
        let options = ValidateOptions {
            dry_run: false,
            persist_to: Some(dest.clone()),
        };

        let expected = "f".repeat(64);
        let result = validator.validate(URL, &expected, &options).await;

        match result {
            Err(ValidationError::ChecksumMismatch {
                expected: reported,
                actual,
            }) => {
                assert_eq!(reported, expected);
                assert_eq!(actual, sha256(&payload));
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
        assert!(!dest.exists());

        Ok(())
    }

    #[tokio::test]
    async fn oversized_artifact_is_rejected() {
        let mut config = config();
        config.fetch.max_size = 8;
        let payload = gzip_payload();
        let validator = ArtifactValidator::new(&config, CannedFetcher::new(payload.clone()));
        let result = validator
            .validate(URL, &sha256(&payload), &ValidateOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(ValidationError::FileTooLarge { limit: 8, .. })
        ));
        assert_eq!(validator.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn download_gives_up_after_max_retries() {
        let validator = ArtifactValidator::new(&config(), CannedFetcher::failing(u32::MAX));
        let result = validator
            .validate(URL, &"a".repeat(64), &ValidateOptions::default())
            .await;

        assert!(matches!(result, Err(ValidationError::DownloadFailed(_))));
        assert_eq!(validator.fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn download_survives_transient_failures() -> anyhow::Result<()> {
        let payload = b"plain text, not an archive".to_vec();
        let mut fetcher = CannedFetcher::failing(2);
        fetcher.payload = payload.clone();
        let validator = ArtifactValidator::new(&config(), fetcher);

        let result = validator
            .validate(URL, &sha256(&payload), &ValidateOptions::default())
            .await?;

        match result {
            Validation::Verified(artifact) => {
                assert!(!artifact.looks_like_archive);
                assert_eq!(artifact.persisted, None);
            }
            Validation::Previewed => panic!("expected verified artifact"),
        }
        assert_eq!(validator.fetcher.calls(), 3);

        Ok(())
    }
}
