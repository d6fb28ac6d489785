// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bounded-retry downloads.
//!
//! Network access goes through the [`Fetch`] trait so that callers can be
//! handed a canned fetcher in tests. A fetcher performs exactly one attempt
//! per call. Retrying is layered on top through [`with_retry`], which sleeps
//! `backoff_base * 2^attempt` between attempts, and gives up after a fixed
//! number of them.

use crate::config::FetchSettings;

use futures::StreamExt;
use indicatif::ProgressBar;
use std::{future::Future, path::Path, path::PathBuf, time::Duration};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, instrument, warn};

/// Single-attempt network access.
pub trait Fetch: Send + Sync {
    /// Download `url` into `dest`, refusing payloads above `limit` bytes.
    ///
    /// Returns the number of bytes written.
    fn download(
        &self,
        url: &str,
        dest: &Path,
        limit: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Fetch `url` as text, refusing payloads above `limit` bytes.
    fn fetch_text(&self, url: &str, limit: u64) -> impl Future<Output = Result<String>> + Send;
}

/// Fetcher backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    bar: ProgressBar,
}

impl ReqwestFetcher {
    /// Construct new fetcher honoring connect and per-attempt timeouts.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::Http`] if HTTP client cannot be built.
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.timeout())
            .user_agent(concat!("tapsmith/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            bar: ProgressBar::hidden(),
        })
    }

    /// Report download progress through target progress bar.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    async fn send(&self, url: &str, limit: u64) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.into(),
                status: status.as_u16(),
            });
        }

        // INVARIANT: Refuse oversized payloads before reading their body.
        if let Some(length) = response.content_length() {
            if length > limit {
                return Err(FetchError::TooLarge {
                    received: length,
                    limit,
                });
            }
        }

        Ok(response)
    }
}

impl Fetch for ReqwestFetcher {
    async fn download(&self, url: &str, dest: &Path, limit: u64) -> Result<u64> {
        let response = self.send(url, limit).await?;
        self.bar.reset();
        if let Some(length) = response.content_length() {
            self.bar.set_length(length);
        }
        self.bar.set_message(url.to_string());

        let write_error = |source| FetchError::Write {
            source,
            path: dest.to_path_buf(),
        };
        let mut file = File::create(dest).await.map_err(write_error)?;
        let mut stream = response.bytes_stream();
        let mut received = 0_u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            if received > limit {
                return Err(FetchError::TooLarge { received, limit });
            }

            file.write_all(&chunk).await.map_err(write_error)?;
            self.bar.set_position(received);
        }
        file.flush().await.map_err(write_error)?;
        self.bar.finish_and_clear();

        Ok(received)
    }

    async fn fetch_text(&self, url: &str, limit: u64) -> Result<String> {
        let response = self.send(url, limit).await?;
        let body = response.bytes().await?;
        if body.len() as u64 > limit {
            return Err(FetchError::TooLarge {
                received: body.len() as u64,
                limit,
            });
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, first one included.
    pub max_attempts: u32,

    /// Base of the exponential backoff.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Delay to sleep after a failed attempt.
///
/// Attempts are numbered from one, so the default one second base waits two
/// seconds after the first failure, four after the second, and so on.
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt))
}

/// Run `operation` until it succeeds, fails for good, or runs out of
/// attempts.
///
/// The operation receives the current attempt number, starting at one.
/// Errors that retrying cannot fix are returned right away.
///
/// # Errors
///
/// - Return [`FetchError::Exhausted`] wrapping the last failure if every
///   attempt failed.
/// - Return the failure itself if it is not retryable.
#[instrument(skip(policy, operation), level = "debug")]
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, url: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        debug!("attempt {attempt}/{attempts} for {url}");
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => error,
        };

        if attempt >= attempts {
            return Err(FetchError::Exhausted {
                url: url.into(),
                attempts,
                last: Box::new(error),
            });
        }

        let delay = retry_delay(attempt, policy.backoff_base);
        warn!("attempt {attempt}/{attempts} for {url} failed: {error}; retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Download failure types.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Request could not be completed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("server responded with status {status} for {url}")]
    Status { url: String, status: u16 },

    /// Payload exceeds size limit.
    #[error("payload of {received} bytes exceeds limit of {limit} bytes")]
    TooLarge { received: u64, limit: u64 },

    /// Downloaded bytes cannot be written to disk.
    #[error("failed to write download to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Every attempt failed.
    #[error("gave up on {url} after {attempts} attempts")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Check if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. })
    }
}

/// Friendly result alias :3
pub type Result<T, E = FetchError> = std::result::Result<T, E>;
