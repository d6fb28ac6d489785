// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use tapsmith::{
    artifact::{fetch::ReqwestFetcher, ArtifactValidator, ValidateOptions, Validation},
    config::TapConfig,
    formula::{commit::Git2Committer, FormulaUpdater, UpdateOptions, UpdateOutcome},
    path::default_config_path,
    release::{ReleaseRequest, ReleaseUrl},
    report::{Category, Failure, Stage},
};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  tapsmith [options] <command> [<args>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Write failure report to target path if command fails.
    #[arg(long, global = true, value_name = "path")]
    pub report: Option<PathBuf>,

    /// Reference to this run recorded in failure reports, e.g., a CI run URL.
    #[arg(long, global = true, value_name = "ref")]
    pub run_ref: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())
            .map_err(|error| Failure::new(Stage::Configure, Category::InvalidInput, error))?;
        debug!("configuration in use:\n{config}");

        match self.command {
            Command::Validate(opts) => run_validate(&config, opts).await,
            Command::Update(opts) => run_update(&config, opts).await,
            Command::Release(opts) => run_release(&config, opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Validate release artifact without touching any formula.
    #[command(override_usage = "tapsmith validate [options] --url <url> --sha256 <hex>")]
    Validate(ValidateArgs),

    /// Update formula to describe a release.
    #[command(
        override_usage = "tapsmith update [options] --version <tag> --url <url> --sha256 <hex>"
    )]
    Update(UpdateArgs),

    /// Validate release artifact, then update formula.
    #[command(
        override_usage = "tapsmith release [options] --version <tag> --url <url> --sha256 <hex>"
    )]
    Release(ReleaseArgs),
}

impl Command {
    /// Version tag under release, taken from the artifact URL for `validate`.
    fn version(&self) -> String {
        match self {
            Self::Validate(opts) => ReleaseUrl::parse(&opts.url)
                .map(|url| url.tag().to_string())
                .unwrap_or_default(),
            Self::Update(opts) => opts.version.clone(),
            Self::Release(opts) => opts.update.version.clone(),
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ValidateArgs {
    /// URL of release artifact.
    #[arg(long, value_name = "url")]
    pub url: String,

    /// Expected SHA-256 checksum of release artifact.
    #[arg(long, value_name = "hex")]
    pub sha256: String,

    /// Only check input formats.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep verified artifact at target path.
    #[arg(short, long, value_name = "path")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct UpdateArgs {
    /// Version tag of release, e.g., v1.2.3.
    #[arg(long, value_name = "tag")]
    pub version: String,

    /// URL of primary artifact.
    #[arg(long, value_name = "url")]
    pub url: String,

    /// SHA-256 checksum of primary artifact.
    #[arg(long, value_name = "hex")]
    pub sha256: String,

    /// SHA-256 checksum of resource artifact, instead of looking it up.
    #[arg(long, value_name = "hex")]
    pub resource_sha256: Option<String>,

    /// Path to formula, overriding configuration.
    #[arg(short, long, value_name = "path")]
    pub formula: Option<PathBuf>,

    /// Show changes without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Update formula, but do not commit it.
    #[arg(long)]
    pub skip_commit: bool,

    /// Keep formula as patched even if it fails validation.
    #[arg(long)]
    pub no_rollback: bool,
}

impl UpdateArgs {
    fn request(&self) -> ReleaseRequest {
        ReleaseRequest {
            version: self.version.clone(),
            url: self.url.clone(),
            checksum: self.sha256.clone(),
            resource_checksum: self.resource_sha256.clone(),
        }
    }

    fn options(&self) -> UpdateOptions {
        UpdateOptions {
            dry_run: self.dry_run,
            skip_commit: self.skip_commit,
            rollback: !self.no_rollback,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ReleaseArgs {
    #[command(flatten)]
    pub update: UpdateArgs,

    /// URL of release archive to validate, if not the primary artifact.
    #[arg(long, value_name = "url", requires = "archive_sha256")]
    pub archive_url: Option<String>,

    /// SHA-256 checksum of release archive.
    #[arg(long, value_name = "hex", requires = "archive_url")]
    pub archive_sha256: Option<String>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let cli = Cli::parse();
    let report = cli.report.clone();
    let run_ref = cli.run_ref.clone();
    let version = cli.command.version();

    if let Err(error) = cli.run().await {
        error!("{error:?}");
        let code = match error.downcast_ref::<Failure>() {
            Some(failure) => {
                if let Some(path) = &report {
                    write_report(failure, &version, run_ref, path);
                }
                failure.exit_code()
            }
            None => 1,
        };
        exit(code.into());
    }

    exit(0)
}

fn load_config(path: Option<&Path>) -> Result<TapConfig> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Ok(path) => (path, false),
            Err(error) => {
                warn!("{error}; using default configuration");
                return Ok(TapConfig::default());
            }
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(data) => data
            .parse::<TapConfig>()
            .with_context(|| format!("invalid configuration at {:?}", path.display())),
        Err(error) if !explicit && error.kind() == ErrorKind::NotFound => {
            debug!("no configuration at {:?}; using defaults", path.display());
            Ok(TapConfig::default())
        }
        Err(error) => {
            Err(error).with_context(|| format!("cannot read configuration at {:?}", path.display()))
        }
    }
}

fn write_report(failure: &Failure, version: &str, run: Option<String>, path: &Path) {
    match failure.report(version, run).write(path) {
        Ok(()) => info!("failure report written to {:?}", path.display()),
        Err(error) => error!("{:?}", anyhow!(error)),
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    match ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    ) {
        Ok(style) => bar.with_style(style.progress_chars("-Cco.")),
        Err(error) => {
            debug!("fall back to default progress style: {error}");
            bar
        }
    }
}

fn fetcher(config: &TapConfig, stage: Stage) -> Result<ReqwestFetcher> {
    let fetcher = ReqwestFetcher::new(&config.fetch)
        .map_err(|error| Failure::new(stage, Category::Other, error))?;

    Ok(fetcher.with_progress(progress_bar()))
}

async fn run_validate(config: &TapConfig, opts: ValidateArgs) -> Result<()> {
    let options = ValidateOptions {
        dry_run: opts.dry_run,
        persist_to: opts.output,
    };

    validate(config, &opts.url, &opts.sha256, &options).await
}

async fn validate(
    config: &TapConfig,
    url: &str,
    sha256: &str,
    options: &ValidateOptions,
) -> Result<()> {
    let validator = ArtifactValidator::new(config, fetcher(config, Stage::Validate)?);
    let validation = validator
        .validate(url, sha256, options)
        .await
        .map_err(|error| Failure::new(Stage::Validate, error.category(), error))?;

    match validation {
        Validation::Previewed => info!("dry run: nothing downloaded"),
        Validation::Verified(artifact) => {
            info!(
                "verified {} ({} bytes, sha256 {})",
                artifact.filename, artifact.size, artifact.digest
            );
            if let Some(path) = artifact.persisted {
                info!("artifact kept at {:?}", path.display());
            }
        }
    }

    Ok(())
}

async fn run_update(config: &TapConfig, opts: UpdateArgs) -> Result<()> {
    let path = opts
        .formula
        .clone()
        .or_else(|| config.formula.path.clone())
        .ok_or_else(|| {
            Failure::new(
                Stage::Update,
                Category::InvalidInput,
                anyhow!("no formula to update; pass --formula or set formula.path"),
            )
        })?;

    let updater = FormulaUpdater::new(
        config,
        fetcher(config, Stage::Update)?,
        Git2Committer::new(&config.formula.remote),
    );
    let outcome = updater
        .update(&path, &opts.request(), &opts.options())
        .await
        .map_err(|error| Failure::new(Stage::Update, error.category(), error))?;

    match outcome {
        UpdateOutcome::Previewed(changes) => {
            info!("dry run: {} change(s) to {:?}", changes.len(), path.display());
            for change in changes {
                println!("{change}");
            }
        }
        UpdateOutcome::Unchanged => info!("{:?} is already up to date", path.display()),
        UpdateOutcome::Uncommitted(changes) => {
            info!("{} change(s) to {:?} left uncommitted", changes.len(), path.display())
        }
        UpdateOutcome::Committed { id, pushed } => {
            info!("committed {id}");
            if !pushed {
                info!("push disabled; commit is local only");
            }
        }
    }

    Ok(())
}

async fn run_release(config: &TapConfig, opts: ReleaseArgs) -> Result<()> {
    let url = opts.archive_url.as_deref().unwrap_or(&opts.update.url);
    let sha256 = opts
        .archive_sha256
        .as_deref()
        .unwrap_or(&opts.update.sha256);
    let options = ValidateOptions {
        dry_run: opts.update.dry_run,
        persist_to: None,
    };

    validate(config, url, sha256, &options).await?;
    run_update(config, opts.update).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case(
        &["validate", "--url", "https://github.com/acme/sentinel/releases/download/v1.2.3/sentinel.tar.gz", "--sha256", "ab"],
        "v1.2.3";
        "validate release url"
    )]
    #[test_case(
        &["validate", "--url", "https://example.com/sentinel.tar.gz", "--sha256", "ab"],
        "";
        "validate foreign url"
    )]
    #[test_case(
        &["update", "--version", "v2.0.0", "--url", "https://example.com/x", "--sha256", "ab"],
        "v2.0.0";
        "update"
    )]
    #[test]
    fn command_version_for_failure_report(args: &[&str], expect: &str) {
        use pretty_assertions::assert_eq;

        let cli = Cli::try_parse_from(std::iter::once("tapsmith").chain(args.iter().copied()))
            .unwrap();
        assert_eq!(cli.command.version(), expect);
    }
}
