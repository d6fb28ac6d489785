// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Formula updates.
//!
//! A formula is the Ruby file a tap uses to describe how to install a
//! package. Once a release artifact has been validated, its formula must be
//! updated to point at the new release: new download URL, new version
//! number, new checksum. This module drives that update from start to finish.
//!
//! # Update Lifecycle
//!
//! The original formula is first snapshotted byte for byte in memory. Once
//! the patch is known to change anything, the snapshot is written next to the
//! formula, so a rerun that changes nothing never clobbers the snapshot a
//! previous run left behind. The patch is then written into a working copy in
//! the same directory, and
//! the working copy is inspected. Only a clean working copy is promoted over
//! the original by atomic rename, after which the change is committed and
//! pushed. A defective working copy is discarded, and the formula is restored
//! from its snapshot, so the original is never left half patched.
//!
//! Every run walks the [`Phase`] machine. Transitions are pure, and are
//! logged at debug level.
//!
//! # Scoping
//!
//! Fields are edited through the located field model of
//! [`document::FormulaDocument`]. Top-level fields and fields inside
//! `resource` blocks are told apart by the block they sit in, never by their
//! position in the file.

pub mod commit;
pub mod document;
pub mod inspect;
pub mod manifest;
pub mod patch;

use crate::{
    artifact::fetch::{with_retry, Fetch, ReqwestFetcher, RetryPolicy},
    config::{FormulaSettings, TapConfig},
    formula::{
        commit::{CommitError, Committer, Git2Committer},
        document::{FieldChange, FormulaDocument},
        inspect::ValidationReport,
        patch::{PatchError, ResourcePatch},
    },
    path::{backup_path, formula_name},
    release::{Checksum, InputError, ReleaseDescriptor, ReleaseRequest, ReleaseUrl, TrustedOrigin},
    report::Category,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

const MANIFEST_LIMIT: u64 = 1024 * 1024;

/// Phase of a formula update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    ValidatingInput,
    Snapshotting,
    Patching,
    ValidatingOutput,
    RolledBack,
    Committing,
    Previewed,
    Done,
    Failed(Fault),
}

/// Reason an update ended in [`Phase::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    InvalidInput,
    BackupFailed,
    PatchFailed,
    ValidationFailed,
    CommitFailed,
}

/// Something that happened while updating a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Begin,
    InputAccepted,
    InputRejected,
    SnapshotTaken,
    SnapshotFailed,
    DryRun,
    Patched,
    PatchFailed,
    Clean,
    Defective { rollback: bool },
    Restored,
    Recorded,
    CommitFailed,
}

impl Phase {
    /// Phase reached from this one through target event.
    ///
    /// Returns [`None`] if the event cannot happen in this phase.
    pub fn next(self, event: Event) -> Option<Phase> {
        let next = match (self, event) {
            (Self::Start, Event::Begin) => Self::ValidatingInput,
            (Self::ValidatingInput, Event::InputAccepted) => Self::Snapshotting,
            (Self::ValidatingInput, Event::InputRejected) => Self::Failed(Fault::InvalidInput),
            (Self::Snapshotting, Event::SnapshotTaken) => Self::Patching,
            (Self::Snapshotting | Self::Patching, Event::SnapshotFailed) => {
                Self::Failed(Fault::BackupFailed)
            }
            (Self::Patching, Event::DryRun) => Self::Previewed,
            (Self::Patching, Event::Patched) => Self::ValidatingOutput,
            (Self::Patching | Self::ValidatingOutput, Event::PatchFailed) => {
                Self::Failed(Fault::PatchFailed)
            }
            (Self::ValidatingOutput, Event::Clean) => Self::Committing,
            (Self::ValidatingOutput, Event::Defective { rollback: true }) => Self::RolledBack,
            (Self::ValidatingOutput, Event::Defective { rollback: false })
            | (Self::RolledBack, Event::Restored) => Self::Failed(Fault::ValidationFailed),
            (Self::Committing, Event::Recorded) => Self::Done,
            (Self::Committing, Event::CommitFailed) => Self::Failed(Fault::CommitFailed),
            _ => return None,
        };

        Some(next)
    }

    /// Check if no further event can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Previewed | Self::Done | Self::Failed(_))
    }
}

/// Options of one update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Compute changes, but write nothing.
    pub dry_run: bool,

    /// Promote patched formula, but do not commit it.
    pub skip_commit: bool,

    /// Restore formula from its snapshot on failure.
    pub rollback: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_commit: false,
            rollback: true,
        }
    }
}

/// Result of a successful update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Dry run; these changes would have been made.
    Previewed(Vec<FieldChange>),

    /// Formula already described the release; nothing to commit.
    Unchanged,

    /// Formula was patched, but committing was skipped.
    Uncommitted(Vec<FieldChange>),

    /// Formula was patched and committed.
    Committed { id: String, pushed: bool },
}

/// Updates formula files to describe a new release.
#[derive(Debug)]
pub struct FormulaUpdater<F = ReqwestFetcher, C = Git2Committer>
where
    F: Fetch,
    C: Committer,
{
    origin: TrustedOrigin,
    manifest: String,
    retry: RetryPolicy,
    settings: FormulaSettings,
    fetcher: F,
    committer: C,
}

impl<F, C> FormulaUpdater<F, C>
where
    F: Fetch,
    C: Committer,
{
    /// Construct new formula updater.
    pub fn new(config: &TapConfig, fetcher: F, committer: C) -> Self {
        Self {
            origin: config.release.origin(),
            manifest: config.release.manifest.clone(),
            retry: config.fetch.retry_policy(),
            settings: config.formula.clone(),
            fetcher,
            committer,
        }
    }

    /// Update formula at `path` to describe the requested release.
    ///
    /// # Errors
    ///
    /// - Return [`UpdateError::InvalidInput`] if the request is malformed.
    ///   Nothing is written.
    /// - Return [`UpdateError::BackupFailed`] if the formula cannot be read or
    ///   snapshotted.
    /// - Return [`UpdateError::Patch`] or [`UpdateError::WorkingCopy`] if the
    ///   formula cannot be patched or promoted.
    /// - Return [`UpdateError::ValidationFailed`] if the patched formula has
    ///   defects.
    /// - Return [`UpdateError::CommitFailed`] if the change cannot be
    ///   committed or pushed. The promoted formula is kept.
    #[instrument(skip(self, path, request, options), fields(version = %request.version))]
    pub async fn update(
        &self,
        path: impl AsRef<Path>,
        request: &ReleaseRequest,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome> {
        let path = path.as_ref();
        let mut run = Run::default();
        run.advance(Event::Begin);

        let descriptor = ReleaseDescriptor::from_request(request, &self.origin)
            .map_err(|err| run.fail(Event::InputRejected, err))?;
        run.advance(Event::InputAccepted);

        let backup = backup_path(path, &self.settings.backup_suffix);
        let original = snapshot(path).map_err(|err| run.fail(Event::SnapshotFailed, err))?;
        run.advance(Event::SnapshotTaken);

        let text = String::from_utf8(original.clone()).map_err(|err| {
            run.fail(
                Event::PatchFailed,
                UpdateError::WorkingCopy {
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
                    path: path.into(),
                },
            )
        })?;
        let document = FormulaDocument::from(text);
        let resource = self
            .resource_patch(&document, &descriptor, options.dry_run)
            .await;
        let patched = patch::apply(&document, &descriptor, resource.as_ref()).map_err(|err| {
            self.recover(path, &original, options);
            run.fail(Event::PatchFailed, err)
        })?;

        if options.dry_run {
            run.advance(Event::DryRun);
            for change in &patched.changes {
                info!("would change {change}");
            }
            return Ok(UpdateOutcome::Previewed(patched.changes));
        }

        let backup = if patched.changes.is_empty() {
            debug!("{:?} already describes {}", path.display(), descriptor.version);
            None
        } else {
            write_backup(&backup, &original).map_err(|err| run.fail(Event::SnapshotFailed, err))?;
            Some(backup)
        };

        let working = working_copy(path, &patched.text).map_err(|source| {
            self.recover(path, &original, options);
            run.fail(
                Event::PatchFailed,
                UpdateError::WorkingCopy {
                    source,
                    path: path.into(),
                },
            )
        })?;
        run.advance(Event::Patched);

        let written = fs::read_to_string(working.path()).map_err(|source| {
            run.fail(
                Event::PatchFailed,
                UpdateError::WorkingCopy {
                    source,
                    path: working.path().into(),
                },
            )
        })?;
        let report = inspect::inspect(
            &FormulaDocument::from(written),
            &descriptor,
            &self.settings.placeholders,
        );
        if !report.is_clean() {
            error!("patched formula failed validation: {report}");
            if options.rollback {
                run.advance(Event::Defective { rollback: true });
                drop(working);
                self.roll_back(path, &original, backup.as_deref());
                run.advance(Event::Restored);
            } else {
                run.advance(Event::Defective { rollback: false });
                warn!("rollback disabled; keeping defective formula at {:?}", path.display());
                if let Err(err) = working.persist(path) {
                    error!("failed to keep defective formula: {}", err.error);
                }
            }

            return Err(UpdateError::ValidationFailed(report));
        }

        // INVARIANT: Promotion is an atomic rename within the formula's directory.
        working.persist(path).map_err(|err| {
            run.fail(
                Event::PatchFailed,
                UpdateError::WorkingCopy {
                    source: err.error,
                    path: path.into(),
                },
            )
        })?;
        run.advance(Event::Clean);
        for change in &patched.changes {
            info!("changed {change}");
        }

        let outcome = self
            .record(path, &descriptor, patched.changes, options)
            .map_err(|(phase, source)| {
                run.fail(Event::CommitFailed, UpdateError::CommitFailed { phase, source })
            })?;
        run.advance(Event::Recorded);

        Ok(outcome)
    }

    async fn resource_patch(
        &self,
        document: &FormulaDocument,
        descriptor: &ReleaseDescriptor,
        dry_run: bool,
    ) -> Option<ResourcePatch> {
        let resources = document.resources();
        let name = match &self.settings.resource {
            Some(name) if resources.contains(&name.as_str()) => name.clone(),
            Some(name) => {
                warn!("formula has no resource {name:?}");
                return None;
            }
            None => resources.first()?.to_string(),
        };

        let url = document
            .resource_field(&name, "url")
            .and_then(|field| {
                let url = patch::rewrite_resource_url(&field.value, &descriptor.version);
                if url.is_none() {
                    warn!("url of resource {name:?} at line {} left as is", field.line);
                }
                url
            });

        let checksum = match (&descriptor.resource_checksum, &url) {
            (Some(checksum), _) => Some(checksum.clone()),
            (None, Some(url)) if !dry_run => self.discover_checksum(descriptor, url).await,
            (None, _) => None,
        };

        Some(ResourcePatch {
            name,
            url,
            checksum,
        })
    }

    async fn discover_checksum(
        &self,
        descriptor: &ReleaseDescriptor,
        resource_url: &str,
    ) -> Option<Checksum> {
        let filename = ReleaseUrl::parse(resource_url).ok()?.filename().to_string();
        let manifest_url = descriptor.binary_url.sibling(&self.manifest);
        let fetcher = &self.fetcher;
        let source = manifest_url.as_str();

        debug!("look up checksum of {filename} in {manifest_url}");
        match with_retry(self.retry, source, |_| fetcher.fetch_text(source, MANIFEST_LIMIT)).await
        {
            Ok(text) => {
                let checksum = manifest::find_checksum(&text, &filename);
                if checksum.is_none() {
                    warn!("no valid checksum for {filename} in {manifest_url}");
                }
                checksum
            }
            Err(err) => {
                warn!("cannot fetch checksums manifest {manifest_url}: {err}");
                None
            }
        }
    }

    fn record(
        &self,
        path: &Path,
        descriptor: &ReleaseDescriptor,
        changes: Vec<FieldChange>,
        options: &UpdateOptions,
    ) -> std::result::Result<UpdateOutcome, (CommitPhase, CommitError)> {
        if options.skip_commit {
            info!("skip commit of {:?}", path.display());
            return Ok(UpdateOutcome::Uncommitted(changes));
        }

        let commit_error = |source| (CommitPhase::Commit, source);
        if !self.committer.has_changes(path).map_err(commit_error)? {
            info!("{:?} already describes {}", path.display(), descriptor.version);
            return Ok(UpdateOutcome::Unchanged);
        }

        let message = format!(
            "chore(formula): update {} to {}",
            formula_name(path),
            descriptor.version
        );
        let id = self.committer.commit(path, &message).map_err(commit_error)?;

        if self.settings.push {
            self.committer
                .push(path)
                .map_err(|source| (CommitPhase::Push, source))?;
        }

        Ok(UpdateOutcome::Committed {
            id,
            pushed: self.settings.push,
        })
    }

    fn recover(&self, path: &Path, original: &[u8], options: &UpdateOptions) {
        if options.rollback && !options.dry_run {
            restore(path, original);
        }
    }

    fn roll_back(&self, path: &Path, original: &[u8], backup: Option<&Path>) {
        restore(path, original);
        let Some(backup) = backup else {
            return;
        };
        match fs::remove_file(backup) {
            Ok(()) => debug!("removed snapshot {:?}", backup.display()),
            Err(err) => warn!("cannot remove snapshot {:?}: {err}", backup.display()),
        }
    }
}

fn snapshot(path: &Path) -> Result<Vec<u8>> {
    let original = fs::read(path).map_err(|source| UpdateError::BackupFailed {
        source,
        path: path.into(),
    })?;
    debug!("snapshot of {:?} taken", path.display());

    Ok(original)
}

fn write_backup(backup: &Path, original: &[u8]) -> Result<()> {
    fs::write(backup, original).map_err(|source| UpdateError::BackupFailed {
        source,
        path: backup.into(),
    })?;
    info!("snapshot of formula written to {:?}", backup.display());

    Ok(())
}

fn restore(path: &Path, original: &[u8]) {
    if fs::read(path).is_ok_and(|current| current == original) {
        debug!("{:?} matches its snapshot", path.display());
        return;
    }

    match fs::write(path, original) {
        Ok(()) => info!("restored {:?} from snapshot", path.display()),
        Err(err) => error!("failed to restore {:?} from snapshot: {err}", path.display()),
    }
}

fn working_copy(path: &Path, text: &str) -> std::io::Result<NamedTempFile> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut file = tempfile::Builder::new()
        .prefix(".tapsmith-")
        .suffix(".rb")
        .tempfile_in(dir)?;
    file.write_all(text.as_bytes())?;
    file.as_file().sync_all()?;
    file.as_file()
        .set_permissions(fs::metadata(path)?.permissions())?;

    Ok(file)
}

#[derive(Debug)]
struct Run {
    phase: Phase,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            phase: Phase::Start,
        }
    }
}

impl Run {
    fn advance(&mut self, event: Event) {
        match self.phase.next(event) {
            Some(next) => {
                debug!("{:?} -> {next:?} on {event:?}", self.phase);
                self.phase = next;
            }
            None => warn!("ignored {event:?} in phase {:?}", self.phase),
        }
    }

    fn fail(&mut self, event: Event, err: impl Into<UpdateError>) -> UpdateError {
        self.advance(event);
        err.into()
    }
}

/// Step of recording a change that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Commit,
    Push,
}

impl Display for CommitPhase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Commit => fmt.write_str("commit"),
            Self::Push => fmt.write_str("push"),
        }
    }
}

/// Formula update error types.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Release request is malformed.
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    /// Formula cannot be read, or its snapshot cannot be written.
    #[error("failed to snapshot formula at {:?}", path.display())]
    BackupFailed {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Formula lacks fields to patch.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Working copy cannot be written or promoted.
    #[error("failed to write patched formula for {:?}", path.display())]
    WorkingCopy {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Patched formula has defects.
    #[error("patched formula failed validation with {0}")]
    ValidationFailed(ValidationReport),

    /// Change cannot be committed or pushed.
    #[error("failed to {phase} formula change")]
    CommitFailed {
        phase: CommitPhase,
        #[source]
        source: CommitError,
    },
}

impl UpdateError {
    /// Failure category of this error.
    pub fn category(&self) -> Category {
        match self {
            Self::InvalidInput(_) => Category::InvalidInput,
            Self::BackupFailed { .. } => Category::BackupFailed,
            Self::Patch(_) | Self::WorkingCopy { .. } => Category::PatchFailed,
            Self::ValidationFailed(_) => Category::ValidationFailed,
            Self::CommitFailed { .. } => Category::CommitFailed,
        }
    }
}

/// Friendly result alias :3
type Result<T, E = UpdateError> = std::result::Result<T, E>;
