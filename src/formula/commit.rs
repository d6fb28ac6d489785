// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Recording formula changes in version control.
//!
//! The formula lives in a tap repository. Once a patched formula has been
//! promoted, the change is staged by path, committed to `HEAD`, and pushed to
//! a remote. Nothing else in the work tree is staged.

use auth_git2::GitAuthenticator;
use git2::{
    build::TreeUpdateBuilder, ErrorCode, FileMode, PushOptions, RemoteCallbacks, Repository,
    Status,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Layer of indirection for version control access.
pub trait Committer: Send + Sync {
    /// Check if target file differs from what `HEAD` records.
    fn has_changes(&self, path: &Path) -> Result<bool>;

    /// Stage target file alone, and commit it to `HEAD`.
    ///
    /// Returns the identifier of the new commit.
    fn commit(&self, path: &Path, message: &str) -> Result<String>;

    /// Push current branch of the repository holding target file.
    fn push(&self, path: &Path) -> Result<()>;
}

/// Version control access through libgit2.
///
/// The repository is discovered from the formula path on every call, so the
/// formula may live anywhere inside a work tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Git2Committer {
    remote: String,
}

impl Git2Committer {
    /// Construct new committer pushing to target remote.
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }

    fn open(path: &Path) -> Result<(Repository, PathBuf)> {
        let locate_error = |source| CommitError::Locate {
            source,
            path: path.to_path_buf(),
        };

        let path = path.canonicalize().map_err(locate_error)?;
        let parent = path.parent().unwrap_or(Path::new("/"));
        let repository = Repository::discover(parent)?;
        let workdir = repository
            .workdir()
            .ok_or_else(|| CommitError::BareRepository(repository.path().to_path_buf()))?
            .canonicalize()
            .map_err(locate_error)?;
        let relative = path
            .strip_prefix(&workdir)
            .map_err(|_| CommitError::OutsideWorkTree(path.clone()))?
            .to_path_buf();

        Ok((repository, relative))
    }
}

impl Default for Git2Committer {
    fn default() -> Self {
        Self::new("origin")
    }
}

impl Committer for Git2Committer {
    fn has_changes(&self, path: &Path) -> Result<bool> {
        let (repository, relative) = Self::open(path)?;
        let status = repository.status_file(&relative)?;
        debug!("status of {:?}: {status:?}", relative.display());

        Ok(!status.is_empty() && !status.contains(Status::IGNORED))
    }

    #[instrument(skip(self, path), level = "debug")]
    fn commit(&self, path: &Path, message: &str) -> Result<String> {
        let (repository, relative) = Self::open(path)?;

        // INVARIANT: Only the formula itself is staged.
        let mut index = repository.index()?;
        index.add_path(&relative)?;
        index.write()?;
        let entry = index
            .get_path(&relative, 0)
            .ok_or_else(|| git2::Error::from_str("formula missing from index after staging"))?;

        // INVARIANT: Append to current HEAD, if it exists.
        let parent = match repository.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(error) if matches!(error.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                None
            }
            Err(error) => return Err(error.into()),
        };
        let parents = parent.iter().collect::<Vec<_>>();

        // INVARIANT: Tree is HEAD's tree plus the formula blob, so entries the
        //   user staged beforehand stay out of the commit.
        let baseline = match &parent {
            Some(commit) => commit.tree()?,
            None => repository.find_tree(repository.treebuilder(None)?.write()?)?,
        };
        let mode = if entry.mode == u32::from(FileMode::BlobExecutable) {
            FileMode::BlobExecutable
        } else {
            FileMode::Blob
        };
        let mut update = TreeUpdateBuilder::new();
        update.upsert(relative.as_path(), entry.id, mode);
        let tree = repository.find_tree(update.create_updated(&repository, &baseline)?)?;

        let signature = repository.signature()?;
        let oid = repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        info!("committed {:?} as {oid}", relative.display());

        Ok(oid.to_string())
    }

    #[instrument(skip(self, path), level = "debug")]
    fn push(&self, path: &Path) -> Result<()> {
        let (repository, _) = Self::open(path)?;
        let head = repository.head()?;
        let branch = head
            .name()
            .filter(|_| head.is_branch())
            .ok_or(CommitError::DetachedHead)?;
        let refspec = format!("{branch}:{branch}");

        let mut remote = repository.find_remote(&self.remote)?;
        let config = repository.config()?;
        let authenticator = GitAuthenticator::default();
        let mut rejected = None;
        {
            let mut callbacks = RemoteCallbacks::new();
            callbacks.credentials(authenticator.credentials(&config));
            callbacks.push_update_reference(|reference, status| {
                if let Some(status) = status {
                    rejected = Some(format!("{reference}: {status}"));
                }
                Ok(())
            });

            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            remote.push(&[refspec.as_str()], Some(&mut options))?;
        }

        if let Some(reason) = rejected {
            return Err(CommitError::Rejected(reason));
        }
        info!("pushed {branch} to {}", self.remote);

        Ok(())
    }
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// Libgit2 operation failed.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Formula path cannot be resolved.
    #[error("failed to locate {:?}", path.display())]
    Locate {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Repository holding formula has no work tree.
    #[error("repository at {:?} has no work tree", .0.display())]
    BareRepository(PathBuf),

    /// Formula is not inside the work tree of its repository.
    #[error("{:?} is outside of the repository work tree", .0.display())]
    OutsideWorkTree(PathBuf),

    /// Nothing to push, because `HEAD` is not on a branch.
    #[error("cannot push detached HEAD")]
    DetachedHead,

    /// Remote refused the pushed reference.
    #[error("remote rejected push of {0}")]
    Rejected(String),
}

/// Friendly result alias :3
pub type Result<T, E = CommitError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use git2::RepositoryInitOptions;
    use pretty_assertions::assert_eq;

    fn init_repo(path: &Path) -> anyhow::Result<Repository> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repository = Repository::init_opts(path, &opts)?;
        let mut config = repository.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        Ok(repository)
    }

    #[test]
    fn commit_stages_only_target_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repository = init_repo(dir.path())?;
        let formula = dir.path().join("Formula").join("sentinel.rb");
        std::fs::create_dir_all(formula.parent().unwrap())?;
        std::fs::write(&formula, "class Sentinel < Formula\nend\n")?;
        std::fs::write(dir.path().join("notes.txt"), "scratch")?;

        let committer = Git2Committer::default();
        assert!(committer.has_changes(&formula)?);
        committer.commit(&formula, "chore(formula): update sentinel to v1.2.3")?;
        assert!(!committer.has_changes(&formula)?);

        let head = repository.head()?.peel_to_commit()?;
        assert_eq!(
            head.message(),
            Some("chore(formula): update sentinel to v1.2.3")
        );
        let tree = head.tree()?;
        assert!(tree.get_path(Path::new("Formula/sentinel.rb")).is_ok());
        assert!(tree.get_path(Path::new("notes.txt")).is_err());

        Ok(())
    }

    #[test]
    fn commit_leaves_other_staged_entries_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let repository = init_repo(dir.path())?;
        let formula = dir.path().join("Formula").join("sentinel.rb");
        std::fs::create_dir_all(formula.parent().unwrap())?;
        std::fs::write(&formula, "class Sentinel < Formula\nend\n")?;

        let committer = Git2Committer::default();
        committer.commit(&formula, "chore(formula): add sentinel")?;

        std::fs::write(dir.path().join("notes.txt"), "scratch")?;
        let mut index = repository.index()?;
        index.add_path(Path::new("notes.txt"))?;
        index.write()?;
        std::fs::write(&formula, "class Sentinel < Formula\n  version \"1.2.3\"\nend\n")?;

        committer.commit(&formula, "chore(formula): update sentinel to v1.2.3")?;

        let head = repository.head()?.peel_to_commit()?;
        assert_eq!(head.parent_count(), 1);
        let tree = head.tree()?;
        assert!(tree.get_path(Path::new("Formula/sentinel.rb")).is_ok());
        assert!(tree.get_path(Path::new("notes.txt")).is_err());
        assert!(repository
            .status_file(Path::new("notes.txt"))?
            .contains(Status::INDEX_NEW));

        Ok(())
    }

    #[test]
    fn push_without_remote_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        init_repo(dir.path())?;
        let formula = dir.path().join("sentinel.rb");
        std::fs::write(&formula, "class Sentinel < Formula\nend\n")?;

        let committer = Git2Committer::new("upstream");
        committer.commit(&formula, "chore(formula): update sentinel to v1.2.3")?;
        let result = committer.push(&formula);
        assert!(matches!(result, Err(CommitError::Git2(_))));

        Ok(())
    }

    #[test]
    fn missing_formula_cannot_be_located() {
        let result = Git2Committer::default().has_changes(Path::new("/no/such/formula.rb"));
        assert!(matches!(result, Err(CommitError::Locate { .. })));
    }
}
