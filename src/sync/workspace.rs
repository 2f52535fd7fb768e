//! Unified work directory management.
//!
//! Each repository gets a single persistent clone at
//! `<workspace>/<name>/sync_work`, cloned from the destination with an extra
//! `source` remote. The directory survives across runs; a drifted `origin`
//! URL (operator repointed the mirror) deletes it and reclones.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::config::{CommitIdentity, RepositoryConfig};
use crate::git::{COMMIT_FORMAT, CommitInfo, GitRunner, parse_remote_branches, url};

/// A prepared work directory bound to one repository for the current run.
///
/// Holds the driver as a [`GitRunner`] trait object, so replicator tests can
/// substitute a scripted driver for the real one.
pub struct Workspace<'a> {
    dir: PathBuf,
    driver: &'a dyn GitRunner,
}

impl<'a> Workspace<'a> {
    /// Set up (or verify) the work directory and apply the commit identity.
    pub fn prepare(
        driver: &'a dyn GitRunner,
        repo: &RepositoryConfig,
        identity: &CommitIdentity,
    ) -> anyhow::Result<Self> {
        let dir = repo.work_dir();
        set_up(driver, &dir, repo)?;

        let workspace = Self::at(dir, driver);
        workspace.apply_identity(identity)?;
        Ok(workspace)
    }

    /// Bind an existing directory to a driver without any setup.
    ///
    /// Unit tests use this with a scripted driver; production code goes
    /// through [`prepare`](Self::prepare).
    pub(crate) fn at(dir: PathBuf, driver: &'a dyn GitRunner) -> Self {
        Self { dir, driver }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run(&self, args: &[&str]) -> anyhow::Result<()> {
        self.driver.run(&self.dir, args)
    }

    pub fn capture(&self, args: &[&str]) -> anyhow::Result<String> {
        self.driver.capture(&self.dir, args)
    }

    pub fn check(&self, args: &[&str]) -> anyhow::Result<bool> {
        self.driver.check(&self.dir, args)
    }

    /// Refresh both remotes: pruned fetches plus source tags.
    pub fn fetch_all(&self) -> anyhow::Result<()> {
        self.run(&["fetch", "origin", "--prune"])?;
        self.run(&["fetch", "source", "--prune"])?;
        self.run(&["fetch", "source", "--tags"])?;
        Ok(())
    }

    /// Whether a fully-qualified ref exists (`refs/remotes/...`, `refs/heads/...`).
    pub fn ref_exists(&self, full_ref: &str) -> bool {
        self.check(&["show-ref", "--verify", "--quiet", full_ref])
            .unwrap_or(false)
    }

    /// False in a freshly-cloned empty destination (unborn HEAD).
    pub fn head_exists(&self) -> bool {
        self.check(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .unwrap_or(false)
    }

    pub fn rev_parse(&self, spec: &str) -> anyhow::Result<String> {
        self.capture(&["rev-parse", spec])
    }

    /// Current branch name, or `None` on unborn/detached HEAD.
    pub fn current_branch(&self) -> Option<String> {
        let name = self.capture(&["rev-parse", "--abbrev-ref", "HEAD"]).ok()?;
        (name != "HEAD" && !name.is_empty()).then_some(name)
    }

    /// Source branches in sync order (default branch first).
    pub fn source_branches(&self) -> anyhow::Result<Vec<String>> {
        let output = self.capture(&["branch", "-r"])?;
        Ok(parse_remote_branches(&output, "source/"))
    }

    /// Commit metadata for the tip of a remote branch.
    ///
    /// Tries the remote-tracking ref first (the normal case in the unified
    /// work directory), then a local branch of the same name.
    pub fn branch_tip(&self, remote: &str, branch: &str) -> anyhow::Result<CommitInfo> {
        let format = format!("--format={COMMIT_FORMAT}");
        let candidates = [
            format!("refs/remotes/{remote}/{branch}"),
            format!("refs/heads/{branch}"),
        ];
        for ref_name in &candidates {
            if let Ok(line) = self.capture(&["log", "-1", &format, ref_name])
                && !line.is_empty()
            {
                return Ok(CommitInfo::parse(&line)?);
            }
        }
        bail!("Cannot get commit info for branch '{branch}' on remote '{remote}'")
    }

    /// Commit metadata for a specific commit.
    pub fn commit_info(&self, hash: &str) -> anyhow::Result<CommitInfo> {
        let format = format!("--format={COMMIT_FORMAT}");
        let line = self.capture(&["show", "-s", &format, hash])?;
        Ok(CommitInfo::parse(&line)?)
    }

    fn apply_identity(&self, identity: &CommitIdentity) -> anyhow::Result<()> {
        if !identity.name.is_empty() {
            self.run(&["config", "user.name", &identity.name])?;
        }
        if !identity.email.is_empty() {
            self.run(&["config", "user.email", &identity.email])?;
        }
        Ok(())
    }
}

fn set_up(driver: &dyn GitRunner, dir: &Path, repo: &RepositoryConfig) -> anyhow::Result<()> {
    if dir.exists() {
        match verify_and_refresh(driver, dir, repo) {
            Ok(true) => return Ok(()),
            Ok(false) => {
                log::warn!(
                    "Destination repository mismatch, recreating work directory for '{}'",
                    repo.name
                );
                fs::remove_dir_all(dir).context("Failed to remove drifted work directory")?;
            }
            Err(e) => {
                log::warn!("Work directory verification failed: {e:#}");
                fs::remove_dir_all(dir).context("Failed to remove broken work directory")?;
            }
        }
    }

    clone_fresh(driver, dir, repo)
}

/// Returns `Ok(false)` when `origin` points somewhere other than the
/// configured destination — the caller reclones.
fn verify_and_refresh(
    driver: &dyn GitRunner,
    dir: &Path,
    repo: &RepositoryConfig,
) -> anyhow::Result<bool> {
    let origin_url = driver.capture(dir, &["config", "--get", "remote.origin.url"])?;
    if !url::equivalent(&url::strip_credentials(&origin_url), &repo.dest_url) {
        return Ok(false);
    }

    // Refresh stored credentials in place
    let auth_url = repo.dest_url_with_auth();
    if auth_url != origin_url {
        driver.run(dir, &["remote", "set-url", "origin", &auth_url])?;
    }

    match driver.capture(dir, &["config", "--get", "remote.source.url"]) {
        Ok(current) if !url::equivalent(&current, &repo.source_url) => {
            driver.run(dir, &["remote", "set-url", "source", &repo.source_url])?;
            log::info!("Updated source remote URL: {}", repo.source_url);
        }
        Ok(_) => {}
        Err(_) => {
            driver.run(dir, &["remote", "add", "source", &repo.source_url])?;
            log::info!("Added source remote: {}", repo.source_url);
        }
    }

    Ok(true)
}

fn clone_fresh(driver: &dyn GitRunner, dir: &Path, repo: &RepositoryConfig) -> anyhow::Result<()> {
    let parent = dir
        .parent()
        .context("Work directory has no parent")?
        .to_path_buf();
    fs::create_dir_all(&parent).context("Failed to create workspace directory")?;

    log::info!("Cloning destination repository: {}", repo.dest_url);
    let auth_url = repo.dest_url_with_auth();
    let dir_str = dir.to_string_lossy();
    driver.run(&parent, &["clone", &auth_url, &dir_str])?;
    driver.run(dir, &["remote", "add", "source", &repo.source_url])?;
    log::debug!("Unified work directory created with source and origin remotes");
    Ok(())
}
