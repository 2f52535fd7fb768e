//! The replication engine: workspace, state store, branch replicator, and
//! the per-repository orchestrator that drives them.

mod lfs;
mod replicate;
mod state;
mod workspace;

pub use lfs::{LfsDetector, ScanSet, is_binary_candidate};
pub use replicate::{BranchOutcome, BranchReplicator, Mode};
pub use state::{SyncState, state_key};
pub use workspace::Workspace;

use crate::config::{Config, RepositoryConfig};
use crate::git::GitDriver;
use crate::report::{RepoReport, RepoStatus, RunReport, now_iso};

/// Drives replication for every configured repository, sequentially.
pub struct Orchestrator<'a> {
    config: &'a Config,
    driver: GitDriver,
    force_full: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, driver: GitDriver, force_full: bool) -> Self {
        Self {
            config,
            driver,
            force_full,
        }
    }

    /// Run the whole configuration and collect the report.
    pub fn run(&self) -> RunReport {
        log::info!("Starting Git synchronization...");
        let mut report = RunReport::new();

        for repo in &self.config.repositories {
            report.repositories.push(self.sync_repository(repo));
        }

        report.end_time = Some(now_iso());
        report
    }

    /// Replicate one repository. Never panics or propagates: any error
    /// becomes the entry's `error` field and the remaining repositories
    /// still run.
    fn sync_repository(&self, repo: &RepositoryConfig) -> RepoReport {
        log::info!("{}", "=".repeat(60));
        log::info!("Starting synchronization for repository: {}", repo.name);

        let mut entry = RepoReport::new(&repo.name);
        if let Err(e) = self.sync_repository_inner(repo, &mut entry) {
            entry.error = Some(format!("{e:#}"));
            entry.status = RepoStatus::Failed;
            log::error!("Failed to sync repository '{}': {e:#}", repo.name);
        }
        entry.end_time = Some(now_iso());
        entry
    }

    fn sync_repository_inner(
        &self,
        repo: &RepositoryConfig,
        entry: &mut RepoReport,
    ) -> anyhow::Result<()> {
        let workspace = Workspace::prepare(&self.driver, repo, &self.config.identity)?;

        let mut state = SyncState::load(&workspace);
        let is_full = self.force_full || state.last_sync.is_none();
        entry.mode = if is_full { "full" } else { "incremental" }.to_string();
        log::info!("Sync mode: {}", entry.mode.to_uppercase());

        workspace.fetch_all()?;

        let source_branches = workspace.source_branches()?;
        log::info!(
            "Found {} branches in source repository",
            source_branches.len()
        );

        let mut to_sync = Vec::new();
        for branch in source_branches {
            if repo.is_ignored(&branch) {
                log::info!("Ignoring branch: {branch}");
                entry.ignored.push(branch);
            } else {
                to_sync.push(branch);
            }
        }
        log::info!("Will sync {} branches (after filtering)", to_sync.len());

        let replicator = BranchReplicator::new(&workspace, repo);
        let mut lfs_triggered = false;

        for branch in &to_sync {
            let mapped = repo.map_branch(branch).to_string();
            let previous = state.synced_branches.get(branch).cloned();
            let is_new = previous.is_none();
            let mapping_changed = previous.as_deref().is_some_and(|p| p != mapped.as_str());

            if is_new {
                entry.new_branches += 1;
                log::info!("New branch detected: {branch}");
            } else if mapping_changed {
                entry.new_branches += 1;
                log::info!(
                    "Branch mapping changed: {branch} ({} -> {mapped})",
                    previous.as_deref().unwrap_or_default()
                );
            }

            let full = is_full || is_new || mapping_changed;
            match replicator.sync_branch(branch, &mapped, full, &mut state, &mut lfs_triggered) {
                BranchOutcome::Synced => {
                    entry.synced += 1;
                    state.synced_branches.insert(branch.clone(), mapped);
                }
                BranchOutcome::Skipped => entry.skipped += 1,
                BranchOutcome::Failed => {
                    entry.failed += 1;
                    log::error!("Branch {branch} synchronization failed");
                }
            }
        }
        entry.lfs_triggered = lfs_triggered;

        // Tags travel once per repository; a rejected tag is not worth
        // failing the run over
        log::info!("Pushing all tags");
        if let Err(e) = workspace.run(&["push", "origin", "--tags"]) {
            log::warn!("Failed to push tags: {e:#}");
        }

        if entry.synced > 0 {
            state.last_sync = Some(now_iso());
            if let Err(e) = state.store(&workspace) {
                log::error!("Failed to push sync state to remote: {e:#}");
                log::warn!(
                    "Sync state could not be saved - next run will treat this as a first-time sync"
                );
            }
        } else {
            log::info!("No branches synced, sync state unchanged");
        }

        entry.status = if entry.failed > 0 {
            if entry.synced > 0 {
                RepoStatus::PartialSuccess
            } else {
                RepoStatus::Failed
            }
        } else {
            RepoStatus::Success
        };

        if entry.failed > 0 {
            log::info!(
                "Repository '{}' synchronized with failures: synced {}, skipped {}, new {}, failed {}",
                repo.name, entry.synced, entry.skipped, entry.new_branches, entry.failed
            );
        } else {
            log::info!(
                "Repository '{}' synchronized successfully: synced {}, skipped {}, new {}",
                repo.name, entry.synced, entry.skipped, entry.new_branches
            );
        }
        Ok(())
    }
}
