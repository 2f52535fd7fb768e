//! Per-branch replication state machine.
//!
//! For each source branch the replicator picks one of three modes:
//!
//! - `CleanRebuild` — publish only the current tree as a single orphan
//!   commit (per-repository `clean_history`).
//! - `FullReplay` — rebuild the destination branch from the source branch
//!   and force-push. Chosen for first-time branches, mapping changes, a
//!   vanished destination branch, or `--force-full`.
//! - `Incremental` — replay only `last_commits[key]..source tip` on top of
//!   `origin/<dest>`.
//!
//! Within a replay, pushes are either bulk (one cherry-pick, one push) or
//! commit-by-commit. Commit-by-commit is forced when the cumulative change
//! size exceeds the repository threshold, when the LFS detector added
//! tracking (the amended messages make the tree change explicit), or when
//! the destination diverged from recorded state (every replayed commit then
//! carries its original SHA).

use super::lfs::{LfsDetector, ScanSet, cumulative_change_mb};
use super::state::{SyncState, state_key};
use super::workspace::Workspace;
use crate::config::RepositoryConfig;
use crate::git::CommitInfo;

/// How a branch is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    CleanRebuild,
    FullReplay,
    Incremental,
}

/// Result of replicating one branch. Outcomes are values, not errors: a
/// failed branch never aborts the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    Synced,
    Skipped,
    Failed,
}

pub struct BranchReplicator<'a> {
    workspace: &'a Workspace<'a>,
    repo: &'a RepositoryConfig,
}

impl<'a> BranchReplicator<'a> {
    pub fn new(workspace: &'a Workspace<'a>, repo: &'a RepositoryConfig) -> Self {
        Self { workspace, repo }
    }

    /// Replicate one branch. `full` requests a full replay regardless of
    /// recorded state (force-full, new branch, mapping change).
    ///
    /// On `Synced`, `state.last_commits` is updated with the source tip;
    /// the caller persists the state once the whole repository is done.
    pub fn sync_branch(
        &self,
        source_branch: &str,
        dest_branch: &str,
        full: bool,
        state: &mut SyncState,
        lfs_triggered: &mut bool,
    ) -> BranchOutcome {
        match self.sync_branch_inner(source_branch, dest_branch, full, state, lfs_triggered) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Failed to sync branch {source_branch}: {e:#}");
                BranchOutcome::Failed
            }
        }
    }

    fn sync_branch_inner(
        &self,
        source_branch: &str,
        dest_branch: &str,
        full: bool,
        state: &mut SyncState,
        lfs_triggered: &mut bool,
    ) -> anyhow::Result<BranchOutcome> {
        let key = state_key(source_branch, dest_branch);
        log::info!("Syncing branch: {source_branch} -> {dest_branch}");

        let source_tip = self.workspace.branch_tip("source", source_branch)?;

        // No recorded commit means there is nothing to replay incrementally
        let full = full || !state.last_commits.contains_key(&key);
        let last_synced = if full {
            None
        } else {
            state.last_commits.get(&key).cloned()
        };

        if let Some(last) = &last_synced
            && *last == source_tip.hash
        {
            log::info!("Branch {source_branch} is up to date, skipping");
            return Ok(BranchOutcome::Skipped);
        }

        let mut add_original_hash =
            self.preflight_divergence(dest_branch, last_synced.as_deref());

        let requested = if self.repo.clean_history {
            Mode::CleanRebuild
        } else if full {
            Mode::FullReplay
        } else {
            Mode::Incremental
        };

        let outcome = match requested {
            Mode::CleanRebuild => self.clean_rebuild(dest_branch, &source_tip, lfs_triggered)?,
            _ => self.replay(
                source_branch,
                dest_branch,
                requested,
                last_synced.as_deref(),
                &source_tip,
                &mut add_original_hash,
                lfs_triggered,
            )?,
        };

        if outcome == BranchOutcome::Synced {
            state.last_commits.insert(key, source_tip.hash.clone());
            log::info!("Branch {source_branch} -> {dest_branch} synchronized successfully");
        }
        Ok(outcome)
    }

    /// Decide whether replayed commits must carry their original SHA.
    ///
    /// True when someone rewrote or pushed over the mirror since the last
    /// recorded sync. Once true for a branch it stays true for all of its
    /// commits this run.
    fn preflight_divergence(&self, dest_branch: &str, last_synced: Option<&str>) -> bool {
        let Some(last) = last_synced else {
            return false;
        };
        if !self
            .workspace
            .ref_exists(&format!("refs/remotes/origin/{dest_branch}"))
        {
            return false;
        }
        match self.workspace.rev_parse(&format!("origin/{dest_branch}")) {
            Ok(head) if head != last => {
                log::info!(
                    "Destination branch {dest_branch} has diverged from sync state, \
                     replayed commits will carry their original SHA"
                );
                true
            }
            _ => false,
        }
    }

    /// Mode 1: publish the source tree as a single orphan commit.
    fn clean_rebuild(
        &self,
        dest_branch: &str,
        tip: &CommitInfo,
        lfs_triggered: &mut bool,
    ) -> anyhow::Result<BranchOutcome> {
        log::info!("Performing clean-history rebuild for branch: {dest_branch}");

        self.reset_working_tree();
        // A stale rebuild branch from an interrupted run would block the orphan checkout
        let _ = self.workspace.run(&["branch", "-D", "temp_clean"]);

        self.workspace.run(&["checkout", "--orphan", "temp_clean"])?;
        let _ = self.workspace.run(&["rm", "-rf", "."]);
        self.workspace.run(&["checkout", &tip.hash, "--", "."])?;

        let detector = LfsDetector::new(self.workspace, self.repo.lfs_file_threshold_mb);
        if detector.scan(ScanSet::FullTree)? {
            *lfs_triggered = true;
        }

        self.workspace.run(&["add", "."])?;
        let message = sync_message(&tip.subject, &tip.hash);
        self.workspace.run(&["commit", "-m", &message])?;

        let _ = self.workspace.run(&["branch", "-D", dest_branch]);
        self.workspace
            .run(&["branch", "-m", "temp_clean", dest_branch])?;

        if let Err(e) = self
            .workspace
            .run(&["push", "origin", dest_branch, "--force"])
        {
            log::error!("Failed to push clean history for branch {dest_branch}: {e:#}");
            return Ok(BranchOutcome::Failed);
        }
        Ok(BranchOutcome::Synced)
    }

    /// Modes 2 and 3: prepare the working branch, then replay in bulk or
    /// commit-by-commit.
    #[allow(clippy::too_many_arguments)]
    fn replay(
        &self,
        source_branch: &str,
        dest_branch: &str,
        requested: Mode,
        last_synced: Option<&str>,
        tip: &CommitInfo,
        add_original_hash: &mut bool,
        lfs_triggered: &mut bool,
    ) -> anyhow::Result<BranchOutcome> {
        self.reset_working_tree();

        let mode = match self.prepare_branch(source_branch, dest_branch, requested, tip) {
            Ok(mode) => mode,
            Err(e) => {
                log::error!("Failed to prepare branch {dest_branch}: {e:#}");
                return Ok(BranchOutcome::Failed);
            }
        };

        let probe_range = match (mode, last_synced) {
            (Mode::Incremental, Some(last)) => Some((last, tip.hash.as_str())),
            _ => None,
        };

        let total_mb = cumulative_change_mb(self.workspace, probe_range);
        if total_mb > self.repo.lfs_total_threshold_mb as f64 {
            log::info!("Large changes detected ({total_mb:.2} MB), syncing commit by commit");
            return self.step_by_step(mode, dest_branch, last_synced, tip, add_original_hash, lfs_triggered);
        }

        let detector = LfsDetector::new(self.workspace, self.repo.lfs_file_threshold_mb);
        let source_ref = format!("source/{source_branch}");
        let scan = match probe_range {
            Some((from, _)) => ScanSet::Changes {
                from,
                to: &source_ref,
            },
            None => ScanSet::FullTree,
        };
        if detector.scan(scan)? {
            *lfs_triggered = true;
            // Tracking rules change the tree, so each commit is amended to
            // name its original SHA and pushed individually
            *add_original_hash = true;
            return self.step_by_step(mode, dest_branch, last_synced, tip, add_original_hash, lfs_triggered);
        }

        if *add_original_hash {
            // Divergent destination: every replayed commit gets amended,
            // which only commit-by-commit replay can do
            return self.step_by_step(mode, dest_branch, last_synced, tip, add_original_hash, lfs_triggered);
        }

        // Bulk: one cherry-pick for the whole range, one push
        if let (Mode::Incremental, Some(last)) = (mode, last_synced) {
            let range = format!("{last}..{}", tip.hash);
            if let Err(e) = self.workspace.run(&["cherry-pick", &range]) {
                log::error!("Failed to cherry-pick commits: {e:#}");
                self.recover_from_cherry_pick();
                return Ok(BranchOutcome::Failed);
            }
        }

        let push_result = match mode {
            Mode::Incremental => self.workspace.run(&["push", "origin", dest_branch]),
            _ => self
                .workspace
                .run(&["push", "origin", dest_branch, "--force"]),
        };
        if let Err(e) = push_result {
            log::error!("Failed to push branch {dest_branch}: {e:#}");
            return Ok(BranchOutcome::Failed);
        }
        Ok(BranchOutcome::Synced)
    }

    /// Put the working directory on the right local branch and report the
    /// effective mode. An incremental request is upgraded to a full replay
    /// when `origin/<dest>` does not exist.
    fn prepare_branch(
        &self,
        source_branch: &str,
        dest_branch: &str,
        requested: Mode,
        tip: &CommitInfo,
    ) -> anyhow::Result<Mode> {
        let remote_ref = format!("refs/remotes/origin/{dest_branch}");

        if requested == Mode::FullReplay {
            log::info!("Performing full sync (preserve history) for branch: {dest_branch}");
            // Drop the stale remote-tracking ref along with any local branch
            let _ = self
                .workspace
                .run(&["branch", "-d", "-r", &format!("origin/{dest_branch}")]);
            self.create_from_source(source_branch, dest_branch, tip)?;
            return Ok(Mode::FullReplay);
        }

        if self.workspace.ref_exists(&remote_ref) {
            log::info!("Performing incremental sync for branch: {dest_branch}");
            self.workspace.run(&[
                "checkout",
                "--force",
                "-B",
                dest_branch,
                &format!("origin/{dest_branch}"),
            ])?;
            Ok(Mode::Incremental)
        } else {
            log::info!("Destination branch origin/{dest_branch} not found, rebuilding from source");
            self.create_from_source(source_branch, dest_branch, tip)?;
            Ok(Mode::FullReplay)
        }
    }

    /// Recreate the local destination branch at the source tip.
    fn create_from_source(
        &self,
        source_branch: &str,
        dest_branch: &str,
        tip: &CommitInfo,
    ) -> anyhow::Result<()> {
        // The currently checked-out branch cannot be deleted; move it aside
        let mut renamed = false;
        if let Some(current) = self.workspace.current_branch() {
            if current == dest_branch {
                let _ = self.workspace.run(&["branch", "-D", "temp"]);
                self.workspace.run(&["branch", "-m", "temp"])?;
                renamed = true;
            } else {
                let _ = self.workspace.run(&["branch", "-D", dest_branch]);
            }
        }

        self.workspace.run(&[
            "checkout",
            "--force",
            "-b",
            dest_branch,
            &format!("source/{source_branch}"),
        ])?;
        self.workspace.run(&["reset", "--hard", &tip.hash])?;

        if renamed {
            let _ = self.workspace.run(&["branch", "-D", "temp"]);
        }
        log::info!("Created branch {dest_branch} from source/{source_branch}");
        Ok(())
    }

    /// Replay commits one at a time, pushing after each.
    fn step_by_step(
        &self,
        mode: Mode,
        dest_branch: &str,
        last_synced: Option<&str>,
        tip: &CommitInfo,
        add_original_hash: &mut bool,
        lfs_triggered: &mut bool,
    ) -> anyhow::Result<BranchOutcome> {
        let range_spec = match (mode, last_synced) {
            (Mode::Incremental, Some(last)) => format!("{last}..{}", tip.hash),
            _ => tip.hash.clone(),
        };

        let output = self
            .workspace
            .capture(&["log", "--reverse", "--format=%H", &range_spec])?;
        let commits: Vec<&str> = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if commits.is_empty() {
            log::info!("No commits to sync up to {}", tip.hash);
            return Ok(BranchOutcome::Synced);
        }

        log::info!(
            "Syncing {} commits ({} -> {})",
            commits.len(),
            commits[0],
            commits[commits.len() - 1]
        );

        if mode == Mode::FullReplay {
            // Establish the base; the first iteration then skips its cherry-pick
            self.workspace.run(&["reset", "--hard", commits[0]])?;
        }

        let force = mode == Mode::FullReplay;
        for (index, commit) in commits.iter().copied().enumerate() {
            log::debug!("Syncing commit {commit} ({}/{})", index + 1, commits.len());
            if !self.replay_single_commit(commit, force, add_original_hash, lfs_triggered)? {
                log::error!("Failed replaying {commit} onto {dest_branch}");
                return Ok(BranchOutcome::Failed);
            }
        }

        Ok(BranchOutcome::Synced)
    }

    /// Cherry-pick, LFS-scan, optionally amend, then push one commit.
    ///
    /// Returns `Ok(false)` on a recoverable per-commit failure (conflict or
    /// rejected push).
    fn replay_single_commit(
        &self,
        commit: &str,
        force: bool,
        add_original_hash: &mut bool,
        lfs_triggered: &mut bool,
    ) -> anyhow::Result<bool> {
        let current = self.workspace.rev_parse("HEAD")?;
        let info = self.workspace.commit_info(commit)?;

        let is_base = current == commit;
        if !is_base
            && let Err(e) = self.workspace.run(&["cherry-pick", commit])
        {
            log::error!("Failed to cherry-pick {commit}: {e:#}");
            self.recover_from_cherry_pick();
            return Ok(false);
        }

        let detector = LfsDetector::new(self.workspace, self.repo.lfs_file_threshold_mb);
        // The base commit's "change set" is its entire tree
        let scan = if is_base {
            ScanSet::FullTree
        } else {
            ScanSet::Changes {
                from: &current,
                to: commit,
            }
        };
        let lfs_enabled = detector.scan(scan)?;
        if lfs_enabled {
            *lfs_triggered = true;
        }

        if lfs_enabled || *add_original_hash {
            let message = sync_message(&info.subject, commit);
            self.workspace.run(&["commit", "--amend", "-m", &message])?;
            *add_original_hash = true;
            log::debug!("Amended commit message with original SHA");
        }

        let push_result = if force {
            self.workspace.run(&["push", "origin", "HEAD", "--force"])
        } else {
            self.workspace.run(&["push", "origin", "HEAD"])
        };
        if let Err(e) = push_result {
            log::error!("Failed to push commit {}: {e:#}", short(commit));
            return Ok(false);
        }

        log::debug!("Pushed commit: {}", short(commit));
        Ok(true)
    }

    /// Bring the working tree back to a clean state between branches. An
    /// interrupted previous run may have left a partial cherry-pick behind.
    fn reset_working_tree(&self) {
        if self.workspace.head_exists()
            && let Err(e) = self.workspace.run(&["reset", "--hard", "HEAD"])
        {
            log::debug!("Reset to HEAD failed: {e:#}");
        }
        if let Err(e) = self.workspace.run(&["clean", "-fdx"]) {
            log::debug!("Clean of untracked files failed: {e:#}");
        }
    }

    fn recover_from_cherry_pick(&self) {
        if self.workspace.run(&["cherry-pick", "--abort"]).is_err() {
            let _ = self.workspace.run(&["reset", "--hard", "HEAD"]);
            let _ = self.workspace.run(&["clean", "-fd"]);
        }
    }
}

/// Replacement message for rebuilt or amended commits.
fn sync_message(subject: &str, original_hash: &str) -> String {
    format!("[SYNC] {subject}\n\nOriginal SHA: {original_hash}")
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}
