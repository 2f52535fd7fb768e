//! Durable sync state on the destination's `sync_state` branch.
//!
//! The journal is a single `sync_state.json` at the root of a distinguished
//! branch. It records, per state key, the last source commit known to be
//! replicated. Reads never fail — any problem degrades to the empty state,
//! which makes the next sync a full one. Writes are content-gated: identical
//! state produces no commit and no push.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::workspace::Workspace;
use crate::config::SYNC_STATE_BRANCH;

const STATE_FILE: &str = "sync_state.json";

/// Journal persisted between runs.
///
/// The maps are lossy across runs: branches deleted upstream keep their
/// entries, which is harmless (they are simply never looked up again).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync: Option<String>,
    #[serde(default)]
    pub synced_branches: IndexMap<String, String>,
    #[serde(default)]
    pub last_commits: IndexMap<String, String>,
}

/// Key identifying a sync direction: `"src->dst"` when renamed, else `"src"`.
pub fn state_key(source_branch: &str, dest_branch: &str) -> String {
    if source_branch == dest_branch {
        source_branch.to_string()
    } else {
        format!("{source_branch}->{dest_branch}")
    }
}

impl SyncState {
    /// Read the journal from `origin/sync_state`.
    ///
    /// A missing branch, missing file, or unparseable content all yield the
    /// empty state ("first-time sync").
    pub fn load(workspace: &Workspace) -> Self {
        match Self::try_load(workspace) {
            Ok(Some(state)) => {
                log::info!("Loaded sync state from remote");
                state
            }
            Ok(None) => {
                log::info!("No remote sync state found, treating as first-time sync");
                Self::default()
            }
            Err(e) => {
                log::warn!("Failed to fetch remote sync state: {e:#}");
                log::info!("No remote sync state found, treating as first-time sync");
                Self::default()
            }
        }
    }

    fn try_load(workspace: &Workspace) -> anyhow::Result<Option<Self>> {
        workspace.run(&["fetch", "origin", "--prune"])?;

        let remote_ref = format!("refs/remotes/origin/{SYNC_STATE_BRANCH}");
        if !workspace.ref_exists(&remote_ref) {
            return Ok(None);
        }

        workspace.run(&[
            "checkout",
            "-B",
            SYNC_STATE_BRANCH,
            &format!("origin/{SYNC_STATE_BRANCH}"),
        ])?;

        let state_path = workspace.dir().join(STATE_FILE);
        if !state_path.exists() {
            return Ok(None);
        }

        let text = std::fs::read_to_string(&state_path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Write the journal back to `origin/sync_state`.
    ///
    /// Creates an orphan branch on first use. Commits only when the staged
    /// content differs, so re-running with no changes leaves the remote
    /// untouched.
    pub fn store(&self, workspace: &Workspace) -> anyhow::Result<()> {
        workspace.run(&["fetch", "origin", "--prune"])?;

        // A stale local branch would mask the remote's current tip
        let _ = workspace.run(&["branch", "-D", SYNC_STATE_BRANCH]);

        let remote_ref = format!("refs/remotes/origin/{SYNC_STATE_BRANCH}");
        if workspace.ref_exists(&remote_ref) {
            workspace.run(&[
                "checkout",
                "-B",
                SYNC_STATE_BRANCH,
                &format!("origin/{SYNC_STATE_BRANCH}"),
            ])?;
        } else {
            workspace.run(&["checkout", "--orphan", SYNC_STATE_BRANCH])?;
            // Clear whatever tree the orphan checkout inherited
            let _ = workspace.run(&["rm", "-rf", "."]);
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(workspace.dir().join(STATE_FILE), json)?;
        workspace.run(&["add", STATE_FILE])?;

        // Exit 0 from `diff --cached --quiet` means nothing staged differs
        if workspace.check(&["diff", "--cached", "--quiet"])? {
            log::info!("No changes in sync state, skipping commit");
            return Ok(());
        }

        let message = format!(
            "Update sync state - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        workspace.run(&["commit", "-m", &message])?;
        workspace.run(&["push", "origin", SYNC_STATE_BRANCH])?;
        log::info!("Sync state pushed to remote {SYNC_STATE_BRANCH} branch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_plain_and_renamed() {
        assert_eq!(state_key("main", "main"), "main");
        assert_eq!(state_key("dev", "develop"), "dev->develop");
    }

    #[test]
    fn test_default_state_is_empty() {
        let state = SyncState::default();
        assert!(state.last_sync.is_none());
        assert!(state.synced_branches.is_empty());
        assert!(state.last_commits.is_empty());
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = SyncState::default();
        state.last_sync = Some("2025-06-01T12:00:00".to_string());
        state
            .synced_branches
            .insert("dev".to_string(), "develop".to_string());
        state.last_commits.insert(
            "dev->develop".to_string(),
            "a".repeat(40),
        );

        let json = serde_json::to_string_pretty(&state).unwrap();
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_sync, state.last_sync);
        assert_eq!(back.synced_branches.get("dev").unwrap(), "develop");
        assert_eq!(back.last_commits.get("dev->develop").unwrap(), &"a".repeat(40));
    }

    #[test]
    fn test_state_tolerates_unknown_fields() {
        let json = r#"{
            "last_sync": null,
            "synced_branches": {},
            "last_commits": {},
            "future_field": 42
        }"#;
        let state: SyncState = serde_json::from_str(json).unwrap();
        assert!(state.last_sync.is_none());
    }

    #[test]
    fn test_state_tolerates_missing_maps() {
        let state: SyncState = serde_json::from_str(r#"{"last_sync": null}"#).unwrap();
        assert!(state.synced_branches.is_empty());
        assert!(state.last_commits.is_empty());
    }
}
